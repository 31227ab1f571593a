//! In-process simulated devices for running the bridge without hardware.
//!
//! [`SimDevice`] is a builder for a [`DeviceHandle`] exposing any subset of
//! capability views.  The views themselves ([`SimControlBoard`],
//! [`SimChannels`], [`SimAggregate`], [`SimCamera`]) are shared `Arc`s whose
//! readings can be changed from the outside while the bridge is attached,
//! and each can be told to fail its next reads.
//!
//! [`SimRig::mirroring`] builds a whole device set that satisfies a given
//! [`SensorBridgeConfig`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sensorbridge_hal::sim::{SimChannels, SimDevice};
//! use sensorbridge_hal::{SensorBridge, SensorBridgeConfig};
//! use sensorbridge_types::SensorCategory;
//!
//! let wrench = Arc::new(SimChannels::new(6));
//! let devices = vec![SimDevice::new().with_generic_sensor(wrench.clone()).into_handle("l_hand")];
//!
//! let config = SensorBridgeConfig::default()
//!     .with_category(SensorCategory::CartesianWrench, ["l_hand"]);
//! let mut bridge = SensorBridge::new();
//! bridge.initialize_with(config).unwrap();
//! bridge.attach(&devices).unwrap();
//!
//! wrench.set(&[1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
//! bridge.advance().unwrap();
//! assert_eq!(bridge.cartesian_wrench("l_hand").unwrap().value[1], 2.0);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nalgebra::DMatrix;
use sensorbridge_types::SensorCategory;

use crate::capability::{
    AnalogSensor, AxisInfo, CapabilityKind, DepthSensor, DeviceFault, DeviceHandle, Driver,
    EncodersTimed, FrameGrabber, GenericSensor, MultipleAnalogSensors,
};
use crate::config::SensorBridgeConfig;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared failure switch.  While set, every read returns the fault.
#[derive(Default)]
struct FaultSwitch {
    fault: Mutex<Option<String>>,
}

impl FaultSwitch {
    fn check(&self) -> Result<(), DeviceFault> {
        match lock(&self.fault).as_ref() {
            Some(details) => Err(DeviceFault::new(details.clone())),
            None => Ok(()),
        }
    }

    fn set(&self, details: Option<String>) {
        *lock(&self.fault) = details;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Control board
// ────────────────────────────────────────────────────────────────────────────

/// Named axes with settable positions, velocities and acquisition time.
pub struct SimControlBoard {
    axes: Vec<String>,
    positions: Mutex<Vec<f64>>,
    velocities: Mutex<Vec<f64>>,
    stamp: Mutex<f64>,
    fault: FaultSwitch,
}

impl SimControlBoard {
    pub fn new<I, S>(axes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let axes: Vec<String> = axes.into_iter().map(Into::into).collect();
        let n = axes.len();
        Self {
            axes,
            positions: Mutex::new(vec![0.0; n]),
            velocities: Mutex::new(vec![0.0; n]),
            stamp: Mutex::new(0.0),
            fault: FaultSwitch::default(),
        }
    }

    /// Set the reading of `axis` (board order).  Out-of-range axes are ignored.
    pub fn set_axis(&self, axis: usize, position: f64, velocity: f64) {
        if let Some(p) = lock(&self.positions).get_mut(axis) {
            *p = position;
        }
        if let Some(v) = lock(&self.velocities).get_mut(axis) {
            *v = velocity;
        }
    }

    pub fn set_stamp(&self, stamp: f64) {
        *lock(&self.stamp) = stamp;
    }

    pub fn fail(&self, details: impl Into<String>) {
        self.fault.set(Some(details.into()));
    }

    pub fn recover(&self) {
        self.fault.set(None);
    }
}

impl AxisInfo for SimControlBoard {
    fn axis_name(&self, axis: usize) -> Option<String> {
        self.axes.get(axis).cloned()
    }
}

impl EncodersTimed for SimControlBoard {
    fn axes(&self) -> usize {
        self.axes.len()
    }

    fn encoders_timed(&self, positions: &mut [f64]) -> Result<f64, DeviceFault> {
        self.fault.check()?;
        copy_into(&lock(&self.positions), positions);
        Ok(*lock(&self.stamp))
    }

    fn encoder_speeds(&self, velocities: &mut [f64]) -> Result<(), DeviceFault> {
        self.fault.check()?;
        copy_into(&lock(&self.velocities), velocities);
        Ok(())
    }
}

fn copy_into(source: &[f64], out: &mut [f64]) {
    for (slot, value) in out.iter_mut().zip(source) {
        *slot = *value;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Channel streams
// ────────────────────────────────────────────────────────────────────────────

/// Fixed-width stream served through both the generic and the analog view.
pub struct SimChannels {
    values: Mutex<Vec<f64>>,
    fault: FaultSwitch,
}

impl SimChannels {
    pub fn new(channels: usize) -> Self {
        Self {
            values: Mutex::new(vec![0.0; channels]),
            fault: FaultSwitch::default(),
        }
    }

    /// Overwrite the leading channels with `values`.
    pub fn set(&self, values: &[f64]) {
        copy_into(values, &mut lock(&self.values));
    }

    pub fn fail(&self, details: impl Into<String>) {
        self.fault.set(Some(details.into()));
    }

    pub fn recover(&self) {
        self.fault.set(None);
    }

    fn channel_count(&self) -> usize {
        lock(&self.values).len()
    }

    fn read_into(&self, out: &mut [f64]) -> Result<(), DeviceFault> {
        self.fault.check()?;
        copy_into(&lock(&self.values), out);
        Ok(())
    }
}

impl GenericSensor for SimChannels {
    fn channels(&self) -> usize {
        self.channel_count()
    }

    fn read(&self, out: &mut [f64]) -> Result<(), DeviceFault> {
        self.read_into(out)
    }
}

impl AnalogSensor for SimChannels {
    fn channels(&self) -> usize {
        self.channel_count()
    }

    fn read(&self, out: &mut [f64]) -> Result<(), DeviceFault> {
        self.read_into(out)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Aggregates
// ────────────────────────────────────────────────────────────────────────────

struct AggregateInstance {
    name: String,
    values: Vec<f64>,
}

/// Named instances of one category behind a single aggregate view.
pub struct SimAggregate {
    instances: Mutex<Vec<AggregateInstance>>,
    stamp: Mutex<f64>,
    fault: FaultSwitch,
}

impl SimAggregate {
    pub fn new<I, S>(channels: usize, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let instances = names
            .into_iter()
            .map(|name| AggregateInstance {
                name: name.into(),
                values: vec![0.0; channels],
            })
            .collect();
        Self {
            instances: Mutex::new(instances),
            stamp: Mutex::new(0.0),
            fault: FaultSwitch::default(),
        }
    }

    /// Set the reading of instance `name`.  Unknown names are ignored.
    pub fn set(&self, name: &str, values: &[f64]) {
        if let Some(instance) = lock(&self.instances).iter_mut().find(|i| i.name == name) {
            copy_into(values, &mut instance.values);
        }
    }

    pub fn set_stamp(&self, stamp: f64) {
        *lock(&self.stamp) = stamp;
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.instances).iter().map(|i| i.name.clone()).collect()
    }

    pub fn fail(&self, details: impl Into<String>) {
        self.fault.set(Some(details.into()));
    }

    pub fn recover(&self) {
        self.fault.set(None);
    }
}

impl MultipleAnalogSensors for SimAggregate {
    fn sensor_count(&self) -> usize {
        lock(&self.instances).len()
    }

    fn sensor_name(&self, index: usize) -> Option<String> {
        lock(&self.instances).get(index).map(|i| i.name.clone())
    }

    fn measure(&self, index: usize, out: &mut [f64]) -> Result<f64, DeviceFault> {
        self.fault.check()?;
        let instances = lock(&self.instances);
        let instance = instances
            .get(index)
            .ok_or_else(|| DeviceFault::new(format!("no instance at index {index}")))?;
        copy_into(&instance.values, out);
        Ok(*lock(&self.stamp))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cameras
// ────────────────────────────────────────────────────────────────────────────

/// Uniform frame source served through both the colour and the depth view.
pub struct SimCamera {
    size: Mutex<(usize, usize)>,
    level: Mutex<f64>,
    fault: FaultSwitch,
}

impl SimCamera {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            size: Mutex::new((width, height)),
            level: Mutex::new(0.0),
            fault: FaultSwitch::default(),
        }
    }

    /// Every pixel of the next frames reads `level`.
    pub fn set_level(&self, level: f64) {
        *lock(&self.level) = level;
    }

    /// Change the live frame size, as a reconfigured camera would.
    pub fn resize(&self, width: usize, height: usize) {
        *lock(&self.size) = (width, height);
    }

    pub fn fail(&self, details: impl Into<String>) {
        self.fault.set(Some(details.into()));
    }

    pub fn recover(&self) {
        self.fault.set(None);
    }

    fn fill(&self, frame: &mut DMatrix<f64>) -> Result<(), DeviceFault> {
        self.fault.check()?;
        frame.fill(*lock(&self.level));
        Ok(())
    }
}

impl FrameGrabber for SimCamera {
    fn frame_size(&self) -> (usize, usize) {
        *lock(&self.size)
    }

    fn grab(&self, frame: &mut DMatrix<f64>) -> Result<(), DeviceFault> {
        self.fill(frame)
    }
}

impl DepthSensor for SimCamera {
    fn depth_size(&self) -> (usize, usize) {
        *lock(&self.size)
    }

    fn grab_depth(&self, frame: &mut DMatrix<f64>) -> Result<(), DeviceFault> {
        self.fill(frame)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimDevice builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for a simulated device exposing any subset of views.
#[derive(Default, Clone)]
pub struct SimDevice {
    axis_info: Option<Arc<dyn AxisInfo>>,
    encoders: Option<Arc<dyn EncodersTimed>>,
    generic: Option<Arc<dyn GenericSensor>>,
    analog: Option<Arc<dyn AnalogSensor>>,
    aggregates: HashMap<CapabilityKind, Arc<dyn MultipleAnalogSensors>>,
    frame_grabber: Option<Arc<dyn FrameGrabber>>,
    depth_sensor: Option<Arc<dyn DepthSensor>>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `board` through both the axis-name and the timed-encoder view.
    pub fn with_control_board(mut self, board: Arc<SimControlBoard>) -> Self {
        self.axis_info = Some(board.clone());
        self.encoders = Some(board);
        self
    }

    /// Expose only the axis-name view of `board`.
    pub fn with_axis_info(mut self, board: Arc<SimControlBoard>) -> Self {
        self.axis_info = Some(board);
        self
    }

    /// Expose only the timed-encoder view of `board`.
    pub fn with_encoders(mut self, board: Arc<SimControlBoard>) -> Self {
        self.encoders = Some(board);
        self
    }

    pub fn with_generic_sensor(mut self, stream: Arc<SimChannels>) -> Self {
        self.generic = Some(stream);
        self
    }

    pub fn with_analog_sensor(mut self, stream: Arc<SimChannels>) -> Self {
        self.analog = Some(stream);
        self
    }

    /// Expose `aggregate` as the aggregate view of `kind`.
    pub fn with_aggregate(mut self, kind: CapabilityKind, aggregate: Arc<SimAggregate>) -> Self {
        self.aggregates.insert(kind, aggregate);
        self
    }

    pub fn with_frame_grabber(mut self, camera: Arc<SimCamera>) -> Self {
        self.frame_grabber = Some(camera);
        self
    }

    pub fn with_depth_sensor(mut self, camera: Arc<SimCamera>) -> Self {
        self.depth_sensor = Some(camera);
        self
    }

    pub fn into_handle(self, key: impl Into<String>) -> DeviceHandle {
        DeviceHandle::new(key, Arc::new(self))
    }

    fn aggregate(&self, kind: CapabilityKind) -> Option<Arc<dyn MultipleAnalogSensors>> {
        self.aggregates.get(&kind).cloned()
    }
}

impl Driver for SimDevice {
    fn axis_info(&self) -> Option<Arc<dyn AxisInfo>> {
        self.axis_info.clone()
    }

    fn encoders_timed(&self) -> Option<Arc<dyn EncodersTimed>> {
        self.encoders.clone()
    }

    fn generic_sensor(&self) -> Option<Arc<dyn GenericSensor>> {
        self.generic.clone()
    }

    fn analog_sensor(&self) -> Option<Arc<dyn AnalogSensor>> {
        self.analog.clone()
    }

    fn three_axis_linear_accelerometers(&self) -> Option<Arc<dyn MultipleAnalogSensors>> {
        self.aggregate(CapabilityKind::ThreeAxisLinearAccelerometers)
    }

    fn three_axis_gyroscopes(&self) -> Option<Arc<dyn MultipleAnalogSensors>> {
        self.aggregate(CapabilityKind::ThreeAxisGyroscopes)
    }

    fn three_axis_magnetometers(&self) -> Option<Arc<dyn MultipleAnalogSensors>> {
        self.aggregate(CapabilityKind::ThreeAxisMagnetometers)
    }

    fn orientation_sensors(&self) -> Option<Arc<dyn MultipleAnalogSensors>> {
        self.aggregate(CapabilityKind::OrientationSensors)
    }

    fn six_axis_force_torque_sensors(&self) -> Option<Arc<dyn MultipleAnalogSensors>> {
        self.aggregate(CapabilityKind::SixAxisForceTorqueSensors)
    }

    fn frame_grabber(&self) -> Option<Arc<dyn FrameGrabber>> {
        self.frame_grabber.clone()
    }

    fn depth_sensor(&self) -> Option<Arc<dyn DepthSensor>> {
        self.depth_sensor.clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRig
// ────────────────────────────────────────────────────────────────────────────

const AGGREGATE_KINDS: [(SensorCategory, CapabilityKind); 5] = [
    (
        SensorCategory::LinearAccelerometer,
        CapabilityKind::ThreeAxisLinearAccelerometers,
    ),
    (SensorCategory::Gyroscope, CapabilityKind::ThreeAxisGyroscopes),
    (SensorCategory::OrientationSensor, CapabilityKind::OrientationSensors),
    (SensorCategory::Magnetometer, CapabilityKind::ThreeAxisMagnetometers),
    (
        SensorCategory::SixAxisForceTorque,
        CapabilityKind::SixAxisForceTorqueSensors,
    ),
];

/// A device set that satisfies one configuration, plus handles on every
/// simulated view so readings can be driven.
///
/// Layout:
/// - one `control_board` device reporting the configured joints in reverse
///   order;
/// - one `inertials` device carrying every aggregate;
/// - the first half of the force/torque sensors on the aggregate, the rest
///   as legacy analog devices keyed by name;
/// - one generic device per IMU and cartesian wrench;
/// - one device per camera name, sized as configured.
pub struct SimRig {
    devices: Vec<DeviceHandle>,
    pub control_board: Option<Arc<SimControlBoard>>,
    pub aggregates: BTreeMap<SensorCategory, Arc<SimAggregate>>,
    pub channels: BTreeMap<(SensorCategory, String), Arc<SimChannels>>,
    pub cameras: BTreeMap<String, Arc<SimCamera>>,
}

impl SimRig {
    pub fn mirroring(config: &SensorBridgeConfig) -> Self {
        let mut rig = SimRig {
            devices: Vec::new(),
            control_board: None,
            aggregates: BTreeMap::new(),
            channels: BTreeMap::new(),
            cameras: BTreeMap::new(),
        };
        let mut per_name: BTreeMap<String, SimDevice> = BTreeMap::new();

        let joints = config.expected(SensorCategory::Joints);
        if config.is_enabled(SensorCategory::Joints) {
            let board = Arc::new(SimControlBoard::new(joints.iter().rev().cloned()));
            rig.devices
                .push(SimDevice::new().with_control_board(board.clone()).into_handle("control_board"));
            rig.control_board = Some(board);
        }

        let mut inertials = SimDevice::new();
        let mut has_aggregate = false;
        for (category, kind) in AGGREGATE_KINDS {
            let expected = config.expected(category);
            let on_aggregate = if category == SensorCategory::SixAxisForceTorque {
                &expected[..expected.len().div_ceil(2)]
            } else {
                expected
            };
            if !config.is_enabled(category) || on_aggregate.is_empty() {
                continue;
            }
            let channels = category.channel_count().unwrap_or_default();
            let aggregate = Arc::new(SimAggregate::new(channels, on_aggregate.iter().cloned()));
            inertials = inertials.with_aggregate(kind, aggregate.clone());
            rig.aggregates.insert(category, aggregate);
            has_aggregate = true;
        }
        if has_aggregate {
            rig.devices.push(inertials.into_handle("inertials"));
        }

        let force_torque = config.expected(SensorCategory::SixAxisForceTorque);
        for name in &force_torque[force_torque.len().div_ceil(2)..] {
            let stream = Arc::new(SimChannels::new(6));
            let device = per_name.remove(name).unwrap_or_default();
            per_name.insert(name.clone(), device.with_analog_sensor(stream.clone()));
            rig.channels
                .insert((SensorCategory::SixAxisForceTorque, name.clone()), stream);
        }

        for category in [SensorCategory::Imu, SensorCategory::CartesianWrench] {
            let channels = category.channel_count().unwrap_or_default();
            for name in config.expected(category) {
                let stream = Arc::new(SimChannels::new(channels));
                let device = per_name.remove(name).unwrap_or_default();
                per_name.insert(name.clone(), device.with_generic_sensor(stream.clone()));
                rig.channels.insert((category, name.clone()), stream);
            }
        }

        for category in [SensorCategory::RgbCamera, SensorCategory::DepthCamera] {
            let options = config.category(category);
            for name in config.expected(category) {
                let (width, height) = options
                    .image_dimensions
                    .get(name)
                    .map(|d| (d.width, d.height))
                    .unwrap_or_default();
                let camera = Arc::new(SimCamera::new(width, height));
                let device = per_name.remove(name).unwrap_or_default();
                let device = match category {
                    SensorCategory::RgbCamera => device.with_frame_grabber(camera.clone()),
                    _ => device.with_depth_sensor(camera.clone()),
                };
                per_name.insert(name.clone(), device);
                rig.cameras.insert(name.clone(), camera);
            }
        }

        rig.devices
            .extend(per_name.into_iter().map(|(name, device)| device.into_handle(name)));
        rig
    }

    pub fn devices(&self) -> &[DeviceHandle] {
        &self.devices
    }

    /// Drive every view with a smooth waveform evaluated at `t` seconds.
    pub fn step(&self, t: f64) {
        if let Some(board) = &self.control_board {
            for axis in 0..board.axes() {
                let phase = t + axis as f64 * 0.1;
                board.set_axis(axis, phase.sin(), phase.cos());
            }
            board.set_stamp(t);
        }

        for aggregate in self.aggregates.values() {
            for (k, name) in aggregate.names().iter().enumerate() {
                let values: Vec<f64> = (0..6).map(|c| (t + (k + c) as f64).sin()).collect();
                aggregate.set(name, &values);
            }
            aggregate.set_stamp(t);
        }

        for stream in self.channels.values() {
            let values: Vec<f64> = (0..12).map(|c| (t + c as f64 * 0.5).cos()).collect();
            stream.set(&values);
        }

        for camera in self.cameras.values() {
            camera.set_level(t.sin().abs());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_serve_both_stream_views() {
        let stream = Arc::new(SimChannels::new(6));
        stream.set(&[1.0, 2.0]);
        let generic: Arc<dyn GenericSensor> = stream.clone();
        let analog: Arc<dyn AnalogSensor> = stream.clone();
        assert_eq!(generic.channels(), 6);
        assert_eq!(AnalogSensor::channels(analog.as_ref()), 6);

        let mut out = [0.0; 6];
        analog.read(&mut out).unwrap();
        assert_eq!(out, [1.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn fault_switch_fails_until_recovered() {
        let stream = SimChannels::new(3);
        stream.fail("cable unplugged");
        let mut out = [0.0; 3];
        let err = GenericSensor::read(&stream, &mut out).unwrap_err();
        assert_eq!(err.to_string(), "cable unplugged");

        stream.recover();
        assert!(GenericSensor::read(&stream, &mut out).is_ok());
    }

    #[test]
    fn aggregate_measures_by_index_with_stamp() {
        let aggregate = SimAggregate::new(3, ["a", "b"]);
        aggregate.set("b", &[4.0, 5.0, 6.0]);
        aggregate.set_stamp(12.5);

        assert_eq!(aggregate.sensor_count(), 2);
        assert_eq!(aggregate.sensor_name(1).as_deref(), Some("b"));
        let mut out = [0.0; 3];
        assert_eq!(aggregate.measure(1, &mut out).unwrap(), 12.5);
        assert_eq!(out, [4.0, 5.0, 6.0]);
        assert!(aggregate.measure(2, &mut out).is_err());
    }

    #[test]
    fn device_exposes_only_configured_views() {
        let board = Arc::new(SimControlBoard::new(["j0"]));
        let handle = SimDevice::new().with_axis_info(board).into_handle("half_board");
        assert!(handle.supports(CapabilityKind::AxisInfo));
        assert!(!handle.supports(CapabilityKind::EncodersTimed));
        assert!(!handle.supports(CapabilityKind::FrameGrabber));
    }

    #[test]
    fn rig_mirrors_configuration() {
        let config = SensorBridgeConfig::default()
            .with_category(SensorCategory::Joints, ["a", "b", "c"])
            .with_category(SensorCategory::Gyroscope, ["head_gyro"])
            .with_category(SensorCategory::SixAxisForceTorque, ["l_ft", "r_ft", "t_ft"])
            .with_camera(SensorCategory::RgbCamera, "eye", 8, 6);
        let rig = SimRig::mirroring(&config);

        let board = rig.control_board.as_ref().unwrap();
        assert_eq!(board.axis_name(0).as_deref(), Some("c"));

        let ft = &rig.aggregates[&SensorCategory::SixAxisForceTorque];
        assert_eq!(ft.names(), vec!["l_ft".to_string(), "r_ft".to_string()]);
        assert!(rig
            .channels
            .contains_key(&(SensorCategory::SixAxisForceTorque, "t_ft".to_string())));
        assert_eq!(rig.cameras["eye"].frame_size(), (8, 6));

        let keys: Vec<&str> = rig.devices().iter().map(DeviceHandle::key).collect();
        assert_eq!(keys, vec!["control_board", "inertials", "eye", "t_ft"]);
    }
}
