//! Capability views exposed by device drivers, and the resolvers that obtain
//! them from an opaque [`DeviceHandle`].
//!
//! A driver exposes any subset of the closed set of [`CapabilityKind`]s.  Each
//! kind has exactly one resolver method on [`Driver`]; the default
//! implementation of every resolver reports the view as absent, so a driver
//! only overrides the views it actually implements.
//!
//! # Ownership
//!
//! Views are handed out as `Arc`s that the driver keeps alive for as long as
//! the device is open.  The bridge downgrades them to `Weak` references when
//! binding, so a driver that is closed by its owner is observed as a read
//! failure instead of being kept alive by the bridge.  A view that nothing
//! but the resolver's return value holds is rejected during attachment.

use std::fmt;
use std::sync::{Arc, Weak};

use nalgebra::DMatrix;
use thiserror::Error;

/// Failure reported by a driver while serving a capability view.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct DeviceFault(pub String);

impl DeviceFault {
    pub fn new(details: impl Into<String>) -> Self {
        Self(details.into())
    }
}

/// The closed set of capability views a driver may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    AxisInfo,
    EncodersTimed,
    GenericSensor,
    AnalogSensor,
    ThreeAxisLinearAccelerometers,
    ThreeAxisGyroscopes,
    ThreeAxisMagnetometers,
    OrientationSensors,
    SixAxisForceTorqueSensors,
    FrameGrabber,
    DepthSensor,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Views
// ────────────────────────────────────────────────────────────────────────────

/// Names the axes of a control board.
pub trait AxisInfo: Send + Sync {
    /// Name of `axis`, or `None` when the index is out of range.
    fn axis_name(&self, axis: usize) -> Option<String>;
}

/// Timestamped joint encoder readings of a control board.
pub trait EncodersTimed: Send + Sync {
    /// Number of axes the board reports.
    fn axes(&self) -> usize;

    /// Fill `positions` (one entry per axis, in the board's order) and return
    /// the acquisition time in seconds.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceFault`] when the encoders cannot be read.
    fn encoders_timed(&self, positions: &mut [f64]) -> Result<f64, DeviceFault>;

    /// Fill `velocities` (one entry per axis, in the board's order).
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceFault`] when the encoder speeds cannot be read.
    fn encoder_speeds(&self, velocities: &mut [f64]) -> Result<(), DeviceFault>;
}

/// Untyped multi-channel stream.  Classification happens out of band by
/// channel count (12 channels is an IMU, 6 channels is a cartesian wrench).
pub trait GenericSensor: Send + Sync {
    fn channels(&self) -> usize;

    /// # Errors
    ///
    /// Returns a [`DeviceFault`] when the stream has no fresh sample.
    fn read(&self, out: &mut [f64]) -> Result<(), DeviceFault>;
}

/// Legacy per-device analog stream (6 channels for a force/torque sensor).
pub trait AnalogSensor: Send + Sync {
    fn channels(&self) -> usize;

    /// # Errors
    ///
    /// Returns a [`DeviceFault`] when the stream has no fresh sample.
    fn read(&self, out: &mut [f64]) -> Result<(), DeviceFault>;
}

/// Aggregate view multiplexing many named instances of one category behind
/// a single accessor.
pub trait MultipleAnalogSensors: Send + Sync {
    fn sensor_count(&self) -> usize;

    /// Name of the instance at `index`, or `None` when it cannot be queried.
    fn sensor_name(&self, index: usize) -> Option<String>;

    /// Fill `out` with the measurement of instance `index` and return its
    /// timestamp in seconds.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceFault`] when the instance cannot be read.
    fn measure(&self, index: usize, out: &mut [f64]) -> Result<f64, DeviceFault>;
}

/// Colour frame source.
pub trait FrameGrabber: Send + Sync {
    /// Live `(width, height)` of the frames this source produces.
    fn frame_size(&self) -> (usize, usize);

    /// Copy the latest frame into `frame` (`height` rows by `width` columns).
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceFault`] when no frame is available.
    fn grab(&self, frame: &mut DMatrix<f64>) -> Result<(), DeviceFault>;
}

/// Depth frame source.
pub trait DepthSensor: Send + Sync {
    /// Live `(width, height)` of the depth frames.
    fn depth_size(&self) -> (usize, usize);

    /// Copy the latest depth frame into `frame` (`height` rows by `width`
    /// columns).
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceFault`] when no frame is available.
    fn grab_depth(&self, frame: &mut DMatrix<f64>) -> Result<(), DeviceFault>;
}

// ────────────────────────────────────────────────────────────────────────────
// Driver
// ────────────────────────────────────────────────────────────────────────────

/// An opened device.  One resolver per [`CapabilityKind`]; each returns
/// `None` when the device does not implement that view.
///
/// Every `Arc` a resolver returns must also be held by the driver itself
/// for as long as the device is open.  The bridge keeps only a `Weak`
/// reference, so a view built fresh on each call is dropped as soon as
/// attachment finishes and is reported as
/// [`BridgeError::CapabilityUnavailable`](sensorbridge_types::BridgeError::CapabilityUnavailable).
pub trait Driver: Send + Sync {
    fn axis_info(&self) -> Option<Arc<dyn AxisInfo>> {
        None
    }

    fn encoders_timed(&self) -> Option<Arc<dyn EncodersTimed>> {
        None
    }

    fn generic_sensor(&self) -> Option<Arc<dyn GenericSensor>> {
        None
    }

    fn analog_sensor(&self) -> Option<Arc<dyn AnalogSensor>> {
        None
    }

    fn three_axis_linear_accelerometers(&self) -> Option<Arc<dyn MultipleAnalogSensors>> {
        None
    }

    fn three_axis_gyroscopes(&self) -> Option<Arc<dyn MultipleAnalogSensors>> {
        None
    }

    fn three_axis_magnetometers(&self) -> Option<Arc<dyn MultipleAnalogSensors>> {
        None
    }

    fn orientation_sensors(&self) -> Option<Arc<dyn MultipleAnalogSensors>> {
        None
    }

    fn six_axis_force_torque_sensors(&self) -> Option<Arc<dyn MultipleAnalogSensors>> {
        None
    }

    fn frame_grabber(&self) -> Option<Arc<dyn FrameGrabber>> {
        None
    }

    fn depth_sensor(&self) -> Option<Arc<dyn DepthSensor>> {
        None
    }
}

/// A device supplied by the driver-enumeration layer: a unique key plus the
/// opened driver.
#[derive(Clone)]
pub struct DeviceHandle {
    key: String,
    driver: Arc<dyn Driver>,
}

impl DeviceHandle {
    pub fn new(key: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        Self {
            key: key.into(),
            driver,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// Whether the device exposes `kind`.
    pub fn supports(&self, kind: CapabilityKind) -> bool {
        let d = self.driver();
        match kind {
            CapabilityKind::AxisInfo => d.axis_info().is_some(),
            CapabilityKind::EncodersTimed => d.encoders_timed().is_some(),
            CapabilityKind::GenericSensor => d.generic_sensor().is_some(),
            CapabilityKind::AnalogSensor => d.analog_sensor().is_some(),
            CapabilityKind::FrameGrabber => d.frame_grabber().is_some(),
            CapabilityKind::DepthSensor => d.depth_sensor().is_some(),
            aggregate => resolve_aggregate(self, aggregate).is_some(),
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle").field("key", &self.key).finish()
    }
}

/// Resolve one of the aggregate kinds on `handle`.  Non-aggregate kinds
/// always resolve to `None`.
pub fn resolve_aggregate(
    handle: &DeviceHandle,
    kind: CapabilityKind,
) -> Option<Arc<dyn MultipleAnalogSensors>> {
    let d = handle.driver();
    match kind {
        CapabilityKind::ThreeAxisLinearAccelerometers => d.three_axis_linear_accelerometers(),
        CapabilityKind::ThreeAxisGyroscopes => d.three_axis_gyroscopes(),
        CapabilityKind::ThreeAxisMagnetometers => d.three_axis_magnetometers(),
        CapabilityKind::OrientationSensors => d.orientation_sensors(),
        CapabilityKind::SixAxisForceTorqueSensors => d.six_axis_force_torque_sensors(),
        _ => None,
    }
}

/// Non-owning binding to a capability view.
pub(crate) struct Bound<V: ?Sized> {
    view: Weak<V>,
}

impl<V: ?Sized> Clone for Bound<V> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
        }
    }
}

impl<V: ?Sized> Bound<V> {
    pub(crate) fn new(view: &Arc<V>) -> Self {
        Self {
            view: Arc::downgrade(view),
        }
    }

    /// Bind `view`, giving up the caller's reference.  `None` when nothing
    /// else keeps the view alive.
    pub(crate) fn retain(view: Arc<V>) -> Option<Self> {
        let bound = Self::new(&view);
        drop(view);
        bound.upgrade().is_some().then_some(bound)
    }

    /// The view, if its driver is still open.
    pub(crate) fn upgrade(&self) -> Option<Arc<V>> {
        self.view.upgrade()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gyros;

    impl MultipleAnalogSensors for Gyros {
        fn sensor_count(&self) -> usize {
            1
        }
        fn sensor_name(&self, index: usize) -> Option<String> {
            (index == 0).then(|| "r_leg_ft_gyro".to_string())
        }
        fn measure(&self, _index: usize, out: &mut [f64]) -> Result<f64, DeviceFault> {
            out.fill(0.5);
            Ok(1.0)
        }
    }

    struct GyroDevice {
        gyros: Arc<Gyros>,
    }

    impl Driver for GyroDevice {
        fn three_axis_gyroscopes(&self) -> Option<Arc<dyn MultipleAnalogSensors>> {
            Some(self.gyros.clone())
        }
    }

    #[test]
    fn default_resolvers_report_absent_views() {
        let handle = DeviceHandle::new(
            "inertials",
            Arc::new(GyroDevice {
                gyros: Arc::new(Gyros),
            }),
        );
        assert!(handle.supports(CapabilityKind::ThreeAxisGyroscopes));
        assert!(!handle.supports(CapabilityKind::ThreeAxisMagnetometers));
        assert!(!handle.supports(CapabilityKind::GenericSensor));
        assert!(!handle.supports(CapabilityKind::EncodersTimed));
    }

    #[test]
    fn resolve_aggregate_ignores_non_aggregate_kinds() {
        let handle = DeviceHandle::new(
            "inertials",
            Arc::new(GyroDevice {
                gyros: Arc::new(Gyros),
            }),
        );
        assert!(resolve_aggregate(&handle, CapabilityKind::FrameGrabber).is_none());
        let view = resolve_aggregate(&handle, CapabilityKind::ThreeAxisGyroscopes).unwrap();
        assert_eq!(view.sensor_name(0).as_deref(), Some("r_leg_ft_gyro"));
    }

    #[test]
    fn bound_view_does_not_outlive_driver() {
        let gyros = Arc::new(Gyros);
        let view: Arc<dyn MultipleAnalogSensors> = gyros.clone();
        let bound = Bound::new(&view);
        assert!(bound.upgrade().is_some());

        drop(view);
        drop(gyros);
        assert!(bound.upgrade().is_none());
    }

    #[test]
    fn retain_rejects_views_nobody_else_holds() {
        let fresh: Arc<dyn MultipleAnalogSensors> = Arc::new(Gyros);
        assert!(Bound::retain(fresh).is_none());

        let owned = Arc::new(Gyros);
        let view: Arc<dyn MultipleAnalogSensors> = owned.clone();
        let bound = Bound::retain(view).unwrap();
        assert!(bound.upgrade().is_some());
    }
}
