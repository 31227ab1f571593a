//! Attachment strategies: one discovery-and-binding algorithm per transport.
//!
//! | Strategy | Categories | Unmatched expected name |
//! |---|---|---|
//! | control board | joints | fatal ([`BridgeError::RemapFailure`]) |
//! | channel sensors (generic / analog) | imu, cartesian wrench, legacy force/torque | fatal ([`BridgeError::DeviceNotFound`]) |
//! | aggregate, strict | accelerometers, gyroscopes, orientation, magnetometers | fatal ([`BridgeError::DeviceNotFound`]) |
//! | aggregate, reconciled | six-axis force/torque | routed to the legacy analog strategy |
//! | cameras | rgb, depth | fatal ([`BridgeError::DeviceNotFound`]) |
//!
//! Every strategy writes into an [`Attachment`] built fresh for one attempt.
//! The bridge only keeps it when every enabled category succeeded, so a
//! failed attempt leaves nothing behind.

use std::collections::BTreeMap;
use std::sync::Arc;

use sensorbridge_types::{BridgeError, SensorCategory, Shape};
use tracing::{debug, info, warn};

use crate::buffers::MeasurementStore;
use crate::capability::{
    AnalogSensor, Bound, CapabilityKind, DepthSensor, DeviceHandle, EncodersTimed, FrameGrabber,
    GenericSensor, MultipleAnalogSensors, resolve_aggregate,
};
use crate::config::{CategoryOptions, SensorBridgeConfig};
use crate::reconcile::partition_transports;
use crate::remap::JointRemapIndex;

/// Which transport serves a six-axis force/torque sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Aggregate,
    LegacyAnalog,
}

/// Instance name → bound accessor, for one category.
pub(crate) struct AttachmentRecord<B> {
    entries: BTreeMap<String, B>,
}

impl<B> Default for AttachmentRecord<B> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<B> AttachmentRecord<B> {
    fn insert(&mut self, name: &str, binding: B) {
        self.entries.insert(name.to_string(), binding);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &B)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// One instance inside an aggregate view.
pub(crate) struct AggregateBinding {
    pub(crate) view: Bound<dyn MultipleAnalogSensors>,
    pub(crate) index: usize,
}

pub(crate) struct ControlBoardBinding {
    pub(crate) encoders: Bound<dyn EncodersTimed>,
    pub(crate) remap: JointRemapIndex,
    /// Scratch buffers in the board's own axis order.
    pub(crate) raw_positions: Vec<f64>,
    pub(crate) raw_velocities: Vec<f64>,
}

/// Everything bound by one successful attachment attempt.
#[derive(Default)]
pub(crate) struct Attachment {
    pub(crate) control_board: Option<ControlBoardBinding>,
    pub(crate) imus: AttachmentRecord<Bound<dyn GenericSensor>>,
    pub(crate) cartesian_wrenches: AttachmentRecord<Bound<dyn GenericSensor>>,
    pub(crate) analog_force_torque: AttachmentRecord<Bound<dyn AnalogSensor>>,
    pub(crate) aggregates: BTreeMap<SensorCategory, AttachmentRecord<AggregateBinding>>,
    pub(crate) rgb_cameras: AttachmentRecord<Bound<dyn FrameGrabber>>,
    pub(crate) depth_cameras: AttachmentRecord<Bound<dyn DepthSensor>>,
    pub(crate) store: MeasurementStore,
}

const STRICT_AGGREGATES: [(SensorCategory, CapabilityKind); 4] = [
    (
        SensorCategory::LinearAccelerometer,
        CapabilityKind::ThreeAxisLinearAccelerometers,
    ),
    (SensorCategory::Gyroscope, CapabilityKind::ThreeAxisGyroscopes),
    (SensorCategory::OrientationSensor, CapabilityKind::OrientationSensors),
    (SensorCategory::Magnetometer, CapabilityKind::ThreeAxisMagnetometers),
];

impl Attachment {
    /// Run every enabled category's strategy against `devices`.
    ///
    /// # Errors
    ///
    /// The first failing category's error; nothing bound so far is kept.
    pub(crate) fn attach(
        config: &SensorBridgeConfig,
        devices: &[DeviceHandle],
    ) -> Result<Self, BridgeError> {
        let mut attachment = Attachment::default();
        let store = &mut attachment.store;

        if config.is_enabled(SensorCategory::Joints) {
            let joints = config.expected(SensorCategory::Joints);
            attachment.control_board = Some(attach_control_board(devices, joints, store)?);
            info!(category = %SensorCategory::Joints, joints = joints.len(), "attached");
        }

        if config.is_enabled(SensorCategory::Imu) {
            attachment.imus = attach_channel_sensors(
                devices,
                SensorCategory::Imu,
                config.expected(SensorCategory::Imu),
                |h: &DeviceHandle| h.driver().generic_sensor(),
                |v: &(dyn GenericSensor + 'static)| v.channels(),
                store,
            )?;
            log_attached(SensorCategory::Imu, attachment.imus.len());
        }

        // Inertial aggregates are strict: every configured name must be
        // reported by the aggregate view.
        for (category, kind) in STRICT_AGGREGATES {
            if !config.is_enabled(category) {
                continue;
            }
            let (key, view) = find_aggregate(devices, kind).ok_or(
                BridgeError::CapabilityUnavailable {
                    category,
                    name: None,
                },
            )?;
            debug!(category = %category, device = %key, "found aggregate view");
            let available = enumerate_aggregate(category, view.as_ref());
            let view = retain(category, None, view)?;
            let record = bind_aggregate(
                category,
                &view,
                &available,
                config.expected(category),
                store,
            )?;
            log_attached(category, record.len());
            attachment.aggregates.insert(category, record);
        }

        if config.is_enabled(SensorCategory::SixAxisForceTorque) {
            let (aggregate, analog) = attach_force_torque(
                devices,
                config.expected(SensorCategory::SixAxisForceTorque),
                store,
            )?;
            log_attached(SensorCategory::SixAxisForceTorque, aggregate.len() + analog.len());
            attachment
                .aggregates
                .insert(SensorCategory::SixAxisForceTorque, aggregate);
            attachment.analog_force_torque = analog;
        }

        if config.is_enabled(SensorCategory::CartesianWrench) {
            attachment.cartesian_wrenches = attach_channel_sensors(
                devices,
                SensorCategory::CartesianWrench,
                config.expected(SensorCategory::CartesianWrench),
                |h: &DeviceHandle| h.driver().generic_sensor(),
                |v: &(dyn GenericSensor + 'static)| v.channels(),
                store,
            )?;
            log_attached(SensorCategory::CartesianWrench, attachment.cartesian_wrenches.len());
        }

        if config.is_enabled(SensorCategory::RgbCamera) {
            attachment.rgb_cameras = attach_cameras(
                devices,
                SensorCategory::RgbCamera,
                config.category(SensorCategory::RgbCamera),
                |h: &DeviceHandle| h.driver().frame_grabber(),
                store,
            )?;
            log_attached(SensorCategory::RgbCamera, attachment.rgb_cameras.len());
        }

        if config.is_enabled(SensorCategory::DepthCamera) {
            attachment.depth_cameras = attach_cameras(
                devices,
                SensorCategory::DepthCamera,
                config.category(SensorCategory::DepthCamera),
                |h: &DeviceHandle| h.driver().depth_sensor(),
                store,
            )?;
            log_attached(SensorCategory::DepthCamera, attachment.depth_cameras.len());
        }

        Ok(attachment)
    }

    /// Names bound for `category`, sorted.
    pub(crate) fn bound_names(&self, category: SensorCategory) -> Vec<String> {
        let mut names: Vec<String> = match category {
            SensorCategory::Joints => Vec::new(),
            SensorCategory::Imu => self.imus.names().map(str::to_string).collect(),
            SensorCategory::CartesianWrench => {
                self.cartesian_wrenches.names().map(str::to_string).collect()
            }
            SensorCategory::RgbCamera => self.rgb_cameras.names().map(str::to_string).collect(),
            SensorCategory::DepthCamera => {
                self.depth_cameras.names().map(str::to_string).collect()
            }
            SensorCategory::SixAxisForceTorque => self
                .aggregate_names(category)
                .chain(self.analog_force_torque.names())
                .map(str::to_string)
                .collect(),
            aggregate => self.aggregate_names(aggregate).map(str::to_string).collect(),
        };
        names.sort();
        names
    }

    fn aggregate_names(&self, category: SensorCategory) -> impl Iterator<Item = &str> {
        self.aggregates
            .get(&category)
            .into_iter()
            .flat_map(|record| record.names())
    }

    pub(crate) fn force_torque_transport(&self, name: &str) -> Option<Transport> {
        let via_aggregate = self
            .aggregates
            .get(&SensorCategory::SixAxisForceTorque)
            .is_some_and(|record| record.contains(name));
        if via_aggregate {
            Some(Transport::Aggregate)
        } else if self.analog_force_torque.contains(name) {
            Some(Transport::LegacyAnalog)
        } else {
            None
        }
    }
}

fn log_attached(category: SensorCategory, instances: usize) {
    info!(category = %category, instances, "attached");
}

/// Channel count of a fixed-shape category.  Only called for categories
/// that have one.
fn fixed_channels(category: SensorCategory) -> usize {
    category.channel_count().unwrap_or_default()
}

/// Bind `view` without owning it.  A view the driver does not hold itself
/// would be gone before the first poll, so it counts as unavailable.
fn retain<V: ?Sized>(
    category: SensorCategory,
    name: Option<&str>,
    view: Arc<V>,
) -> Result<Bound<V>, BridgeError> {
    Bound::retain(view).ok_or_else(|| BridgeError::CapabilityUnavailable {
        category,
        name: name.map(str::to_string),
    })
}

/// Fail unless `record` holds exactly the `expected` names.
fn check_complete<B>(
    category: SensorCategory,
    expected: &[String],
    record: &AttachmentRecord<B>,
) -> Result<(), BridgeError> {
    if record.len() == expected.len() {
        return Ok(());
    }
    if let Some(missing) = expected.iter().find(|name| !record.contains(name)) {
        return Err(BridgeError::DeviceNotFound {
            category,
            name: missing.clone(),
        });
    }
    // Every expected name is bound, so the list itself repeats a name.
    Err(BridgeError::CountMismatch {
        category,
        expected: expected.len(),
        bound: record.len(),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Control board
// ────────────────────────────────────────────────────────────────────────────

/// Bind the first device exposing both axis names and timed encoders.
///
/// Devices that split the two views across separate handles are never
/// matched.
fn attach_control_board(
    devices: &[DeviceHandle],
    joints: &[String],
    store: &mut MeasurementStore,
) -> Result<ControlBoardBinding, BridgeError> {
    let (key, axis, encoders) = devices
        .iter()
        .find_map(|h| {
            let driver = h.driver();
            Some((h.key(), driver.axis_info()?, driver.encoders_timed()?))
        })
        .ok_or(BridgeError::CapabilityUnavailable {
            category: SensorCategory::Joints,
            name: None,
        })?;
    debug!(device = %key, "found control board");

    store.allocate_joints(joints.len());

    let axes = encoders.axes();
    let live = (0..axes)
        .map(|i| {
            let name = axis.axis_name(i);
            if name.is_none() {
                warn!(device = %key, axis = i, "control board axis has no name");
            }
            name.ok_or_else(|| BridgeError::CapabilityUnavailable {
                category: SensorCategory::Joints,
                name: Some(key.to_string()),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let remap = JointRemapIndex::build(joints, &live)?;
    // Both views may share one allocation.
    drop(axis);

    Ok(ControlBoardBinding {
        encoders: retain(SensorCategory::Joints, Some(key), encoders)?,
        remap,
        raw_positions: vec![0.0; axes],
        raw_velocities: vec![0.0; axes],
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Generic / analog channel sensors
// ────────────────────────────────────────────────────────────────────────────

/// Bind each expected name to the device with the same key, checking the
/// live channel count against `category`'s fixed count.
fn attach_channel_sensors<V: ?Sized>(
    devices: &[DeviceHandle],
    category: SensorCategory,
    expected: &[String],
    resolve: impl Fn(&DeviceHandle) -> Option<Arc<V>>,
    live_channels: impl Fn(&V) -> usize,
    store: &mut MeasurementStore,
) -> Result<AttachmentRecord<Bound<V>>, BridgeError> {
    let channels = fixed_channels(category);
    let mut record = AttachmentRecord::default();

    for name in expected {
        let Some(handle) = devices.iter().find(|h| h.key() == name) else {
            continue;
        };
        let view = resolve(handle).ok_or_else(|| BridgeError::CapabilityUnavailable {
            category,
            name: Some(name.clone()),
        })?;
        let found = live_channels(&*view);
        if found != channels {
            return Err(BridgeError::ShapeMismatch {
                category,
                name: name.clone(),
                expected: Shape::Channels(channels),
                found: Shape::Channels(found),
            });
        }
        record.insert(name, retain(category, Some(name), view)?);
    }

    check_complete(category, expected, &record)?;
    for name in record.names() {
        store.allocate_vector(category, name, channels);
    }
    Ok(record)
}

// ────────────────────────────────────────────────────────────────────────────
// Aggregates
// ────────────────────────────────────────────────────────────────────────────

/// First device exposing `kind`, with its key.
fn find_aggregate<'a>(
    devices: &'a [DeviceHandle],
    kind: CapabilityKind,
) -> Option<(&'a str, Arc<dyn MultipleAnalogSensors>)> {
    devices
        .iter()
        .find_map(|h| resolve_aggregate(h, kind).map(|view| (h.key(), view)))
}

/// `(index, name)` of every instance the aggregate can name.
fn enumerate_aggregate(
    category: SensorCategory,
    view: &dyn MultipleAnalogSensors,
) -> Vec<(usize, String)> {
    (0..view.sensor_count())
        .filter_map(|index| {
            let name = view.sensor_name(index);
            if name.is_none() {
                warn!(category = %category, index, "aggregate instance has no name");
            }
            name.map(|name| (index, name))
        })
        .collect()
}

/// Bind every `expected` name to its index in `available`.  Unmatched names
/// are fatal; instances nobody asked for are ignored.
fn bind_aggregate(
    category: SensorCategory,
    view: &Bound<dyn MultipleAnalogSensors>,
    available: &[(usize, String)],
    expected: &[String],
    store: &mut MeasurementStore,
) -> Result<AttachmentRecord<AggregateBinding>, BridgeError> {
    let mut record = AttachmentRecord::default();

    for name in expected {
        let index = available
            .iter()
            .find(|(_, candidate)| candidate == name)
            .map(|(index, _)| *index)
            .ok_or_else(|| BridgeError::DeviceNotFound {
                category,
                name: name.clone(),
            })?;
        record.insert(
            name,
            AggregateBinding {
                view: view.clone(),
                index,
            },
        );
    }

    for (_, extra) in available.iter().filter(|(_, n)| !record.contains(n)) {
        debug!(category = %category, instance = %extra, "aggregate instance not configured");
    }

    check_complete(category, expected, &record)?;
    let channels = fixed_channels(category);
    for name in record.names() {
        store.allocate_vector(category, name, channels);
    }
    Ok(record)
}

/// Split the configured force/torque list between the aggregate view (if
/// any) and legacy analog devices, then bind both halves.
#[allow(clippy::type_complexity)]
fn attach_force_torque(
    devices: &[DeviceHandle],
    expected: &[String],
    store: &mut MeasurementStore,
) -> Result<
    (
        AttachmentRecord<AggregateBinding>,
        AttachmentRecord<Bound<dyn AnalogSensor>>,
    ),
    BridgeError,
> {
    let category = SensorCategory::SixAxisForceTorque;

    // No aggregate is a valid topology: everything goes through analog.
    let aggregate = match find_aggregate(devices, CapabilityKind::SixAxisForceTorqueSensors) {
        Some((key, view)) => {
            let available = enumerate_aggregate(category, view.as_ref());
            debug!(device = %key, instances = available.len(), "found force/torque aggregate");
            Some((retain(category, None, view)?, available))
        }
        None => None,
    };

    let aggregate_names: Option<Vec<String>> = aggregate
        .as_ref()
        .map(|(_, available)| available.iter().map(|(_, n)| n.clone()).collect());
    let split = partition_transports(aggregate_names.as_deref(), expected);
    info!(
        aggregate = ?split.aggregate,
        legacy = ?split.legacy,
        "reconciled force/torque transports"
    );
    if aggregate.is_some() && !split.legacy.is_empty() {
        warn!(
            legacy = ?split.legacy,
            "force/torque sensors not reported by the aggregate fall back to analog"
        );
    }

    let aggregate_record = match &aggregate {
        Some((view, available)) => bind_aggregate(category, view, available, &split.aggregate, store)?,
        None => AttachmentRecord::default(),
    };

    let analog_record = attach_channel_sensors(
        devices,
        category,
        &split.legacy,
        |h: &DeviceHandle| h.driver().analog_sensor(),
        |v: &(dyn AnalogSensor + 'static)| v.channels(),
        store,
    )?;

    let bound = aggregate_record.len() + analog_record.len();
    if bound != expected.len() {
        return Err(BridgeError::CountMismatch {
            category,
            expected: expected.len(),
            bound,
        });
    }

    Ok((aggregate_record, analog_record))
}

// ────────────────────────────────────────────────────────────────────────────
// Cameras
// ────────────────────────────────────────────────────────────────────────────

/// Bind each configured camera by key, then allocate one image buffer per
/// camera from its configured shape.  Every shape is looked up before any
/// buffer is allocated.
fn attach_cameras<V: ?Sized>(
    devices: &[DeviceHandle],
    category: SensorCategory,
    options: &CategoryOptions,
    resolve: impl Fn(&DeviceHandle) -> Option<Arc<V>>,
    store: &mut MeasurementStore,
) -> Result<AttachmentRecord<Bound<V>>, BridgeError> {
    let expected = &options.instances;
    let mut record = AttachmentRecord::default();

    for name in expected {
        let Some(handle) = devices.iter().find(|h| h.key() == name) else {
            continue;
        };
        let view = resolve(handle).ok_or_else(|| BridgeError::CapabilityUnavailable {
            category,
            name: Some(name.clone()),
        })?;
        record.insert(name, retain(category, Some(name), view)?);
    }

    check_complete(category, expected, &record)?;

    let dimensions = expected
        .iter()
        .map(|name| {
            options
                .image_dimensions
                .get(name)
                .map(|dims| (name, *dims))
                .ok_or_else(|| BridgeError::ConfigurationMissing {
                    key: format!("{}.image_dimensions.{name}", category.config_prefix()),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    for (name, dims) in dimensions {
        store.allocate_image(category, name, dims.width, dims.height);
    }
    Ok(record)
}
