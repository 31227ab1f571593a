use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Class of physical sensing modality the bridge knows how to attach and poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SensorCategory {
    /// Joint encoders read through a remapped control board.
    Joints,
    /// 12-channel inertial unit exposed through a generic sensor view.
    Imu,
    LinearAccelerometer,
    Gyroscope,
    OrientationSensor,
    Magnetometer,
    /// Six-axis force/torque sensor, reachable through either the aggregate
    /// view or the legacy analog view.
    SixAxisForceTorque,
    /// 6-channel wrench stream exposed through a generic sensor view.
    CartesianWrench,
    RgbCamera,
    DepthCamera,
}

impl SensorCategory {
    /// Every category, in the order the bridge attaches them.
    pub const ALL: [SensorCategory; 10] = [
        SensorCategory::Joints,
        SensorCategory::Imu,
        SensorCategory::LinearAccelerometer,
        SensorCategory::Gyroscope,
        SensorCategory::OrientationSensor,
        SensorCategory::Magnetometer,
        SensorCategory::SixAxisForceTorque,
        SensorCategory::CartesianWrench,
        SensorCategory::RgbCamera,
        SensorCategory::DepthCamera,
    ];

    /// Prefix of the `<prefix>_enable` / `<prefix>_list` configuration keys.
    pub fn config_prefix(self) -> &'static str {
        match self {
            SensorCategory::Joints => "joints",
            SensorCategory::Imu => "imu",
            SensorCategory::LinearAccelerometer => "accelerometers",
            SensorCategory::Gyroscope => "gyroscopes",
            SensorCategory::OrientationSensor => "orientation_sensors",
            SensorCategory::Magnetometer => "magnetometers",
            SensorCategory::SixAxisForceTorque => "sixaxis_forcetorque_sensors",
            SensorCategory::CartesianWrench => "cartesian_wrenches",
            SensorCategory::RgbCamera => "rgb_cameras",
            SensorCategory::DepthCamera => "depth_cameras",
        }
    }

    /// Number of channels one instance of this category produces, or `None`
    /// for categories whose shape comes from configuration (joints, cameras).
    pub fn channel_count(self) -> Option<usize> {
        match self {
            SensorCategory::Imu => Some(12),
            SensorCategory::LinearAccelerometer
            | SensorCategory::Gyroscope
            | SensorCategory::OrientationSensor
            | SensorCategory::Magnetometer => Some(3),
            SensorCategory::SixAxisForceTorque | SensorCategory::CartesianWrench => Some(6),
            SensorCategory::Joints | SensorCategory::RgbCamera | SensorCategory::DepthCamera => {
                None
            }
        }
    }

    pub fn is_camera(self) -> bool {
        matches!(self, SensorCategory::RgbCamera | SensorCategory::DepthCamera)
    }
}

impl fmt::Display for SensorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorCategory::Joints => "joints",
            SensorCategory::Imu => "imu",
            SensorCategory::LinearAccelerometer => "linear accelerometer",
            SensorCategory::Gyroscope => "gyroscope",
            SensorCategory::OrientationSensor => "orientation sensor",
            SensorCategory::Magnetometer => "magnetometer",
            SensorCategory::SixAxisForceTorque => "six-axis force/torque",
            SensorCategory::CartesianWrench => "cartesian wrench",
            SensorCategory::RgbCamera => "rgb camera",
            SensorCategory::DepthCamera => "depth camera",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a sensor bridge.
///
/// ```text
/// Uninitialized --initialize--> Initialized --attach ok--> Attached
///                                    ^  \--attach err--> Invalid
///                                    |                      |
///                                    +-------- reset -------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeState {
    Uninitialized,
    Initialized,
    Attached,
    Invalid,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Uninitialized => "uninitialized",
            BridgeState::Initialized => "initialized",
            BridgeState::Attached => "attached",
            BridgeState::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// Shape of one measurement buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    Channels(usize),
    Image { width: usize, height: usize },
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Channels(n) => write!(f, "{n} channels"),
            Shape::Image { width, height } => write!(f, "{width}x{height} image"),
        }
    }
}

/// Every failure the bridge can report, from configuration through polling.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Configuration Missing: required parameter \"{key}\" is not available")]
    ConfigurationMissing { key: String },

    #[error("Configuration Size Mismatch: \"{key}\" has {found} entries, expected {expected}")]
    ConfigurationSizeMismatch {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("Configuration Invalid: \"{key}\": {details}")]
    ConfigurationInvalid { key: String, details: String },

    #[error("Device Not Found: {category} '{name}' is not in the device list")]
    DeviceNotFound {
        category: SensorCategory,
        name: String,
    },

    #[error("Capability Unavailable: {category} view could not be obtained{}", instance_suffix(.name))]
    CapabilityUnavailable {
        category: SensorCategory,
        name: Option<String>,
    },

    #[error("Shape Mismatch on {category} '{name}': expected {expected}, device reports {found}")]
    ShapeMismatch {
        category: SensorCategory,
        name: String,
        expected: Shape,
        found: Shape,
    },

    #[error("Count Mismatch: bound {bound} {category} instances, expected {expected}")]
    CountMismatch {
        category: SensorCategory,
        expected: usize,
        bound: usize,
    },

    #[error("Remap Failure: joint '{joint}' is not reported by the control board")]
    RemapFailure { joint: String },

    #[error("Not Ready: {operation} is not valid while the bridge is {state}")]
    NotReady {
        operation: String,
        state: BridgeState,
    },

    #[error("Unknown Instance: {category} '{name}' is not configured")]
    UnknownInstance {
        category: SensorCategory,
        name: String,
    },

    #[error("Read Failed on {category} '{name}': {details}")]
    ReadFailed {
        category: SensorCategory,
        name: String,
        details: String,
    },
}

impl BridgeError {
    /// The category the failure refers to, when it refers to one.
    pub fn category(&self) -> Option<SensorCategory> {
        match self {
            BridgeError::DeviceNotFound { category, .. }
            | BridgeError::CapabilityUnavailable { category, .. }
            | BridgeError::ShapeMismatch { category, .. }
            | BridgeError::CountMismatch { category, .. }
            | BridgeError::UnknownInstance { category, .. }
            | BridgeError::ReadFailed { category, .. } => Some(*category),
            BridgeError::RemapFailure { .. } => Some(SensorCategory::Joints),
            BridgeError::ConfigurationMissing { .. }
            | BridgeError::ConfigurationSizeMismatch { .. }
            | BridgeError::ConfigurationInvalid { .. }
            | BridgeError::NotReady { .. } => None,
        }
    }
}

fn instance_suffix(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" for '{name}'"),
        None => String::new(),
    }
}
