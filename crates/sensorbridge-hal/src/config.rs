//! Sensor bridge configuration: the key/value accessor contract and the typed
//! model built from it.
//!
//! # Keys
//!
//! | Key | Type | Effect |
//! |---|---|---|
//! | `<prefix>_enable` | bool | turns a category on; absence ⇒ disabled |
//! | `<prefix>_list` | string list | expected instance names (`joints_list` is the canonical joint order) |
//! | `rgb_image_width`, `rgb_image_height` | int list | per-camera shape, matched by position with `rgb_cameras_list` |
//! | `depth_image_width`, `depth_image_height` | int list | same, for `depth_cameras_list` |
//! | `sensor_dry_run` | bool | poll once right after attaching |
//!
//! `<prefix>` is [`SensorCategory::config_prefix`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use schemars::JsonSchema;
use sensorbridge_types::{BridgeError, SensorCategory};
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Accessor contract
// ────────────────────────────────────────────────────────────────────────────

/// Read-only key/value source the configuration model is built from.
///
/// Every getter returns `Ok(None)` when the key is absent and
/// [`BridgeError::ConfigurationInvalid`] when it is present with the wrong
/// type.
pub trait ParametersHandler {
    fn get_bool(&self, key: &str) -> Result<Option<bool>, BridgeError>;
    fn get_string_list(&self, key: &str) -> Result<Option<Vec<String>>, BridgeError>;
    fn get_int_list(&self, key: &str) -> Result<Option<Vec<i64>>, BridgeError>;
}

/// [`ParametersHandler`] backed by a parsed TOML document.
#[derive(Debug, Clone, Default)]
pub struct TomlParameters {
    table: toml::Table,
}

impl TomlParameters {
    pub fn new(table: toml::Table) -> Self {
        Self { table }
    }

    /// Load parameters from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
        raw.parse::<Self>()
            .map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))
    }
}

impl FromStr for TomlParameters {
    type Err = toml::de::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(toml::from_str(raw)?))
    }
}

fn invalid(key: &str, details: impl Into<String>) -> BridgeError {
    BridgeError::ConfigurationInvalid {
        key: key.to_string(),
        details: details.into(),
    }
}

impl ParametersHandler for TomlParameters {
    fn get_bool(&self, key: &str) -> Result<Option<bool>, BridgeError> {
        match self.table.get(key) {
            None => Ok(None),
            Some(toml::Value::Boolean(b)) => Ok(Some(*b)),
            // Integer flags (0 / 1) are accepted for older configuration files.
            Some(toml::Value::Integer(i)) => Ok(Some(*i != 0)),
            Some(other) => Err(invalid(key, format!("expected a boolean, found {}", other.type_str()))),
        }
    }

    fn get_string_list(&self, key: &str) -> Result<Option<Vec<String>>, BridgeError> {
        let Some(value) = self.table.get(key) else {
            return Ok(None);
        };
        let array = value
            .as_array()
            .ok_or_else(|| invalid(key, format!("expected a list, found {}", value.type_str())))?;
        array
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(key, "list entries must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn get_int_list(&self, key: &str) -> Result<Option<Vec<i64>>, BridgeError> {
        let Some(value) = self.table.get(key) else {
            return Ok(None);
        };
        let array = value
            .as_array()
            .ok_or_else(|| invalid(key, format!("expected a list, found {}", value.type_str())))?;
        array
            .iter()
            .map(|v| {
                v.as_integer()
                    .ok_or_else(|| invalid(key, "list entries must be integers"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Typed model
// ────────────────────────────────────────────────────────────────────────────

/// Configured shape of one camera stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImageDimensions {
    pub width: usize,
    pub height: usize,
}

/// Options of a single sensor category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryOptions {
    pub enabled: bool,
    /// Expected instance names, in configuration order.  Empty when disabled.
    #[serde(default)]
    pub instances: Vec<String>,
    /// Per-camera frame shape.  Only populated for camera categories.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub image_dimensions: BTreeMap<String, ImageDimensions>,
}

/// Which categories the bridge streams and which instances it expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SensorBridgeConfig {
    pub joints: CategoryOptions,
    pub imus: CategoryOptions,
    pub linear_accelerometers: CategoryOptions,
    pub gyroscopes: CategoryOptions,
    pub orientation_sensors: CategoryOptions,
    pub magnetometers: CategoryOptions,
    pub six_axis_force_torque_sensors: CategoryOptions,
    pub cartesian_wrenches: CategoryOptions,
    pub rgb_cameras: CategoryOptions,
    pub depth_cameras: CategoryOptions,
    /// Poll every bound buffer once right after attaching.
    #[serde(default)]
    pub sensor_dry_run: bool,
}

impl SensorBridgeConfig {
    /// Build the model from a parameter source.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::ConfigurationMissing`] – an enabled category has no
    ///   instance list, or an enabled camera category has no width/height list.
    /// - [`BridgeError::ConfigurationSizeMismatch`] – a width/height list does
    ///   not have one entry per camera.
    /// - [`BridgeError::ConfigurationInvalid`] – a key has the wrong type or a
    ///   dimension is negative.
    pub fn from_parameters(params: &dyn ParametersHandler) -> Result<Self, BridgeError> {
        let mut config = Self {
            sensor_dry_run: params.get_bool("sensor_dry_run")?.unwrap_or(false),
            ..Self::default()
        };

        for category in SensorCategory::ALL {
            let prefix = category.config_prefix();
            if !params.get_bool(&format!("{prefix}_enable"))?.unwrap_or(false) {
                continue;
            }

            let list_key = format!("{prefix}_list");
            let instances = params
                .get_string_list(&list_key)?
                .ok_or(BridgeError::ConfigurationMissing { key: list_key })?;

            let image_dimensions = match category {
                SensorCategory::RgbCamera => load_image_dimensions(params, "rgb", &instances)?,
                SensorCategory::DepthCamera => load_image_dimensions(params, "depth", &instances)?,
                _ => BTreeMap::new(),
            };

            *config.category_mut(category) = CategoryOptions {
                enabled: true,
                instances,
                image_dimensions,
            };
        }

        Ok(config)
    }

    pub fn category(&self, category: SensorCategory) -> &CategoryOptions {
        match category {
            SensorCategory::Joints => &self.joints,
            SensorCategory::Imu => &self.imus,
            SensorCategory::LinearAccelerometer => &self.linear_accelerometers,
            SensorCategory::Gyroscope => &self.gyroscopes,
            SensorCategory::OrientationSensor => &self.orientation_sensors,
            SensorCategory::Magnetometer => &self.magnetometers,
            SensorCategory::SixAxisForceTorque => &self.six_axis_force_torque_sensors,
            SensorCategory::CartesianWrench => &self.cartesian_wrenches,
            SensorCategory::RgbCamera => &self.rgb_cameras,
            SensorCategory::DepthCamera => &self.depth_cameras,
        }
    }

    fn category_mut(&mut self, category: SensorCategory) -> &mut CategoryOptions {
        match category {
            SensorCategory::Joints => &mut self.joints,
            SensorCategory::Imu => &mut self.imus,
            SensorCategory::LinearAccelerometer => &mut self.linear_accelerometers,
            SensorCategory::Gyroscope => &mut self.gyroscopes,
            SensorCategory::OrientationSensor => &mut self.orientation_sensors,
            SensorCategory::Magnetometer => &mut self.magnetometers,
            SensorCategory::SixAxisForceTorque => &mut self.six_axis_force_torque_sensors,
            SensorCategory::CartesianWrench => &mut self.cartesian_wrenches,
            SensorCategory::RgbCamera => &mut self.rgb_cameras,
            SensorCategory::DepthCamera => &mut self.depth_cameras,
        }
    }

    pub fn is_enabled(&self, category: SensorCategory) -> bool {
        self.category(category).enabled
    }

    /// Expected instance names; empty when the category is disabled.
    pub fn expected(&self, category: SensorCategory) -> &[String] {
        let options = self.category(category);
        if options.enabled {
            options.instances.as_slice()
        } else {
            &[]
        }
    }

    pub fn enabled_categories(&self) -> impl Iterator<Item = SensorCategory> + '_ {
        SensorCategory::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
    }

    /// Enable `category` with the given instance names.
    pub fn with_category<I, S>(mut self, category: SensorCategory, instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = self.category_mut(category);
        options.enabled = true;
        options.instances = instances.into_iter().map(Into::into).collect();
        self
    }

    /// Enable a camera category (if needed) and add `name` with its shape.
    pub fn with_camera(
        mut self,
        category: SensorCategory,
        name: impl Into<String>,
        width: usize,
        height: usize,
    ) -> Self {
        let name = name.into();
        let options = self.category_mut(category);
        options.enabled = true;
        options.instances.push(name.clone());
        options
            .image_dimensions
            .insert(name, ImageDimensions { width, height });
        self
    }

    pub fn with_dry_run(mut self, enabled: bool) -> Self {
        self.sensor_dry_run = enabled;
        self
    }
}

fn load_image_dimensions(
    params: &dyn ParametersHandler,
    kind: &str,
    cameras: &[String],
) -> Result<BTreeMap<String, ImageDimensions>, BridgeError> {
    let width_key = format!("{kind}_image_width");
    let height_key = format!("{kind}_image_height");

    let widths = params
        .get_int_list(&width_key)?
        .ok_or_else(|| BridgeError::ConfigurationMissing {
            key: width_key.clone(),
        })?;
    let heights = params
        .get_int_list(&height_key)?
        .ok_or_else(|| BridgeError::ConfigurationMissing {
            key: height_key.clone(),
        })?;

    for (key, list) in [(&width_key, &widths), (&height_key, &heights)] {
        if list.len() != cameras.len() {
            return Err(BridgeError::ConfigurationSizeMismatch {
                key: key.clone(),
                expected: cameras.len(),
                found: list.len(),
            });
        }
    }

    let to_dim = |key: &str, v: i64| {
        usize::try_from(v).map_err(|_| invalid(key, format!("image dimension {v} is negative")))
    };

    cameras
        .iter()
        .zip(widths.iter().zip(heights.iter()))
        .map(|(name, (&w, &h))| {
            Ok((
                name.clone(),
                ImageDimensions {
                    width: to_dim(&width_key, w)?,
                    height: to_dim(&height_key, h)?,
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(raw: &str) -> TomlParameters {
        raw.parse().expect("valid toml")
    }

    #[test]
    fn absent_enable_key_disables_category() {
        let config = SensorBridgeConfig::from_parameters(&params(
            r#"gyroscopes_list = ["r_leg_ft_gyro"]"#,
        ))
        .unwrap();
        assert!(!config.is_enabled(SensorCategory::Gyroscope));
        assert!(config.expected(SensorCategory::Gyroscope).is_empty());
    }

    #[test]
    fn enabled_category_reads_its_list() {
        let config = SensorBridgeConfig::from_parameters(&params(
            r#"
            joints_enable = true
            joints_list = ["l_hip_pitch", "l_knee", "l_ankle_pitch"]
            gyroscopes_enable = 1
            gyroscopes_list = ["r_leg_ft_gyro"]
            "#,
        ))
        .unwrap();
        assert_eq!(
            config.expected(SensorCategory::Joints),
            ["l_hip_pitch", "l_knee", "l_ankle_pitch"]
        );
        assert_eq!(config.expected(SensorCategory::Gyroscope), ["r_leg_ft_gyro"]);
        assert_eq!(
            config.enabled_categories().collect::<Vec<_>>(),
            vec![SensorCategory::Joints, SensorCategory::Gyroscope]
        );
        assert!(!config.sensor_dry_run);
    }

    #[test]
    fn enabled_category_without_list_is_missing() {
        let err = SensorBridgeConfig::from_parameters(&params("imu_enable = true")).unwrap_err();
        assert_eq!(
            err,
            BridgeError::ConfigurationMissing {
                key: "imu_list".to_string()
            }
        );
    }

    #[test]
    fn camera_dimension_length_mismatch_is_rejected() {
        let err = SensorBridgeConfig::from_parameters(&params(
            r#"
            rgb_cameras_enable = true
            rgb_cameras_list = ["cam0", "cam1"]
            rgb_image_width = [640, 320]
            rgb_image_height = [480]
            "#,
        ))
        .unwrap_err();
        assert_eq!(
            err,
            BridgeError::ConfigurationSizeMismatch {
                key: "rgb_image_height".to_string(),
                expected: 2,
                found: 1,
            }
        );
    }

    #[test]
    fn camera_without_height_list_is_missing() {
        let err = SensorBridgeConfig::from_parameters(&params(
            r#"
            depth_cameras_enable = true
            depth_cameras_list = ["depth0"]
            depth_image_width = [640]
            "#,
        ))
        .unwrap_err();
        assert!(matches!(err, BridgeError::ConfigurationMissing { key } if key == "depth_image_height"));
    }

    #[test]
    fn camera_dimensions_are_matched_by_position() {
        let config = SensorBridgeConfig::from_parameters(&params(
            r#"
            rgb_cameras_enable = true
            rgb_cameras_list = ["cam0", "cam1"]
            rgb_image_width = [640, 320]
            rgb_image_height = [480, 240]
            "#,
        ))
        .unwrap();
        let dims = &config.rgb_cameras.image_dimensions;
        assert_eq!(dims["cam0"], ImageDimensions { width: 640, height: 480 });
        assert_eq!(dims["cam1"], ImageDimensions { width: 320, height: 240 });
    }

    #[test]
    fn negative_dimension_is_invalid() {
        let err = SensorBridgeConfig::from_parameters(&params(
            r#"
            rgb_cameras_enable = true
            rgb_cameras_list = ["cam0"]
            rgb_image_width = [-640]
            rgb_image_height = [480]
            "#,
        ))
        .unwrap_err();
        assert!(matches!(err, BridgeError::ConfigurationInvalid { key, .. } if key == "rgb_image_width"));
    }

    #[test]
    fn wrongly_typed_list_is_invalid() {
        let err = SensorBridgeConfig::from_parameters(&params(
            r#"
            magnetometers_enable = true
            magnetometers_list = "head_mag"
            "#,
        ))
        .unwrap_err();
        assert!(matches!(err, BridgeError::ConfigurationInvalid { .. }));
    }

    #[test]
    fn builder_matches_parsed_config() {
        let parsed = SensorBridgeConfig::from_parameters(&params(
            r#"
            gyroscopes_enable = true
            gyroscopes_list = ["r_leg_ft_gyro"]
            rgb_cameras_enable = true
            rgb_cameras_list = ["cam0"]
            rgb_image_width = [640]
            rgb_image_height = [480]
            sensor_dry_run = true
            "#,
        ))
        .unwrap();
        let built = SensorBridgeConfig::default()
            .with_category(SensorCategory::Gyroscope, ["r_leg_ft_gyro"])
            .with_camera(SensorCategory::RgbCamera, "cam0", 640, 480)
            .with_dry_run(true);
        assert_eq!(parsed, built);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "cartesian_wrenches_enable = true\ncartesian_wrenches_list = [\"l_hand\"]\n")
            .expect("write");
        let params = TomlParameters::load_from(&path).expect("load");
        let config = SensorBridgeConfig::from_parameters(&params).unwrap();
        assert_eq!(config.expected(SensorCategory::CartesianWrench), ["l_hand"]);
    }

    #[test]
    fn load_from_missing_file_reports_path() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("absent.toml");
        let err = TomlParameters::load_from(&path).unwrap_err();
        assert!(err.contains("absent.toml"));
    }
}
