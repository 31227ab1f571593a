//! Locates and loads the bridge configuration file.

use std::path::{Path, PathBuf};

use sensorbridge_hal::{SensorBridgeConfig, TomlParameters};

/// Return the default path `~/.sensorbridge/bridge.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".sensorbridge").join("bridge.toml")
}

/// Pick the configuration file: an explicit path wins, then
/// `SENSORBRIDGE_CONFIG`, then the default path.
pub fn resolve(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var("SENSORBRIDGE_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(config_path)
}

/// Load and validate the configuration at `path`.
pub fn load_from(path: &Path) -> Result<SensorBridgeConfig, String> {
    if !path.exists() {
        return Err(format!("No configuration at {}", path.display()));
    }
    let params = TomlParameters::load_from(path)?;
    let mut config = SensorBridgeConfig::from_parameters(&params)
        .map_err(|e| format!("Invalid configuration at {}: {}", path.display(), e))?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply `SENSORBRIDGE_*` environment variable overrides.
///
/// | Variable | Field |
/// |---|---|
/// | `SENSORBRIDGE_DRY_RUN` | `sensor_dry_run` (`1`/`true` or `0`/`false`) |
pub fn apply_env_overrides(config: &mut SensorBridgeConfig) {
    if let Ok(v) = std::env::var("SENSORBRIDGE_DRY_RUN")
        && let Some(enabled) = parse_flag(&v)
    {
        config.sensor_dry_run = enabled;
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
