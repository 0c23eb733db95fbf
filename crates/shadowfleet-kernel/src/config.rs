//! Configuration loading from `~/.shadowfleet/config.toml` with defaults.

use shadowfleet_types::config::FleetConfig;
use shadowfleet_types::error::ConfigError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load configuration from disk, falling back to defaults.
///
/// A missing, unreadable, malformed or invalid file is logged and replaced
/// by [`FleetConfig::default`]. Use [`try_load_config`] to surface errors.
pub fn load_config(path: Option<&Path>) -> FleetConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return FleetConfig::default();
    }

    match try_load_config(&config_path) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to load config, using defaults"
            );
            FleetConfig::default()
        }
    }
}

/// Read, parse and validate a config file.
pub fn try_load_config(path: &Path) -> Result<FleetConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: FleetConfig = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    shadowfleet_home().join("config.toml")
}

/// Get the ShadowFleet home directory.
pub fn shadowfleet_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".shadowfleet")
}
