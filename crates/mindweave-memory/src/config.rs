//! Configuration loading from `~/.mindweave/config.toml` with defaults.

use mindweave_types::config::MemoryConfig;
use mindweave_types::error::{MindweaveError, MindweaveResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load configuration from a TOML file, with defaults.
///
/// A missing, unreadable or unparseable file yields the default config.
/// Validation is left to the caller.
pub fn load_config(path: Option<&Path>) -> MemoryConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return MemoryConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<MemoryConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                MemoryConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            MemoryConfig::default()
        }
    }
}

/// Load and validate configuration, reporting every failure.
pub fn load_config_strict(path: &Path) -> MindweaveResult<MemoryConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: MemoryConfig = toml::from_str(&contents)
        .map_err(|e| MindweaveError::Config(format!("{}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    mindweave_home().join("config.toml")
}

/// Default Mindweave home directory.
pub fn mindweave_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".mindweave")
}
