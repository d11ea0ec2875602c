//! Configuration loader from ~/.scratch-settings.json and the environment.

use std::path::{Path, PathBuf};

use crate::config::schema::ScratchConfig;
use crate::error::{ConfigError, ScratchError};
use crate::utils::path_tag;

/// Default settings file name.
const DEFAULT_SETTINGS_FILE: &str = ".scratch-settings.json";

/// Environment variable overriding the scratch root.
pub const SCRATCH_ROOT_ENV: &str = "SCRATCH_ROOT";

/// Get the default settings file path.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_SETTINGS_FILE))
}

/// Load configuration from a file path.
pub fn load_config(path: &Path) -> Result<ScratchConfig, ScratchError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path_tag(path)).into());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("Failed to read config file: {}", e)))?;

    parse_config(&content)
}

/// Load configuration from the default path, or return default config if not found.
pub fn load_default_config() -> Result<ScratchConfig, ScratchError> {
    match default_settings_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => apply_env_overrides(ScratchConfig::default()),
    }
}

/// Parse configuration from a JSON string.
pub fn parse_config(json: &str) -> Result<ScratchConfig, ScratchError> {
    let config: ScratchConfig = serde_json::from_str(json)
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse config JSON: {}", e)))?;

    apply_env_overrides(config)
}

/// Apply environment overrides and validate.
pub fn apply_env_overrides(config: ScratchConfig) -> Result<ScratchConfig, ScratchError> {
    apply_root_override(config, std::env::var_os(SCRATCH_ROOT_ENV).map(PathBuf::from))
}

fn apply_root_override(
    mut config: ScratchConfig,
    root: Option<PathBuf>,
) -> Result<ScratchConfig, ScratchError> {
    if let Some(root) = root.filter(|r| !r.as_os_str().is_empty()) {
        tracing::debug!("Scratch root overridden from {}", SCRATCH_ROOT_ENV);
        config.scratch_root = Some(root);
    }

    config.validate()?;
    Ok(config)
}
