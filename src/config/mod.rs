//! Configuration module.

pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, default_settings_path, load_config, load_default_config, parse_config,
    SCRATCH_ROOT_ENV,
};
pub use schema::{
    ScratchConfig, DEFAULT_DELETION_WINDOW_SECS, DEFAULT_DIRECTORY_PREFIX,
    DEFAULT_ORPHAN_THRESHOLD_SECS, DEFAULT_SESSION_TIMEOUT_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
};
