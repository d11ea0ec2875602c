//! Configuration schema for the scratch store.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ScratchError};

/// Default sandbox directory prefix.
pub const DEFAULT_DIRECTORY_PREFIX: &str = "session_";

/// Default protection window for marked files (30 minutes).
pub const DEFAULT_DELETION_WINDOW_SECS: u64 = 1800;

/// Default age after which an inactive sandbox is an orphan (30 minutes).
pub const DEFAULT_ORPHAN_THRESHOLD_SECS: u64 = 1800;

/// Default background sweep interval (2 minutes).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 120;

/// Default session inactivity timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 1800;

/// Default per-session file count above which a warning is logged.
pub const DEFAULT_MAX_FILES_PER_SESSION: usize = 50;

/// Default per-session storage above which a warning is logged.
pub const DEFAULT_MAX_STORAGE_MB: u64 = 500;

fn default_directory_prefix() -> String {
    DEFAULT_DIRECTORY_PREFIX.to_string()
}

fn default_deletion_window_secs() -> u64 {
    DEFAULT_DELETION_WINDOW_SECS
}

fn default_orphan_threshold_secs() -> u64 {
    DEFAULT_ORPHAN_THRESHOLD_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_session_timeout_secs() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

fn default_max_files_per_session() -> usize {
    DEFAULT_MAX_FILES_PER_SESSION
}

fn default_max_storage_mb() -> u64 {
    DEFAULT_MAX_STORAGE_MB
}

/// Main scratch store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchConfig {
    /// Process-wide scratch root. Defaults to the OS temp directory.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,

    /// Prefix of every sandbox directory name.
    #[serde(default = "default_directory_prefix")]
    pub directory_prefix: String,

    /// Protection window applied by `mark_for_cleanup` when none is given.
    #[serde(default = "default_deletion_window_secs")]
    pub deletion_window_secs: u64,

    /// Sandbox age after which an inactive sandbox is purged by the background sweep.
    #[serde(default = "default_orphan_threshold_secs")]
    pub orphan_threshold_secs: u64,

    /// Background sweep interval.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Inactivity timeout checked by the request hook.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// File count above which a session is reported as over its limit.
    #[serde(default = "default_max_files_per_session")]
    pub max_files_per_session: usize,

    /// Storage above which a session is reported as over its limit.
    #[serde(default = "default_max_storage_mb")]
    pub max_storage_mb: u64,

    /// Try to set the platform immutable flag on deletion records.
    #[serde(default)]
    pub immutable_sidecars: bool,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            scratch_root: None,
            directory_prefix: default_directory_prefix(),
            deletion_window_secs: DEFAULT_DELETION_WINDOW_SECS,
            orphan_threshold_secs: DEFAULT_ORPHAN_THRESHOLD_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            max_files_per_session: DEFAULT_MAX_FILES_PER_SESSION,
            max_storage_mb: DEFAULT_MAX_STORAGE_MB,
            immutable_sidecars: false,
        }
    }
}

impl ScratchConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ScratchError> {
        validate_prefix(&self.directory_prefix)?;

        if self.sweep_interval_secs == 0 {
            return Err(invalid("sweepIntervalSecs must be greater than zero"));
        }
        if self.session_timeout_secs == 0 {
            return Err(invalid("sessionTimeoutSecs must be greater than zero"));
        }
        if let Some(ref root) = self.scratch_root {
            if root.as_os_str().is_empty() {
                return Err(invalid("scratchRoot cannot be empty"));
            }
        }

        Ok(())
    }

    /// The scratch root, falling back to the OS temp directory.
    pub fn resolved_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn deletion_window(&self) -> Duration {
        Duration::from_secs(self.deletion_window_secs)
    }

    pub fn orphan_threshold(&self) -> Duration {
        Duration::from_secs(self.orphan_threshold_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Storage limit in bytes.
    pub fn max_storage_bytes(&self) -> u64 {
        self.max_storage_mb.saturating_mul(1024 * 1024)
    }
}

/// The prefix becomes part of a directory name, so it must be a plain name
/// fragment from the filename charset.
fn validate_prefix(prefix: &str) -> Result<(), ScratchError> {
    if prefix.is_empty() {
        return Err(invalid("directoryPrefix cannot be empty"));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid(
            "directoryPrefix may only contain ASCII letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}

fn invalid(reason: &str) -> ScratchError {
    ConfigError::ValidationError(reason.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ScratchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.deletion_window(), Duration::from_secs(1800));
        assert_eq!(config.sweep_interval(), Duration::from_secs(120));
        assert_eq!(config.resolved_root(), std::env::temp_dir());
    }

    #[test]
    fn test_invalid_prefix() {
        for prefix in ["", "../x", "a/b", "with space"] {
            let config = ScratchConfig {
                directory_prefix: prefix.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{prefix:?}");
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ScratchConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_limit_in_bytes() {
        let config = ScratchConfig {
            max_storage_mb: 2,
            ..Default::default()
        };
        assert_eq!(config.max_storage_bytes(), 2 * 1024 * 1024);
    }
}
