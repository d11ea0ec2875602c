//! Optional platform hardening.
//!
//! Permission bits and path validation are the security boundary. The
//! immutable flag is best-effort: it needs privileges most deployments do not
//! have, so failures are reported as `false` and never treated as errors.

use std::path::Path;
use std::sync::Arc;

/// Platform immutable-attribute capability.
pub trait ImmutableFlag: Send + Sync {
    /// Try to make `path` immutable. Returns whether the flag was applied.
    fn try_set_immutable(&self, path: &Path) -> bool;

    /// Try to lift the immutable flag before the path is modified or removed.
    fn try_clear_immutable(&self, path: &Path) -> bool;
}

/// Capability used when hardening is disabled or unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoImmutableFlag;

impl ImmutableFlag for NoImmutableFlag {
    fn try_set_immutable(&self, _path: &Path) -> bool {
        false
    }

    fn try_clear_immutable(&self, _path: &Path) -> bool {
        false
    }
}

/// Linux immutable attribute through `chattr`.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ChattrFlag;

#[cfg(target_os = "linux")]
impl ChattrFlag {
    fn run(mode: &str, path: &Path) -> bool {
        std::process::Command::new("chattr")
            .arg(mode)
            .arg(path)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

#[cfg(target_os = "linux")]
impl ImmutableFlag for ChattrFlag {
    fn try_set_immutable(&self, path: &Path) -> bool {
        Self::run("+i", path)
    }

    fn try_clear_immutable(&self, path: &Path) -> bool {
        Self::run("-i", path)
    }
}

/// Select the immutable-flag capability for this platform.
pub fn platform_immutable_flag(enabled: bool) -> Arc<dyn ImmutableFlag> {
    if !enabled {
        return Arc::new(NoImmutableFlag);
    }

    #[cfg(target_os = "linux")]
    {
        Arc::new(ChattrFlag)
    }
    #[cfg(not(target_os = "linux"))]
    {
        tracing::warn!("Immutable sidecars requested but not supported on this platform");
        Arc::new(NoImmutableFlag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_flag_never_applies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record");
        std::fs::write(&path, b"{}").unwrap();

        let flag = platform_immutable_flag(false);
        assert!(!flag.try_set_immutable(&path));
        assert!(!flag.try_clear_immutable(&path));

        // Still writable.
        std::fs::write(&path, b"{\"x\":1}").unwrap();
    }
}
