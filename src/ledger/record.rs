//! Sidecar deletion records.
//!
//! Each marked file `<name>` gets a JSON sidecar `<name>.metadata` next to it:
//!
//! ```json
//! {"original_path": "...", "mark_time": 1700000000.5, "delete_after": 1700001800.5, "file_hash": "ab12..."}
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Suffix appended to a file name to form its sidecar.
pub const SIDECAR_SUFFIX: &str = ".metadata";

/// A pending deletion for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionRecord {
    /// Path of the file when it was marked. Informational only.
    pub original_path: String,
    /// Seconds since the epoch at which the file was marked.
    pub mark_time: f64,
    /// Seconds since the epoch after which the file must be erased.
    pub delete_after: f64,
    /// SHA-256 of the contents at mark time. Advisory, never verified.
    pub file_hash: Option<String>,
}

impl DeletionRecord {
    pub fn new(file: &Path, window_secs: u64, now: f64, file_hash: Option<String>) -> Self {
        Self {
            original_path: file.display().to_string(),
            mark_time: now,
            delete_after: now + window_secs as f64,
            file_hash,
        }
    }

    /// Whether the protection window has elapsed at `now`.
    pub fn is_due(&self, now: f64) -> bool {
        self.delete_after <= now
    }
}

/// Sidecar location for a file.
pub fn sidecar_path(file: &Path) -> PathBuf {
    let mut name: OsString = file.as_os_str().to_owned();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// Name of the file a sidecar belongs to, if `sidecar_name` is a sidecar.
pub fn target_name(sidecar_name: &str) -> Option<&str> {
    sidecar_name
        .strip_suffix(SIDECAR_SUFFIX)
        .filter(|target| !target.is_empty())
}

/// Wall-clock seconds since the epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_window() {
        let record = DeletionRecord::new(Path::new("/tmp/x/report.csv"), 30, 100.0, None);
        assert_eq!(record.mark_time, 100.0);
        assert_eq!(record.delete_after, 130.0);
        assert!(!record.is_due(129.9));
        assert!(record.is_due(130.0));
        assert!(record.is_due(131.0));
    }

    #[test]
    fn test_sidecar_naming() {
        assert_eq!(
            sidecar_path(Path::new("/s/report.csv")),
            PathBuf::from("/s/report.csv.metadata")
        );
        assert_eq!(target_name("report.csv.metadata"), Some("report.csv"));
        assert_eq!(target_name(".metadata"), None);
        assert_eq!(target_name("report.csv"), None);
    }

    #[test]
    fn test_record_json_field_names() {
        let record = DeletionRecord::new(Path::new("/s/a"), 10, 1.0, Some("ff".to_string()));
        let json = serde_json::to_value(&record).unwrap();
        for field in ["original_path", "mark_time", "delete_after", "file_hash"] {
            assert!(json.get(field).is_some(), "{field}");
        }
    }

    #[test]
    fn test_missing_deadline_is_rejected() {
        let parsed: Result<DeletionRecord, _> =
            serde_json::from_str(r#"{"original_path": "/s/a", "mark_time": 1.0, "file_hash": null}"#);
        assert!(parsed.is_err());
    }
}
