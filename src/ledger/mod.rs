//! Deferred deletion ledger.
//!
//! Marking a file writes a sidecar record with a deadline. Sweeps erase every
//! file whose deadline has passed and drop its record. A file whose record is
//! still within its window is never touched, and records that cannot be
//! parsed are left in place rather than acted on.

pub mod record;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::ScratchError;
use crate::sandbox::{ImmutableFlag, NoImmutableFlag};
use crate::utils::{locate_entry, path_tag, secure_erase};

pub use record::{sidecar_path, target_name, unix_now, DeletionRecord, SIDECAR_SUFFIX};

/// Chunk size used when hashing file contents.
const HASH_CHUNK_SIZE: usize = 4096;

/// Sidecar records are owner read/write only.
#[cfg(unix)]
const SIDECAR_MODE: u32 = 0o600;

/// Tracks pending deletions through sidecar records.
pub struct DeletionLedger {
    immutable: Arc<dyn ImmutableFlag>,
}

impl Default for DeletionLedger {
    fn default() -> Self {
        Self::new(Arc::new(NoImmutableFlag))
    }
}

impl DeletionLedger {
    pub fn new(immutable: Arc<dyn ImmutableFlag>) -> Self {
        Self { immutable }
    }

    /// Mark a file for erasure `window_secs` from now.
    ///
    /// Returns `false` when the file does not exist, in which case nothing is
    /// recorded.
    pub fn mark(&self, file: &Path, window_secs: u64) -> Result<bool, ScratchError> {
        self.mark_at(file, window_secs, unix_now())
    }

    /// Mark a file with an explicit mark time.
    pub fn mark_at(&self, file: &Path, window_secs: u64, now: f64) -> Result<bool, ScratchError> {
        match fs::symlink_metadata(file) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(ScratchError::InvalidFilename(
                    "only regular files can be marked".to_string(),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(artifact = %path_tag(file), "Not marking missing file");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        let record = DeletionRecord::new(file, window_secs, now, file_hash(file));
        let sidecar = sidecar_path(file);

        // A previous record may still carry the flag.
        self.immutable.try_clear_immutable(&sidecar);
        write_sidecar(&sidecar, &record)?;
        if self.immutable.try_set_immutable(&sidecar) {
            tracing::debug!(artifact = %path_tag(file), "Deletion record made immutable");
        }

        tracing::info!(
            artifact = %path_tag(file),
            window_secs,
            "Marked file for cleanup"
        );
        Ok(true)
    }

    /// Drop the deletion record of a file, leaving the file itself intact.
    pub fn unmark(&self, file: &Path) -> Result<(), ScratchError> {
        self.remove_sidecar(&sidecar_path(file))?;
        tracing::debug!(artifact = %path_tag(file), "Deletion record removed");
        Ok(())
    }

    /// Read the deletion record of a file, if any.
    pub fn record_for(&self, file: &Path) -> Result<Option<DeletionRecord>, ScratchError> {
        let sidecar = sidecar_path(file);
        if fs::symlink_metadata(&sidecar).is_err() {
            return Ok(None);
        }
        read_sidecar(&sidecar).map(Some)
    }

    /// Remove a sidecar record. Missing records are fine.
    pub fn remove_sidecar(&self, sidecar: &Path) -> io::Result<()> {
        self.immutable.try_clear_immutable(sidecar);
        match fs::remove_file(sidecar) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Erase every file in `sandbox` whose deadline is at or before `now`.
    ///
    /// Returns how many records were settled. Unreadable records and failed
    /// erasures are logged and left for the next sweep.
    pub fn sweep(&self, sandbox: &Path, now: f64) -> usize {
        let entries = match fs::read_dir(sandbox) {
            Ok(entries) => entries,
            // Already purged by a concurrent request or the background sweep.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(sandbox = %path_tag(sandbox), "Failed to list sandbox: {}", e);
                return 0;
            }
        };

        let mut erased = 0;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            let Some(target) = target_name(name) else { continue };

            let sidecar = entry.path();
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                tracing::warn!(record = %path_tag(&sidecar), "Skipping non-file deletion record");
                continue;
            }

            let record = match read_sidecar(&sidecar) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Skipping deletion record: {}", e);
                    continue;
                }
            };
            if !record.is_due(now) {
                continue;
            }

            // The exact entry named by the record. A symlink is unlinked
            // by the eraser, never followed.
            let target = match locate_entry(target, sandbox) {
                Ok(target) => target,
                Err(e) => {
                    tracing::warn!(record = %path_tag(&sidecar), "Refusing to erase: {}", e);
                    continue;
                }
            };

            if let Err(e) = secure_erase(&target) {
                tracing::warn!(
                    artifact = %path_tag(&target),
                    "Failed to erase expired file, will retry: {}",
                    e
                );
                continue;
            }
            if let Err(e) = self.remove_sidecar(&sidecar) {
                tracing::warn!(record = %path_tag(&sidecar), "Failed to remove deletion record: {}", e);
            }

            erased += 1;
            tracing::info!(artifact = %path_tag(&target), "Securely cleaned up expired file");
        }

        erased
    }
}

fn write_sidecar(sidecar: &Path, record: &DeletionRecord) -> Result<(), ScratchError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(SIDECAR_MODE);
    }

    let mut file = options.open(sidecar)?;
    serde_json::to_writer(&mut file, record).map_err(io::Error::from)?;
    file.flush()?;
    Ok(())
}

fn read_sidecar(sidecar: &Path) -> Result<DeletionRecord, ScratchError> {
    let corrupt = |reason: String| ScratchError::CorruptMetadata {
        tag: path_tag(sidecar),
        reason,
    };

    let file = File::open(sidecar).map_err(|e| corrupt(e.to_string()))?;
    let record: DeletionRecord =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| corrupt(e.to_string()))?;

    if !record.delete_after.is_finite() || !record.mark_time.is_finite() {
        return Err(corrupt("non-finite timestamp".to_string()));
    }
    Ok(record)
}

/// Stream the file through SHA-256. Failures only cost the advisory hash.
fn file_hash(path: &Path) -> Option<String> {
    let hash = || -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut chunk = [0u8; HASH_CHUNK_SIZE];
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    };

    match hash() {
        Ok(hex) => Some(hex),
        Err(e) => {
            tracing::warn!(artifact = %path_tag(path), "File hash generation failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sandbox() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = dir.path().join("session_ledger");
        fs::create_dir(&sandbox).unwrap();
        let sandbox = fs::canonicalize(sandbox).unwrap();
        (dir, sandbox)
    }

    fn artifact(sandbox: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = sandbox.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_deletion_window_scenario() {
        let (_dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let report = artifact(&sandbox, "report.csv", b"a,b\n1,2\n");

        assert!(ledger.mark_at(&report, 30, 0.0).unwrap());

        assert_eq!(ledger.sweep(&sandbox, 10.0), 0);
        assert_eq!(fs::read(&report).unwrap(), b"a,b\n1,2\n");

        assert_eq!(ledger.sweep(&sandbox, 31.0), 1);
        assert!(!report.exists());
        assert!(!sidecar_path(&report).exists());
    }

    #[test]
    fn test_sweep_at_deadline_erases() {
        let (_dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let file = artifact(&sandbox, "chart.png", b"png");

        ledger.mark_at(&file, 30, 100.0).unwrap();
        assert_eq!(ledger.sweep(&sandbox, 129.999), 0);
        assert_eq!(ledger.sweep(&sandbox, 130.0), 1);
        assert!(!file.exists());
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let (_dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let file = artifact(&sandbox, "a.txt", b"a");

        ledger.mark_at(&file, 1, 0.0).unwrap();
        assert_eq!(ledger.sweep(&sandbox, 5.0), 1);
        assert_eq!(ledger.sweep(&sandbox, 5.0), 0);
    }

    #[test]
    fn test_record_contents() {
        let (_dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let file = artifact(&sandbox, "data.json", b"{\"k\":1}");

        ledger.mark_at(&file, 1800, 1000.0).unwrap();
        let record = ledger.record_for(&file).unwrap().unwrap();

        assert_eq!(record.mark_time, 1000.0);
        assert_eq!(record.delete_after, 2800.0);
        assert_eq!(record.original_path, file.display().to_string());
        assert_eq!(
            record.file_hash.as_deref(),
            Some(format!("{:x}", Sha256::digest(b"{\"k\":1}")).as_str())
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_sidecar_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let file = artifact(&sandbox, "a.txt", b"a");
        ledger.mark(&file, 60).unwrap();

        let mode = fs::metadata(sidecar_path(&file)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_mark_missing_file_records_nothing() {
        let (_dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let missing = sandbox.join("missing.csv");

        assert!(!ledger.mark(&missing, 60).unwrap());
        assert!(!sidecar_path(&missing).exists());
    }

    #[test]
    fn test_unmark_protects_file() {
        let (_dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let file = artifact(&sandbox, "download.xlsx", b"xlsx");

        ledger.mark_at(&file, 30, 0.0).unwrap();
        ledger.unmark(&file).unwrap();

        assert_eq!(ledger.sweep(&sandbox, 1_000_000.0), 0);
        assert!(file.exists());
        assert!(ledger.record_for(&file).unwrap().is_none());

        // Unmarking twice is harmless.
        ledger.unmark(&file).unwrap();
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let (_dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let kept = artifact(&sandbox, "kept.csv", b"keep");
        fs::write(sidecar_path(&kept), b"{not json").unwrap();
        let expired = artifact(&sandbox, "expired.csv", b"gone");
        ledger.mark_at(&expired, 10, 0.0).unwrap();

        assert_eq!(ledger.sweep(&sandbox, 100.0), 1);
        assert!(kept.exists());
        assert!(sidecar_path(&kept).exists());
        assert!(!expired.exists());
        assert!(matches!(
            ledger.record_for(&kept),
            Err(ScratchError::CorruptMetadata { .. })
        ));
    }

    #[test]
    fn test_due_record_without_file_is_settled() {
        let (_dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let file = artifact(&sandbox, "vanished.txt", b"x");
        ledger.mark_at(&file, 10, 0.0).unwrap();
        fs::remove_file(&file).unwrap();

        assert_eq!(ledger.sweep(&sandbox, 20.0), 1);
        assert!(!sidecar_path(&file).exists());
    }

    #[test]
    fn test_sweep_missing_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DeletionLedger::default();
        assert_eq!(ledger.sweep(&dir.path().join("gone"), 0.0), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_sweep_never_follows_link_out_of_sandbox() {
        let (dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let outside = dir.path().join("outside.txt");
        fs::write(&outside, b"not yours").unwrap();
        let link = sandbox.join("link.txt");
        std::os::unix::fs::symlink(&outside, &link).unwrap();

        let record = DeletionRecord::new(&link, 0, 0.0, None);
        fs::write(sidecar_path(&link), serde_json::to_vec(&record).unwrap()).unwrap();

        assert_eq!(ledger.sweep(&sandbox, 10.0), 1);
        assert!(fs::symlink_metadata(&link).is_err());
        assert_eq!(fs::read(&outside).unwrap(), b"not yours");
    }

    #[cfg(unix)]
    #[test]
    fn test_due_link_leaves_protected_target() {
        let (_dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let other = artifact(&sandbox, "other.csv", b"still needed");
        ledger.mark_at(&other, 1000, 0.0).unwrap();

        let link = sandbox.join("link.csv");
        std::os::unix::fs::symlink(&other, &link).unwrap();
        let record = DeletionRecord::new(&link, 10, 0.0, None);
        fs::write(sidecar_path(&link), serde_json::to_vec(&record).unwrap()).unwrap();

        assert_eq!(ledger.sweep(&sandbox, 20.0), 1);
        assert!(fs::symlink_metadata(&link).is_err());
        assert_eq!(fs::read(&other).unwrap(), b"still needed");
        assert!(sidecar_path(&other).exists());
    }

    #[test]
    fn test_sweep_erases_exact_name_only() {
        let (_dir, sandbox) = sandbox();
        let ledger = DeletionLedger::default();
        let spaced = artifact(&sandbox, "a b.csv", b"expired");
        let underscored = artifact(&sandbox, "a_b.csv", b"protected");

        ledger.mark_at(&spaced, 10, 0.0).unwrap();
        ledger.mark_at(&underscored, 1000, 0.0).unwrap();

        assert_eq!(ledger.sweep(&sandbox, 20.0), 1);
        assert!(!spaced.exists());
        assert!(!sidecar_path(&spaced).exists());
        assert_eq!(fs::read(&underscored).unwrap(), b"protected");
        assert!(sidecar_path(&underscored).exists());
    }
}
