//! Scratch manager - cleanup scheduling and the collaborator-facing API.
//!
//! Every cleanup path here is best-effort: failures are logged and the next
//! sweep retries. Only invalid input (a traversal attempt, an unusable
//! filename or session id) is reported back to the caller.

pub mod background;
pub mod context;
pub mod state;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::ScratchConfig;
use crate::error::ScratchError;
use crate::ledger::{unix_now, SIDECAR_SUFFIX};
use crate::sandbox::{SandboxUsage, SessionId};
use crate::utils::{path_tag, resolve_and_verify, secure_erase, verify_direct_child};

use self::state::ManagerState;

pub use background::BackgroundSweep;
pub use context::RequestContext;

/// Artifacts written by the manager are owner read/write only.
#[cfg(unix)]
const ARTIFACT_MODE: u32 = 0o600;

/// The scratch manager - main entry point for sandbox lifecycle operations.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ScratchManager {
    state: Arc<ManagerState>,
}

impl ScratchManager {
    /// Create a manager, creating the scratch root if needed.
    pub fn new(config: ScratchConfig) -> Result<Self, ScratchError> {
        let state = ManagerState::new(config)?;

        tracing::info!(
            root = %path_tag(state.root()),
            window_secs = state.config.deletion_window_secs,
            orphan_secs = state.config.orphan_threshold_secs,
            "Scratch manager initialized"
        );

        Ok(Self {
            state: Arc::new(state),
        })
    }

    pub fn config(&self) -> &ScratchConfig {
        &self.state.config
    }

    /// Canonical scratch root.
    pub fn root(&self) -> &Path {
        self.state.root()
    }

    /// Get (creating if needed) the sandbox directory of a session.
    pub fn get_sandbox(&self, session: &SessionId) -> Result<PathBuf, ScratchError> {
        let sandbox = self.state.allocator.get_or_create(session)?;
        self.state.touch(session, SystemTime::now());
        Ok(sandbox)
    }

    /// Resolve an untrusted artifact name inside a session's sandbox.
    ///
    /// The name must already be in the sanitized charset: a name the path
    /// guard would rewrite is refused, so the result always addresses exactly
    /// the file the caller named.
    pub fn resolve(&self, session: &SessionId, filename: &str) -> Result<PathBuf, ScratchError> {
        let sandbox = self.get_sandbox(session)?;
        resolve_exact(&sandbox, filename)
    }

    /// Suspend deferred deletion of a file that is about to be streamed.
    ///
    /// Returns the verified path to stream from.
    pub fn protect_for_download(
        &self,
        session: &SessionId,
        filename: &str,
    ) -> Result<PathBuf, ScratchError> {
        let path = self.resolve(session, filename)?;
        if let Err(e) = self.state.ledger.unmark(&path) {
            tracing::error!(artifact = %path_tag(&path), "Error protecting file: {}", e);
        }
        Ok(path)
    }

    /// Schedule a file for erasure once the protection window has elapsed.
    ///
    /// `window_secs` defaults to the configured deletion window.
    pub fn mark_for_cleanup(
        &self,
        session: &SessionId,
        filename: &str,
        window_secs: Option<u64>,
    ) -> Result<(), ScratchError> {
        let path = self.resolve(session, filename)?;
        let window = window_secs.unwrap_or(self.state.config.deletion_window_secs);

        match self.state.ledger.mark(&path, window) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(artifact = %path_tag(&path), "Nothing to mark, file does not exist");
            }
            Err(e) => {
                tracing::error!(artifact = %path_tag(&path), "File cleanup marking failed: {}", e);
            }
        }
        Ok(())
    }

    /// Erase expired files of one session's sandbox.
    pub fn sweep_session(&self, session: &SessionId) -> usize {
        match self.state.allocator.find(session) {
            Some(sandbox) => self.state.ledger.sweep(&sandbox, unix_now()),
            None => 0,
        }
    }

    /// Immediately erase a session's whole sandbox, ignoring deletion windows.
    ///
    /// Returns the number of files erased. The sandbox directory is gone
    /// afterwards even when individual erasures failed.
    pub fn purge_now(&self, session: &SessionId) -> usize {
        self.state.forget(session);
        let sandbox = self.state.allocator.sandbox_path(session);
        let erased = self.purge_sandbox(&sandbox);

        tracing::info!(session = %session.tag(), erased, "Immediate cleanup completed");
        erased
    }

    /// Purge every sandbox under the scratch root.
    ///
    /// Called once at boot: nothing from a previous process lifetime may
    /// survive. Returns the number of sandboxes removed.
    pub fn run_startup_sweep(&self) -> usize {
        tracing::info!("Starting startup cleanup of all sandboxes");
        self.state.clear_activity();

        let mut purged = 0;
        for entry in self.state.allocator.list() {
            self.purge_sandbox(&entry.path);
            purged += 1;
        }

        tracing::info!(purged, "Startup cleanup completed");
        purged
    }

    /// Purge orphaned sandboxes as of now.
    pub fn sweep_orphans(&self) -> usize {
        self.sweep_orphans_at(SystemTime::now())
    }

    /// Purge sandboxes older than the orphan threshold whose session has not
    /// been seen within the threshold. Returns the number removed.
    pub fn sweep_orphans_at(&self, now: SystemTime) -> usize {
        let threshold = self.state.config.orphan_threshold();
        let mut purged = 0;

        for entry in self.state.allocator.list() {
            if entry.is_symlink {
                self.purge_sandbox(&entry.path);
                purged += 1;
                continue;
            }

            let age = entry
                .created
                .and_then(|created| now.duration_since(created).ok())
                .unwrap_or_default();
            if age <= threshold {
                continue;
            }

            if let Some(ref session) = entry.session {
                if self.state.is_recently_active(session, now, threshold) {
                    continue;
                }
                self.state.forget(session);
            }

            self.purge_sandbox(&entry.path);
            purged += 1;
            tracing::debug!(sandbox = %path_tag(&entry.path), "Cleaned up orphaned sandbox");
        }

        self.state.prune(now, threshold);
        purged
    }

    /// Start the periodic orphan sweep. Must be called inside a tokio runtime.
    pub fn register_background_sweep(&self, interval: Duration) -> BackgroundSweep {
        BackgroundSweep::spawn(self.clone(), interval)
    }

    /// File count and size of a session's sandbox.
    pub fn usage(&self, session: &SessionId) -> SandboxUsage {
        self.state
            .allocator
            .find(session)
            .map(|sandbox| self.state.allocator.usage(&sandbox))
            .unwrap_or_default()
    }

    /// Request-scoped hook run before the handler.
    ///
    /// Ends the session (purging its sandbox) when it is no longer
    /// authenticated or has been inactive past the session timeout, makes
    /// sure the caller has a sandbox, and sweeps expired files from it.
    pub fn begin_request(&self, ctx: &mut RequestContext) -> Option<PathBuf> {
        let now = SystemTime::now();

        if let Some(session) = ctx.session().cloned() {
            let timeout = self.state.config.session_timeout();
            let timed_out = ctx
                .last_activity()
                .map(|last| now.duration_since(last).unwrap_or_default() > timeout)
                .unwrap_or(false);

            if !ctx.is_authenticated() {
                tracing::info!(session = %session.tag(), "Session no longer authenticated");
                self.purge_now(&session);
                ctx.drop_session();
            } else if timed_out {
                tracing::info!(session = %session.tag(), "Session timed out");
                self.purge_now(&session);
                ctx.drop_session();
                ctx.set_authenticated(false);
            }
        }

        ctx.touch(now);
        let session = ctx.ensure_session();

        match self.get_sandbox(&session) {
            Ok(sandbox) => {
                self.state.ledger.sweep(&sandbox, unix_now());
                Some(sandbox)
            }
            Err(e) => {
                tracing::error!(session = %session.tag(), "Initialization cleanup error: {}", e);
                None
            }
        }
    }

    /// Request-scoped hook run after the handler, whatever its outcome.
    ///
    /// Marks every file the request registered for deferred deletion, then
    /// sweeps the session's sandbox.
    pub fn end_request(&self, ctx: &mut RequestContext) {
        let pending = ctx.take_pending();
        let Some(session) = ctx.session().cloned() else {
            return;
        };
        let Some(sandbox) = self.state.allocator.find(&session) else {
            return;
        };

        let window = self.state.config.deletion_window_secs;
        for path in pending {
            let Some(verified) = verify_pending(&sandbox, &path) else {
                continue;
            };
            if let Err(e) = self.state.ledger.mark(&verified, window) {
                tracing::warn!(artifact = %path_tag(&verified), "Failed to mark file: {}", e);
            }
        }

        self.state.ledger.sweep(&sandbox, unix_now());
        self.report_usage(&session, &sandbox);
    }

    /// Run a handler between [`begin_request`](Self::begin_request) and
    /// [`end_request`](Self::end_request). The teardown hook runs even if
    /// the handler panics.
    pub fn run_request<T>(
        &self,
        ctx: &mut RequestContext,
        handler: impl FnOnce(&mut RequestContext, Option<&Path>) -> T,
    ) -> T {
        let sandbox = self.begin_request(ctx);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, sandbox.as_deref())));
        self.end_request(ctx);

        match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Explicit logout: purge the sandbox and reset the context.
    pub fn end_session(&self, ctx: &mut RequestContext) -> usize {
        let erased = ctx
            .session()
            .cloned()
            .map(|session| self.purge_now(&session))
            .unwrap_or(0);
        ctx.clear();
        erased
    }

    /// Write an artifact into the caller's sandbox and register it for
    /// deferred deletion at the end of the request.
    ///
    /// The name is sanitized; the returned path is where the file landed.
    pub fn save_artifact(
        &self,
        ctx: &mut RequestContext,
        filename: &str,
        contents: &[u8],
    ) -> Result<PathBuf, ScratchError> {
        let session = ctx.ensure_session();
        let sandbox = self.get_sandbox(&session)?;
        let path = resolve_artifact(&sandbox, filename)?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(ARTIFACT_MODE);
        }

        let mut file = options.open(&path)?;
        file.write_all(contents)?;
        file.flush()?;

        tracing::debug!(artifact = %path_tag(&path), bytes = contents.len(), "Artifact saved");
        ctx.register_cleanup(path.clone());
        Ok(path)
    }

    /// Prepare an artifact for streaming to the client.
    ///
    /// The file is unmarked so no sweep erases it mid-transfer, and
    /// re-registered so the teardown hook schedules deletion afresh.
    pub fn prepare_download(
        &self,
        ctx: &mut RequestContext,
        filename: &str,
    ) -> Result<PathBuf, ScratchError> {
        let session = ctx.session().cloned().ok_or(ScratchError::InvalidSessionId)?;
        let path = self.protect_for_download(&session, filename)?;

        if !path.is_file() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "artifact not found").into());
        }

        ctx.register_cleanup(path.clone());
        Ok(path)
    }

    fn report_usage(&self, session: &SessionId, sandbox: &Path) {
        let usage = self.state.allocator.usage(sandbox);
        let config = &self.state.config;

        if usage.files > config.max_files_per_session || usage.bytes > config.max_storage_bytes() {
            tracing::warn!(
                session = %session.tag(),
                files = usage.files,
                bytes = usage.bytes,
                "Session exceeds scratch usage limits"
            );
        }
    }

    /// Remove whatever sits at a sandbox location under the scratch root.
    ///
    /// Symlinks are unlinked without being followed. Real directories are
    /// verified to sit directly under the root before anything is erased.
    fn purge_sandbox(&self, sandbox: &Path) -> usize {
        let meta = match fs::symlink_metadata(sandbox) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(sandbox = %path_tag(sandbox), "Failed to inspect sandbox: {}", e);
                return 0;
            }
        };

        if meta.file_type().is_symlink() {
            if let Err(e) = fs::remove_file(sandbox) {
                tracing::warn!(sandbox = %path_tag(sandbox), "Failed to remove sandbox link: {}", e);
            }
            return 0;
        }
        if !meta.is_dir() {
            return 0;
        }

        match verify_direct_child(sandbox, self.root()) {
            Ok(real) => self.purge_directory(&real),
            Err(e) => {
                tracing::warn!(sandbox = %path_tag(sandbox), "Refusing to purge: {}", e);
                0
            }
        }
    }

    /// Securely erase a directory tree and remove it.
    fn purge_directory(&self, dir: &Path) -> usize {
        let mut erased = 0;

        match fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let Ok(file_type) = entry.file_type() else { continue };

                    let result = if file_type.is_dir() {
                        erased += self.purge_directory(&path);
                        Ok(())
                    } else if file_type.is_file()
                        && entry.file_name().to_string_lossy().ends_with(SIDECAR_SUFFIX)
                    {
                        self.state.ledger.remove_sidecar(&path)
                    } else {
                        secure_erase(&path).map(|()| {
                            if file_type.is_file() {
                                erased += 1;
                            }
                        })
                    };

                    if let Err(e) = result {
                        tracing::warn!(artifact = %path_tag(&path), "Error deleting entry: {}", e);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(sandbox = %path_tag(dir), "Failed to list sandbox: {}", e);
            }
        }

        match fs::remove_dir(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!(sandbox = %path_tag(dir), "Directory not empty after purge: {}", e);
                if let Err(e) = fs::remove_dir_all(dir) {
                    tracing::warn!(sandbox = %path_tag(dir), "Failed to remove sandbox: {}", e);
                }
            }
        }

        erased
    }
}

/// Resolve an artifact name, refusing names that collide with ledger records.
fn resolve_artifact(sandbox: &Path, filename: &str) -> Result<PathBuf, ScratchError> {
    let path = resolve_and_verify(filename, sandbox)?;
    let reserved = path
        .file_name()
        .map(|name| name.to_string_lossy().ends_with(SIDECAR_SUFFIX))
        .unwrap_or(true);

    if reserved {
        return Err(ScratchError::InvalidFilename(format!(
            "names ending in '{}' are reserved",
            SIDECAR_SUFFIX
        )));
    }
    Ok(path)
}

/// Resolve an artifact name that sanitization leaves untouched.
fn resolve_exact(sandbox: &Path, filename: &str) -> Result<PathBuf, ScratchError> {
    let path = resolve_artifact(sandbox, filename)?;
    if path.file_name().and_then(|name| name.to_str()) != Some(filename) {
        return Err(ScratchError::InvalidFilename(
            "name contains reserved characters".to_string(),
        ));
    }
    Ok(path)
}

/// Re-verify a registered cleanup path against the sandbox it must live in.
///
/// Only the exact verified location is accepted, so a registration can never
/// mark a file other than the one it names.
fn verify_pending(sandbox: &Path, path: &Path) -> Option<PathBuf> {
    let name = path.file_name().and_then(|name| name.to_str())?;

    match resolve_exact(sandbox, name) {
        Ok(verified) if verified == path => Some(verified),
        _ => {
            tracing::warn!(sandbox = %path_tag(sandbox), "Ignoring cleanup registration outside sandbox");
            None
        }
    }
}
