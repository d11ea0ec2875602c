//! Per-session sandbox directories under the scratch root.

pub mod hardening;
pub mod session;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::ScratchError;
use crate::ledger::SIDECAR_SUFFIX;
use crate::utils::{path_tag, verify_direct_child};

pub use hardening::{platform_immutable_flag, ImmutableFlag, NoImmutableFlag};
pub use session::SessionId;

/// Owner-only directory mode.
#[cfg(unix)]
const SANDBOX_MODE: u32 = 0o700;

/// A sandbox-like directory found under the scratch root.
#[derive(Debug, Clone)]
pub struct SandboxEntry {
    /// Location under the scratch root (not resolved).
    pub path: PathBuf,
    /// Owning session, when the name carries a valid identifier.
    pub session: Option<SessionId>,
    /// Whether the entry is a symlink rather than a real directory.
    pub is_symlink: bool,
    /// Creation time, or modification time where creation is not recorded.
    pub created: Option<SystemTime>,
}

/// File count and size of a sandbox, sidecar records excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SandboxUsage {
    pub files: usize,
    pub bytes: u64,
}

/// Maps session identifiers to isolated directories.
#[derive(Debug, Clone)]
pub struct SandboxAllocator {
    root: PathBuf,
    prefix: String,
}

impl SandboxAllocator {
    /// Create an allocator over `root`, creating the root if needed.
    pub fn new(root: &Path, prefix: &str) -> Result<Self, ScratchError> {
        fs::create_dir_all(root)?;
        let root = fs::canonicalize(root)?;

        Ok(Self {
            root,
            prefix: prefix.to_string(),
        })
    }

    /// Canonical scratch root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Deterministic sandbox location for a session. Nothing is created.
    pub fn sandbox_path(&self, session: &SessionId) -> PathBuf {
        self.root.join(format!("{}{}", self.prefix, session.as_str()))
    }

    /// Get the sandbox of a session, creating it with owner-only permissions.
    ///
    /// A concurrent creator winning the race is not an error: an existing
    /// directory owned by this process is returned as-is. The returned path is
    /// canonical and verified to be a direct child of the scratch root.
    pub fn get_or_create(&self, session: &SessionId) -> Result<PathBuf, ScratchError> {
        let path = self.sandbox_path(session);

        match create_private_dir(&path) {
            Ok(()) => {
                tracing::debug!(sandbox = %path_tag(&path), "Created sandbox");
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                self.check_existing(&path)?;
            }
            Err(e) => return Err(e.into()),
        }

        verify_direct_child(&path, &self.root)
    }

    /// Existing sandbox of a session, verified, without creating it.
    pub fn find(&self, session: &SessionId) -> Option<PathBuf> {
        let path = self.sandbox_path(session);
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => verify_direct_child(&path, &self.root).ok(),
            _ => None,
        }
    }

    /// Reject anything at the sandbox location that is not a private
    /// directory of ours.
    fn check_existing(&self, path: &Path) -> Result<(), ScratchError> {
        let meta = fs::symlink_metadata(path)?;
        if !meta.is_dir() {
            tracing::warn!(sandbox = %path_tag(path), "Sandbox location is not a directory");
            return Err(ScratchError::PathTraversal {
                sandbox: path_tag(path),
            });
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::{MetadataExt, PermissionsExt};

            if meta.uid() != nix::unistd::geteuid().as_raw() {
                tracing::warn!(sandbox = %path_tag(path), "Sandbox owned by another user");
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "sandbox owned by another user",
                )
                .into());
            }

            if meta.mode() & 0o077 != 0 {
                tracing::warn!(sandbox = %path_tag(path), "Tightening sandbox permissions");
                fs::set_permissions(path, fs::Permissions::from_mode(SANDBOX_MODE))?;
            }
        }

        Ok(())
    }

    /// Whether a directory name belongs to this allocator's namespace.
    pub fn is_sandbox_name(&self, name: &str) -> bool {
        name.len() > self.prefix.len() && name.starts_with(&self.prefix)
    }

    /// List every sandbox-like entry under the scratch root.
    ///
    /// Real directories and symlinks carrying the prefix are reported; plain
    /// files are left alone. Listing failures are logged and yield nothing.
    pub fn list(&self) -> Vec<SandboxEntry> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = %path_tag(&self.root), "Failed to list scratch root: {}", e);
                return Vec::new();
            }
        };

        let mut sandboxes = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !self.is_sandbox_name(name) {
                continue;
            }

            let Ok(meta) = fs::symlink_metadata(entry.path()) else {
                continue;
            };
            let file_type = meta.file_type();
            if !file_type.is_dir() && !file_type.is_symlink() {
                continue;
            }

            sandboxes.push(SandboxEntry {
                path: entry.path(),
                session: SessionId::parse(&name[self.prefix.len()..]).ok(),
                is_symlink: file_type.is_symlink(),
                created: meta.created().or_else(|_| meta.modified()).ok(),
            });
        }

        sandboxes
    }

    /// Count files and bytes in a sandbox, recursing into subdirectories.
    pub fn usage(&self, sandbox: &Path) -> SandboxUsage {
        let mut usage = SandboxUsage::default();
        accumulate_usage(sandbox, &mut usage);
        usage
    }
}

fn accumulate_usage(dir: &Path, usage: &mut SandboxUsage) {
    let Ok(entries) = fs::read_dir(dir) else { return };

    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else { continue };
        if file_type.is_dir() {
            accumulate_usage(&entry.path(), usage);
        } else if file_type.is_file() {
            if entry.file_name().to_string_lossy().ends_with(SIDECAR_SUFFIX) {
                continue;
            }
            usage.files += 1;
            usage.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().mode(SANDBOX_MODE).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::DirBuilder::new().create(path)
}
