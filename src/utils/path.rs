//! Path validation for every operation that touches a sandbox.
//!
//! Caller-supplied filenames are untrusted. Before any open, read, delete or
//! send, the name goes through [`resolve_and_verify`], which rejects anything
//! that could land outside the sandbox and returns the canonical location.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::ScratchError;

/// Anything outside the filename charset (alnum, dot, dash, underscore).
static RESERVED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("reserved charset pattern"));

/// Length of the log-safe identifier produced by [`path_tag`].
const TAG_LEN: usize = 12;

/// Derive a non-sensitive identifier for a path, for use in logs and errors.
pub fn path_tag(path: &Path) -> String {
    digest_tag(path.to_string_lossy().as_bytes())
}

/// Truncated SHA-256 hex of arbitrary bytes.
pub(crate) fn digest_tag(bytes: &[u8]) -> String {
    let mut hex = format!("{:x}", Sha256::digest(bytes));
    hex.truncate(TAG_LEN);
    hex
}

/// Strip reserved characters from a filename.
///
/// Whitespace becomes `_`, every other character outside the allowed charset
/// is dropped, and leading dots are removed so the result can never be `.`,
/// `..` or a hidden file. Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let spaced: String = name
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    let cleaned = RESERVED_CHARS.replace_all(&spaced, "");
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Check whether a raw name tries to address something other than a plain
/// entry of the sandbox (separators, parent references, absolute paths).
pub fn is_traversal_attempt(name: &str) -> bool {
    name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name == ".."
        || name == "."
        || Path::new(name).is_absolute()
}

/// Check that `candidate` lies strictly below `root`.
///
/// Both paths must already be canonical. Comparison is per component, so
/// `/tmp/session_a` is not considered inside `/tmp/session_ab`.
pub fn is_within(candidate: &Path, root: &Path) -> bool {
    candidate != root && candidate.starts_with(root)
}

/// Resolve an untrusted filename inside a sandbox.
///
/// Returns the canonical path of the entry when it stays inside the sandbox.
/// Symlinks are resolved, so an existing link pointing elsewhere (or nowhere)
/// is rejected with [`ScratchError::PathTraversal`]. The entry itself does not
/// need to exist, which lets writers use the result to create new files.
pub fn resolve_and_verify(candidate: &str, sandbox_root: &Path) -> Result<PathBuf, ScratchError> {
    let traversal = || ScratchError::PathTraversal {
        sandbox: path_tag(sandbox_root),
    };

    if is_traversal_attempt(candidate) {
        tracing::warn!(sandbox = %path_tag(sandbox_root), "Blocked path traversal attempt");
        return Err(traversal());
    }

    let name = sanitize_filename(candidate)
        .ok_or_else(|| ScratchError::InvalidFilename("no usable characters".to_string()))?;
    if name != candidate {
        tracing::debug!(sandbox = %path_tag(sandbox_root), "Filename sanitized");
    }

    let root = std::fs::canonicalize(sandbox_root)?;
    let joined = root.join(&name);

    let resolved = match std::fs::symlink_metadata(&joined) {
        // Existing entries are canonicalized so links are followed to their
        // real target. A dangling link fails here and is rejected.
        Ok(_) => std::fs::canonicalize(&joined).map_err(|_| {
            tracing::warn!(sandbox = %path_tag(&root), "Blocked unresolvable sandbox entry");
            traversal()
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => joined,
        Err(e) => return Err(e.into()),
    };

    if !is_within(&resolved, &root) {
        tracing::warn!(sandbox = %path_tag(&root), "Blocked sandbox escape");
        return Err(traversal());
    }

    Ok(resolved)
}

/// Locate an exact entry name inside a sandbox without resolving it.
///
/// Unlike [`resolve_and_verify`] the name is neither sanitized nor followed
/// through symlinks: the returned path is the directory entry itself, so a
/// link is addressed as a link. Used when the name comes from the sandbox's
/// own listing rather than from a caller.
pub fn locate_entry(name: &str, sandbox_root: &Path) -> Result<PathBuf, ScratchError> {
    let traversal = || ScratchError::PathTraversal {
        sandbox: path_tag(sandbox_root),
    };

    if name.is_empty() || is_traversal_attempt(name) {
        return Err(traversal());
    }

    let root = std::fs::canonicalize(sandbox_root)?;
    let joined = root.join(name);
    if joined.parent() != Some(root.as_path()) || !is_within(&joined, &root) {
        return Err(traversal());
    }

    Ok(joined)
}

/// Verify that `dir` resolves to a direct child of `root`.
///
/// Used for directory-level checks: a sandbox must sit immediately under the
/// scratch root after all symlinks are resolved. Returns the canonical path.
pub fn verify_direct_child(dir: &Path, root: &Path) -> Result<PathBuf, ScratchError> {
    let root = std::fs::canonicalize(root)?;
    let resolved = std::fs::canonicalize(dir)?;

    if resolved.parent() != Some(root.as_path()) {
        tracing::warn!(root = %path_tag(&root), "Sandbox does not resolve under scratch root");
        return Err(ScratchError::PathTraversal {
            sandbox: path_tag(dir),
        });
    }

    Ok(resolved)
}

/// Check if a path is a symlink, without following it.
pub fn is_symlink(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = dir.path().join("session_abc");
        std::fs::create_dir(&sandbox).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.csv").as_deref(), Some("report.csv"));
        assert_eq!(sanitize_filename("my report.csv").as_deref(), Some("my_report.csv"));
        assert_eq!(sanitize_filename("data$%&.json").as_deref(), Some("data.json"));
        assert_eq!(sanitize_filename(".hidden").as_deref(), Some("hidden"));
        assert_eq!(sanitize_filename("..."), None);
        assert_eq!(sanitize_filename("$$$"), None);
        assert_eq!(sanitize_filename(""), None);
    }

    #[test]
    fn test_traversal_attempts_detected() {
        assert!(is_traversal_attempt("../etc/passwd"));
        assert!(is_traversal_attempt("/etc/passwd"));
        assert!(is_traversal_attempt(".."));
        assert!(is_traversal_attempt("a/b.txt"));
        assert!(is_traversal_attempt("..\\secret"));
        assert!(is_traversal_attempt("bad\0name"));
        assert!(!is_traversal_attempt("report..csv"));
        assert!(!is_traversal_attempt("report.csv"));
    }

    #[test]
    fn test_resolve_accepts_new_and_existing_files() {
        let (_dir, sandbox) = sandbox();
        let root = std::fs::canonicalize(&sandbox).unwrap();

        let fresh = resolve_and_verify("report.csv", &sandbox).unwrap();
        assert_eq!(fresh, root.join("report.csv"));

        std::fs::write(root.join("existing.txt"), b"x").unwrap();
        let existing = resolve_and_verify("existing.txt", &sandbox).unwrap();
        assert_eq!(existing, root.join("existing.txt"));
    }

    #[test]
    fn test_resolve_rejects_traversal_before_io() {
        let (dir, sandbox) = sandbox();

        for name in ["../escape.txt", "/etc/passwd", "..", "nested/file.txt"] {
            let err = resolve_and_verify(name, &sandbox).unwrap_err();
            assert!(matches!(err, ScratchError::PathTraversal { .. }), "{name}");
        }

        // Nothing was created next to the sandbox.
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_error_does_not_leak_paths() {
        let (_dir, sandbox) = sandbox();
        let err = resolve_and_verify("../x", &sandbox).unwrap_err();
        assert!(!err.to_string().contains(sandbox.to_string_lossy().as_ref()));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let (dir, sandbox) = sandbox();
        let outside = dir.path().join("outside.txt");
        std::fs::write(&outside, b"secret").unwrap();
        std::os::unix::fs::symlink(&outside, sandbox.join("link.txt")).unwrap();

        let err = resolve_and_verify("link.txt", &sandbox).unwrap_err();
        assert!(matches!(err, ScratchError::PathTraversal { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_dangling_symlink() {
        let (dir, sandbox) = sandbox();
        std::os::unix::fs::symlink(dir.path().join("missing"), sandbox.join("dangling")).unwrap();

        let err = resolve_and_verify("dangling", &sandbox).unwrap_err();
        assert!(matches!(err, ScratchError::PathTraversal { .. }));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("session_a");
        let b = dir.path().join("session_ab");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();
        let b_root = std::fs::canonicalize(&b).unwrap();

        let in_a = resolve_and_verify("file.txt", &a).unwrap();
        assert!(!is_within(&in_a, &b_root));
        assert!(resolve_and_verify("../session_ab/file.txt", &a).is_err());
    }

    #[test]
    fn test_locate_entry_keeps_exact_name() {
        let (_dir, sandbox) = sandbox();
        let root = std::fs::canonicalize(&sandbox).unwrap();

        assert_eq!(locate_entry("a b.csv", &sandbox).unwrap(), root.join("a b.csv"));
        assert!(matches!(
            locate_entry("../x", &sandbox),
            Err(ScratchError::PathTraversal { .. })
        ));
        assert!(locate_entry("..", &sandbox).is_err());
        assert!(locate_entry("", &sandbox).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_entry_does_not_follow_links() {
        let (dir, sandbox) = sandbox();
        let outside = dir.path().join("outside.txt");
        std::fs::write(&outside, b"x").unwrap();
        std::os::unix::fs::symlink(&outside, sandbox.join("link.txt")).unwrap();

        let located = locate_entry("link.txt", &sandbox).unwrap();
        assert!(is_symlink(&located));
        assert_eq!(located.file_name().unwrap(), "link.txt");
    }

    #[test]
    fn test_verify_direct_child() {
        let dir = tempfile::tempdir().unwrap();
        let child = dir.path().join("session_x");
        let nested = child.join("deeper");
        std::fs::create_dir_all(&nested).unwrap();

        assert!(verify_direct_child(&child, dir.path()).is_ok());
        assert!(verify_direct_child(&nested, dir.path()).is_err());
        assert!(verify_direct_child(dir.path(), dir.path()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_verify_direct_child_rejects_symlinked_dir() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let link = root.path().join("session_link");
        std::os::unix::fs::symlink(elsewhere.path(), &link).unwrap();

        assert!(is_symlink(&link));
        assert!(verify_direct_child(&link, root.path()).is_err());
    }

    #[test]
    fn test_path_tag_is_stable_and_short() {
        let p = Path::new("/tmp/session_abc");
        assert_eq!(path_tag(p), path_tag(p));
        assert_eq!(path_tag(p).len(), TAG_LEN);
        assert_ne!(path_tag(p), path_tag(Path::new("/tmp/session_abd")));
    }
}
