//! Overwrite-then-unlink erasure for scratch files.
//!
//! A single pass of random bytes is written over the whole file before it is
//! unlinked. This targets short-lived scratch data on local disks, not
//! forensic-grade wiping.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use rand::RngCore;

/// Size of each random block written over the file.
const CHUNK_SIZE: usize = 64 * 1024;

/// Securely erase a file.
///
/// Missing paths are a no-op and return `Ok(())`. Symlinks are unlinked
/// without touching their target. Directories are refused.
pub fn secure_erase(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        return remove_if_present(path);
    }
    if file_type.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "refusing to erase a directory",
        ));
    }

    match overwrite(path, metadata.len()) {
        Ok(()) => {}
        // Removed concurrently by another sweep.
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }

    remove_if_present(path)
}

/// Overwrite `len` bytes of the file with fresh random data and flush to disk.
fn overwrite(path: &Path, len: u64) -> io::Result<()> {
    let mut file = open_for_overwrite(path)?;
    let mut rng = rand::thread_rng();
    let mut block = vec![0u8; CHUNK_SIZE.min(len as usize)];

    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(block.len() as u64) as usize;
        rng.fill_bytes(&mut block[..n]);
        file.write_all(&block[..n])?;
        remaining -= n as u64;
    }

    file.sync_all()
}

#[cfg(unix)]
fn open_for_overwrite(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .custom_flags(nix::fcntl::OFlag::O_NOFOLLOW.bits())
        .open(path)
}

#[cfg(not(unix))]
fn open_for_overwrite(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
