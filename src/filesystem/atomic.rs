// src/filesystem/atomic.rs

//! Crash-safe file writes
//!
//! The target volume is removable and may disappear mid-write. Every file the
//! engine puts in place is first written to a temporary sibling, fsynced, and
//! then renamed over the destination, so a reader only ever sees the old
//! content or the complete new content.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

/// Prefix for in-flight temporary files; never matched by anything we list
pub const TEMP_PREFIX: &str = ".rbdeploy-";

/// Copy `src` to `dst` via write-then-rename
///
/// Permissions are carried over from `src`. Parent directories of `dst` must
/// already exist.
pub fn copy_file_atomic(src: &Path, dst: &Path) -> io::Result<u64> {
    let parent = dst.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Destination has no parent: {}", dst.display()),
        )
    })?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".tmp")
        .tempfile_in(parent)?;

    let mut source = File::open(src)?;
    let written = io::copy(&mut source, temp.as_file_mut())?;

    let permissions = source.metadata()?.permissions();
    fs::set_permissions(temp.path(), permissions)?;
    temp.as_file().sync_all()?;

    // persist() renames over an existing destination
    temp.persist(dst).map_err(|e| e.error)?;
    sync_dir(parent);

    Ok(written)
}

/// Best-effort fsync of a directory entry table
///
/// Not every filesystem (notably FAT on some platforms) supports this, so
/// errors are ignored.
pub fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

/// Compare two files byte for byte
///
/// Lengths are compared first so the common "different size" case never
/// reads any content.
pub fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    let meta_a = fs::metadata(a)?;
    let meta_b = fs::metadata(b)?;
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut file_a = File::open(a)?;
    let mut file_b = File::open(b)?;
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];

    loop {
        let n = file_a.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        file_b.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}
