// src/deploy/stage.rs

//! Archive staging
//!
//! A verified artifact is unpacked into a private temporary directory before
//! anything on the volume is touched. The staging area is removed when the
//! [`StagedTree`] is dropped, on success and failure alike.

use crate::error::{Error, Result};
use crate::filesystem::path::safe_join;
use crate::filesystem::{walk_tree, TreeListing};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Maximum size of a single extracted entry (512 MB)
pub const MAX_ENTRY_SIZE: u64 = 512 * 1024 * 1024;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Container formats the stager understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveFormat {
    /// Detect the container from its leading bytes
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
            Some(Self::Zip)
        } else if bytes.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else if bytes.len() >= 262 && &bytes[257..262] == b"ustar" {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Files extracted from one artifact
///
/// `root()` is the installation directory inside the staging area, so paths
/// relative to it line up with paths relative to the live tree.
#[derive(Debug)]
pub struct StagedTree {
    _temp: TempDir,
    root: PathBuf,
}

impl StagedTree {
    /// Effective root of the staged installation
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List the staged files and directories
    pub fn listing(&self) -> Result<TreeListing> {
        walk_tree(&self.root)
    }
}

/// Unpack `bytes` and normalize the layout onto `install_dir`
///
/// The installation directory may sit at the top of the archive or below a
/// single wrapper directory. The staging area is created under `parent` when
/// given, otherwise in the system temp directory.
pub fn stage(bytes: &[u8], install_dir: &str, parent: Option<&Path>) -> Result<StagedTree> {
    let format = ArchiveFormat::detect(bytes).ok_or_else(|| {
        Error::ExtractionError("Unrecognized archive format".to_string())
    })?;

    let temp = match parent {
        Some(dir) => tempfile::Builder::new().prefix(".rbdeploy-stage-").tempdir_in(dir),
        None => tempfile::Builder::new().prefix("rbdeploy-stage-").tempdir(),
    }
    .map_err(|e| Error::ExtractionError(format!("Cannot create staging area: {}", e)))?;

    debug!("Staging {:?} archive in {}", format, temp.path().display());

    let count = match format {
        ArchiveFormat::Zip => extract_zip(bytes, temp.path())?,
        ArchiveFormat::TarGz => extract_tar(GzDecoder::new(Cursor::new(bytes)), temp.path())?,
        ArchiveFormat::Tar => extract_tar(Cursor::new(bytes), temp.path())?,
    };

    let root = find_install_root(temp.path(), install_dir)?;
    info!("Staged {} files from artifact", count);

    Ok(StagedTree { _temp: temp, root })
}

fn find_install_root(staging: &Path, install_dir: &str) -> Result<PathBuf> {
    let direct = staging.join(install_dir);
    if direct.is_dir() {
        return Ok(direct);
    }

    let top: Vec<PathBuf> = fs::read_dir(staging)
        .map_err(|e| Error::ExtractionError(format!("Cannot read staging area: {}", e)))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();

    if let [wrapper] = top.as_slice() {
        let nested = wrapper.join(install_dir);
        if wrapper.is_dir() && nested.is_dir() {
            debug!("Unwrapping top-level directory {}", wrapper.display());
            return Ok(nested);
        }
    }

    Err(Error::ExtractionError(format!(
        "archive lacks {}",
        install_dir
    )))
}

fn extract_zip(bytes: &[u8], dest: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| Error::ExtractionError(format!("Invalid zip archive: {}", e)))?;

    let mut count = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| Error::ExtractionError(format!("Bad zip entry #{}: {}", index, e)))?;

        let name = entry.name().to_string();
        let Some(target) = entry_target(dest, &name)? else {
            continue;
        };

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| extract_failed(&name, e))?;
            continue;
        }

        let mode = entry.unix_mode();
        if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            return Err(Error::ExtractionError(format!(
                "Link entries are not allowed: {}",
                name
            )));
        }
        if entry.size() > MAX_ENTRY_SIZE {
            return Err(oversized(&name));
        }

        write_entry(&mut entry, &target, &name, mode)?;
        count += 1;
    }

    Ok(count)
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<usize> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| Error::ExtractionError(format!("Invalid tar archive: {}", e)))?;

    let mut count = 0;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::ExtractionError(format!("Bad tar entry: {}", e)))?;

        // Raw bytes, so `..` reaches our own check instead of tar's
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();

        if entry_type.is_pax_global_extensions() || entry_type.is_pax_local_extensions() {
            continue;
        }

        let Some(target) = entry_target(dest, &name)? else {
            continue;
        };

        if entry_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| extract_failed(&name, e))?;
        } else if entry_type.is_file() {
            let size = entry.header().size().unwrap_or(0);
            if size > MAX_ENTRY_SIZE {
                return Err(oversized(&name));
            }
            let mode = entry.header().mode().ok();
            write_entry(&mut entry, &target, &name, mode)?;
            count += 1;
        } else if entry_type.is_symlink() || entry_type.is_hard_link() {
            return Err(Error::ExtractionError(format!(
                "Link entries are not allowed: {}",
                name
            )));
        } else {
            return Err(Error::ExtractionError(format!(
                "Unsupported entry type {:?}: {}",
                entry_type, name
            )));
        }
    }

    Ok(count)
}

/// Where an entry lands, or `None` for names like `./` that name the root
fn entry_target(dest: &Path, name: &str) -> Result<Option<PathBuf>> {
    if Path::new(name).components().all(|c| c == Component::CurDir) {
        return Ok(None);
    }
    safe_join(dest, name)
        .map(Some)
        .map_err(|e| Error::ExtractionError(format!("Unsafe entry {:?}: {}", name, e)))
}

fn write_entry<R: Read>(reader: &mut R, target: &Path, name: &str, mode: Option<u32>) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| extract_failed(name, e))?;
    }

    let mut file = File::create(target).map_err(|e| extract_failed(name, e))?;
    // Headers can lie about the size; cap what is actually read
    let written = io::copy(&mut reader.take(MAX_ENTRY_SIZE + 1), &mut file)
        .map_err(|e| extract_failed(name, e))?;
    if written > MAX_ENTRY_SIZE {
        return Err(oversized(name));
    }

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        let perms = (mode & 0o777) | 0o600;
        fs::set_permissions(target, fs::Permissions::from_mode(perms))
            .map_err(|e| extract_failed(name, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

fn extract_failed(name: &str, e: io::Error) -> Error {
    Error::ExtractionError(format!("Failed to extract {}: {}", name, e))
}

fn oversized(name: &str) -> Error {
    Error::ExtractionError(format!(
        "Entry {} exceeds the {} byte limit",
        name, MAX_ENTRY_SIZE
    ))
}
