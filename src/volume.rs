// src/volume.rs

//! Removable volume handling
//!
//! A [`TargetVolume`] is the mounted root of the SD card (or similar). The
//! live installation and the backup store both live directly under it:
//!
//! ```text
//! <volume>/
//!   .rockbox/            TargetTree
//!   .rockbox_backups/    backup store
//! ```

use crate::config::VolumeConfig;
use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lock file name inside the backup store
const LOCK_FILE: &str = ".lock";

/// A mounted volume holding an installation and its backups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetVolume {
    root: PathBuf,
    install_dir: String,
    backup_dir: String,
}

impl TargetVolume {
    /// Create a volume with the default layout
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_layout(root, &VolumeConfig::default())
    }

    /// Create a volume using the directory names from `layout`
    pub fn with_layout(root: impl Into<PathBuf>, layout: &VolumeConfig) -> Self {
        Self {
            root: root.into(),
            install_dir: layout.install_dir.clone(),
            backup_dir: layout.backup_dir.clone(),
        }
    }

    /// Volume root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the installation directory (e.g. `.rockbox`)
    pub fn install_dir_name(&self) -> &str {
        &self.install_dir
    }

    /// The live installation (TargetTree)
    pub fn install_dir(&self) -> PathBuf {
        self.root.join(&self.install_dir)
    }

    /// The backup store
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(&self.backup_dir)
    }

    /// Confirm the volume root accepts writes
    ///
    /// Writes and removes a small probe file. Read-only mounts and write-
    /// protected cards fail here, before anything else is touched.
    pub fn ensure_writable(&self) -> Result<()> {
        let stamp = chrono::Utc::now().timestamp();
        let probe = self.root.join(format!(".write_test_{}", stamp));

        let result = fs::write(&probe, b"ok");
        let _ = fs::remove_file(&probe);

        result.map_err(|e| {
            Error::VolumeError(format!("Cannot write to {}: {}", self.root.display(), e))
        })
    }

    /// Take the exclusive advisory lock for this volume
    ///
    /// Held for backup+merge or for a revert so two runs cannot interleave on
    /// the same card. Creates the backup store if needed.
    pub fn lock(&self) -> Result<VolumeLock> {
        let dir = self.backups_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(LOCK_FILE);
        let file = File::create(&path)?;

        file.try_lock_exclusive().map_err(|e| {
            Error::LockError(format!(
                "Another rbdeploy run holds {} ({})",
                path.display(),
                e
            ))
        })?;

        debug!("Acquired volume lock {}", path.display());
        Ok(VolumeLock { file, path })
    }
}

/// Exclusive lock on a volume, released on drop
#[derive(Debug)]
pub struct VolumeLock {
    file: File,
    path: PathBuf,
}

impl Drop for VolumeLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// Resolve the volume to operate on
///
/// An explicit `mount_path` wins and must exist. Otherwise `label` is looked
/// up under `mount_root`, first exactly and then case-insensitively, since
/// desktop automounters are inconsistent about label case.
pub fn resolve_mount_path(
    label: Option<&str>,
    mount_root: &Path,
    mount_path: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(path) = mount_path {
        if !path.exists() {
            return Err(Error::VolumeError(format!(
                "Mount path does not exist: {}",
                path.display()
            )));
        }
        return Ok(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
    }

    let label = label.ok_or_else(|| {
        Error::VolumeError("Provide a volume label or an explicit mount path".to_string())
    })?;

    let candidate = mount_root.join(label);
    if candidate.is_dir() {
        return Ok(candidate);
    }

    let wanted = label.to_lowercase();
    let entries = fs::read_dir(mount_root).map_err(|e| {
        Error::VolumeError(format!(
            "Cannot read mount root {}: {}",
            mount_root.display(),
            e
        ))
    })?;

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase() == wanted)
                .unwrap_or(false)
        })
        .collect();
    matches.sort();

    match matches.into_iter().next() {
        Some(found) => {
            info!("Resolved label '{}' to {}", label, found.display());
            Ok(found)
        }
        None => Err(Error::VolumeError(format!(
            "Mount path not found for label '{}' under {}",
            label,
            mount_root.display()
        ))),
    }
}
