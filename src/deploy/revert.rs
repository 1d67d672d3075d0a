// src/deploy/revert.rs

//! Revert engine
//!
//! Restores the live tree to exactly what a snapshot captured. This is a
//! replacement, not a merge: files added after the snapshot do not survive.
//!
//! The snapshot is unpacked into a temporary directory next to the live
//! tree (same filesystem, so the swap is a pair of renames). The live tree is
//! moved aside, the restored tree moved in, and the old tree discarded. If
//! the second rename fails the old tree is moved back.

use crate::deploy::backup::{strip_root, BackupManager, BackupRecord};
use crate::error::{Error, Result};
use crate::filesystem::atomic::sync_dir;
use crate::filesystem::path::{display_relative, safe_join};
use crate::filesystem::walk_tree;
use crate::progress::ProgressTracker;
use crate::volume::TargetVolume;
use flate2::read::GzDecoder;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Which snapshot to restore
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackupSelector {
    #[default]
    MostRecent,
    Path(PathBuf),
}

impl FromStr for BackupSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "" | "latest" | "most-recent" => Self::MostRecent,
            other => Self::Path(PathBuf::from(other)),
        })
    }
}

/// What restoring does to one live path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RestoreAction {
    /// Written from the snapshot
    Restore,
    /// Not in the snapshot; deleted
    Remove,
}

impl fmt::Display for RestoreAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Restore => "restore",
            Self::Remove => "remove",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreEntry {
    pub path: PathBuf,
    pub action: RestoreAction,
}

impl fmt::Display for RestoreEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<7} {}", self.action, display_relative(&self.path))
    }
}

/// Effect of restoring one snapshot onto the current tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePlan {
    pub backup: BackupRecord,
    /// Restores first, then removals, each in path order
    pub entries: Vec<RestoreEntry>,
    /// The snapshot predates the installation; restoring removes it entirely
    pub removes_target: bool,
}

impl RestorePlan {
    pub fn restores(&self) -> impl Iterator<Item = &RestoreEntry> {
        self.entries
            .iter()
            .filter(|e| e.action == RestoreAction::Restore)
    }

    pub fn removals(&self) -> impl Iterator<Item = &RestoreEntry> {
        self.entries
            .iter()
            .filter(|e| e.action == RestoreAction::Remove)
    }
}

/// Outcome of a completed revert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertResult {
    pub backup: BackupRecord,
    pub restored: usize,
    pub removed: usize,
}

/// Resolve a selector against the backup store
pub fn select_backup(manager: &BackupManager, selector: &BackupSelector) -> Result<BackupRecord> {
    match selector {
        BackupSelector::MostRecent => manager
            .latest()?
            .ok_or_else(|| Error::NoBackupsFound(manager.store().to_path_buf())),
        BackupSelector::Path(path) => {
            if !path.is_file() {
                return Err(Error::RevertError(format!(
                    "Backup not found: {}",
                    path.display()
                )));
            }
            Ok(BackupRecord::from_path(path).unwrap_or_else(|| untimed_record(path)))
        }
    }
}

/// Archives named outside our scheme are still restorable; date them by mtime
fn untimed_record(path: &Path) -> BackupRecord {
    let timestamp = fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| chrono::DateTime::<chrono::Local>::from(t).naive_local())
        .unwrap_or_default();
    BackupRecord {
        timestamp,
        seq: 0,
        path: path.to_path_buf(),
    }
}

/// Compute what restoring `backup` onto `target` would do, without writing
pub fn plan_restore(backup: &BackupRecord, target: &Path) -> Result<RestorePlan> {
    let contents = backup
        .read_contents()
        .map_err(|e| Error::RevertError(e.to_string()))?;
    check_target(target)?;
    let live = walk_tree(target).map_err(|e| Error::RevertError(e.to_string()))?;

    let captured: BTreeSet<&PathBuf> = contents.files.iter().collect();
    let mut entries: Vec<RestoreEntry> = contents
        .files
        .iter()
        .map(|path| RestoreEntry {
            path: path.clone(),
            action: RestoreAction::Restore,
        })
        .collect();
    entries.extend(
        live.files
            .iter()
            .filter(|path| !captured.contains(path))
            .map(|path| RestoreEntry {
                path: path.clone(),
                action: RestoreAction::Remove,
            }),
    );

    Ok(RestorePlan {
        backup: backup.clone(),
        entries,
        removes_target: !contents.has_root && target.exists(),
    })
}

/// Refuse to replace anything but a directory
fn check_target(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if !meta.is_dir() => Err(Error::RevertError(format!(
            "{} exists but is not a directory; refusing to replace it",
            target.display()
        ))),
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(Error::RevertError(format!(
            "Cannot inspect {}: {}",
            target.display(),
            e
        ))),
        _ => Ok(()),
    }
}

fn restore_io(path: &Path, e: io::Error) -> Error {
    Error::RevertError(format!("{}: {}", path.display(), e))
}

/// Replace `target` with the contents of `backup`
pub fn restore(
    backup: &BackupRecord,
    target: &Path,
    progress: &dyn ProgressTracker,
) -> Result<RevertResult> {
    let plan = plan_restore(backup, target)?;
    let contents = backup
        .read_contents()
        .map_err(|e| Error::RevertError(e.to_string()))?;

    let parent = target
        .parent()
        .ok_or_else(|| Error::RevertError(format!("{} has no parent", target.display())))?;
    fs::create_dir_all(parent).map_err(|e| restore_io(parent, e))?;

    let work = tempfile::Builder::new()
        .prefix(".rbdeploy-restore-")
        .tempdir_in(parent)
        .map_err(|e| Error::RevertError(format!("Cannot create restore area: {}", e)))?;
    let fresh = work.path().join("restored");
    let aside = work.path().join("previous");

    progress.begin("Restoring", contents.files.len() as u64);

    if contents.has_root {
        let unpacked = fs::create_dir_all(&fresh)
            .map_err(|e| restore_io(&fresh, e))
            .and_then(|()| unpack_backup(backup, &fresh, progress));
        if let Err(e) = unpacked {
            progress.fail("restore failed");
            return Err(e);
        }
    }

    if target.exists() {
        fs::rename(target, &aside).map_err(|e| {
            Error::RevertError(format!("Cannot move {} aside: {}", target.display(), e))
        })?;
    }

    if contents.has_root
        && let Err(e) = fs::rename(&fresh, target)
    {
        warn!("Swap failed, putting the previous tree back: {}", e);
        if aside.exists()
            && let Err(back) = fs::rename(&aside, target)
        {
            progress.fail("restore failed");
            // Keep the restore area, it now holds the only copy of the tree
            let _ = work.keep();
            return Err(Error::RevertError(format!(
                "Cannot install restored tree ({}) and cannot put the previous tree back ({}); it is at {}",
                e,
                back,
                aside.display()
            )));
        }
        progress.fail("restore failed");
        return Err(Error::RevertError(format!(
            "Cannot install restored tree at {}: {}",
            target.display(),
            e
        )));
    }

    sync_dir(parent);
    // Dropping `work` deletes the previous tree
    drop(work);

    let result = RevertResult {
        backup: backup.clone(),
        restored: plan.restores().count(),
        removed: plan.removals().count(),
    };
    progress.finish("Restore complete");
    info!(
        "Restored {} files from {} ({} removed)",
        result.restored,
        backup.path.display(),
        result.removed
    );
    Ok(result)
}

fn unpack_backup(backup: &BackupRecord, dest: &Path, progress: &dyn ProgressTracker) -> Result<()> {
    let file = File::open(&backup.path).map_err(|e| restore_io(&backup.path, e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_mtime(true);

    let corrupt = |e: std::io::Error| {
        Error::RevertError(format!("Cannot read {}: {}", backup.path.display(), e))
    };

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();

        let relative = match strip_root(&raw) {
            Some(Some(relative)) => relative,
            Some(None) => continue,
            None => {
                return Err(Error::RevertError(format!("Unsafe entry in backup: {:?}", raw)));
            }
        };
        let dest_path = safe_join(dest, &display_relative(&relative))
            .map_err(|e| Error::RevertError(e.to_string()))?;

        if entry_type.is_dir() {
            fs::create_dir_all(&dest_path).map_err(|e| restore_io(&dest_path, e))?;
        } else if entry_type.is_file() {
            if let Some(dir) = dest_path.parent() {
                fs::create_dir_all(dir).map_err(|e| restore_io(dir, e))?;
            }
            entry.unpack(&dest_path).map_err(|e| {
                Error::RevertError(format!("Failed to restore {}: {}", raw, e))
            })?;
            debug!("restored {}", display_relative(&relative));
            progress.advance(&relative);
        }
    }

    Ok(())
}

/// What a revert run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertOutcome {
    Planned(RestorePlan),
    Restored {
        plan: RestorePlan,
        result: RevertResult,
    },
}

/// Selects, plans and restores a snapshot
///
/// With a volume attached the volume lock is held while restoring. In
/// dry-run mode only the plan is computed: no lock, no writes.
#[derive(Debug, Clone)]
pub struct Reverter {
    manager: BackupManager,
    volume: Option<TargetVolume>,
    dry_run: bool,
}

impl Reverter {
    pub fn new(manager: BackupManager) -> Self {
        Self {
            manager,
            volume: None,
            dry_run: false,
        }
    }

    /// Revert a volume's installation from its own backup store
    pub fn for_volume(volume: &TargetVolume) -> Self {
        Self {
            manager: BackupManager::for_volume(volume),
            volume: Some(volume.clone()),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn manager(&self) -> &BackupManager {
        &self.manager
    }

    pub fn run(
        &self,
        selector: &BackupSelector,
        progress: &dyn ProgressTracker,
    ) -> Result<RevertOutcome> {
        let backup = select_backup(&self.manager, selector)?;
        info!("Selected backup {}", backup.path.display());

        let plan = plan_restore(&backup, self.manager.target())?;
        if self.dry_run {
            return Ok(RevertOutcome::Planned(plan));
        }

        let _lock = match &self.volume {
            Some(volume) => {
                volume.ensure_writable()?;
                Some(volume.lock()?)
            }
            None => None,
        };
        let result = restore(&backup, self.manager.target(), progress)?;
        Ok(RevertOutcome::Restored { plan, result })
    }
}
