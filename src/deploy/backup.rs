// src/deploy/backup.rs

//! Backup store
//!
//! Before a merge writes anything, the live installation is captured into a
//! gzip-compressed tar archive in the backup store:
//!
//! ```text
//! <volume>/.rockbox_backups/
//!   rockbox-backup-20250822-101500.tar.gz
//!   rockbox-backup-20250822-101500-1.tar.gz   second snapshot in the same second
//!   .lock
//! ```
//!
//! Entries are stored under the installation directory name (`.rockbox/...`).
//! A snapshot is assembled in a temporary file, fsynced, read back to confirm
//! it holds every file that was walked, and only then renamed to its final
//! name. Anything that fails along the way leaves no file matching the naming
//! pattern, so listing never sees a partial snapshot.

use crate::error::{Error, Result};
use crate::filesystem::atomic::{sync_dir, TEMP_PREFIX};
use crate::filesystem::path::display_relative;
use crate::filesystem::walk_tree;
use crate::volume::TargetVolume;
use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// File name prefix of every snapshot
pub const BACKUP_PREFIX: &str = "rockbox-backup-";

/// File name suffix of every snapshot
pub const BACKUP_SUFFIX: &str = ".tar.gz";

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

static BACKUP_NAME: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^rockbox-backup-(\d{8}-\d{6})(?:-(\d+))?\.tar\.gz$")
        .expect("valid backup name regex")
});

/// One snapshot in the backup store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// When the snapshot was taken (local time, second resolution)
    pub timestamp: NaiveDateTime,
    /// Disambiguates snapshots taken within the same second
    pub seq: u32,
    /// Archive location
    pub path: PathBuf,
}

/// What a snapshot archive holds, relative to the installation root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupContents {
    /// Whether the installation directory itself existed when captured
    pub has_root: bool,
    pub files: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
}

impl BackupRecord {
    /// Recognize a snapshot by its file name
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let caps = BACKUP_NAME.captures(name)?;
        let timestamp = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT).ok()?;
        let seq = match caps.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };

        Some(Self {
            timestamp,
            seq,
            path: path.to_path_buf(),
        })
    }

    /// Archive file name
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Regular files captured by this snapshot, sorted
    pub fn captured_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.read_contents()?.files)
    }

    /// Read the archive's table of contents
    ///
    /// The first component of every entry is the installation directory and
    /// is stripped. Entries that would escape it are reported as errors.
    pub fn read_contents(&self) -> Result<BackupContents> {
        let file = File::open(&self.path).map_err(|e| {
            Error::BackupError(format!("Cannot open {}: {}", self.path.display(), e))
        })?;
        read_archive_contents(file)
            .map_err(|e| Error::BackupError(format!("{}: {}", self.path.display(), e)))
    }
}

/// Creates and enumerates snapshots of one installation
#[derive(Debug, Clone)]
pub struct BackupManager {
    store: PathBuf,
    target: PathBuf,
    install_dir: String,
}

impl BackupManager {
    /// Manage snapshots of `target`, stored in `store`
    ///
    /// `target`'s final component becomes the archive's top-level directory.
    pub fn new(store: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        let install_dir = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".rockbox".to_string());

        Self {
            store: store.into(),
            target,
            install_dir,
        }
    }

    /// Manager for a volume's installation and backup store
    pub fn for_volume(volume: &TargetVolume) -> Self {
        Self::new(volume.backups_dir(), volume.install_dir())
    }

    /// Backup store directory
    pub fn store(&self) -> &Path {
        &self.store
    }

    /// The tree being protected
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Capture the target tree now
    pub fn snapshot(&self) -> Result<BackupRecord> {
        self.snapshot_at(chrono::Local::now().naive_local())
    }

    /// Capture the target tree, naming the snapshot after `timestamp`
    pub fn snapshot_at(&self, timestamp: NaiveDateTime) -> Result<BackupRecord> {
        fs::create_dir_all(&self.store).map_err(|e| {
            Error::BackupError(format!(
                "Cannot create backup store {}: {}",
                self.store.display(),
                e
            ))
        })?;

        // A non-directory at the target would otherwise snapshot as "absent"
        let has_root = match fs::symlink_metadata(&self.target) {
            Ok(meta) if meta.is_dir() => true,
            Ok(_) => {
                return Err(Error::BackupError(format!(
                    "{} exists but is not a directory",
                    self.target.display()
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(Error::BackupError(format!(
                    "Cannot inspect {}: {}",
                    self.target.display(),
                    e
                )));
            }
        };
        let listing = walk_tree(&self.target)
            .map_err(|e| Error::BackupError(format!("Cannot walk target tree: {}", e)))?;

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".partial")
            .tempfile_in(&self.store)
            .map_err(|e| Error::BackupError(format!("Cannot create temporary archive: {}", e)))?;

        debug!(
            "Writing snapshot of {} ({} files) to {}",
            self.target.display(),
            listing.files.len(),
            temp.path().display()
        );

        self.write_archive(temp.as_file_mut(), has_root, &listing.dirs, &listing.files)
            .map_err(|e| Error::BackupError(format!("Failed to write archive: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Error::BackupError(format!("Failed to sync archive: {}", e)))?;

        // Read back before the snapshot becomes visible
        let written = File::open(temp.path())
            .and_then(read_archive_contents)
            .map_err(|e| Error::BackupError(format!("Archive does not read back: {}", e)))?;
        let expected: BTreeSet<&PathBuf> = listing.files.iter().collect();
        let actual: BTreeSet<&PathBuf> = written.files.iter().collect();
        if expected != actual || written.has_root != has_root {
            return Err(Error::BackupError(format!(
                "Archive incomplete: walked {} files, archive holds {}",
                expected.len(),
                actual.len()
            )));
        }

        let record = self.persist(temp, timestamp)?;
        info!(
            "Backed up {} files to {}",
            listing.files.len(),
            record.path.display()
        );
        Ok(record)
    }

    fn write_archive(
        &self,
        out: &mut File,
        has_root: bool,
        dirs: &[PathBuf],
        files: &[PathBuf],
    ) -> io::Result<()> {
        let encoder = GzEncoder::new(out, Compression::default());
        let mut archive = tar::Builder::new(encoder);

        if has_root {
            archive.append_dir(&self.install_dir, &self.target)?;
        }
        for dir in dirs {
            let name = self.archive_name(dir);
            archive.append_dir(&name, self.target.join(dir))?;
        }
        for file in files {
            let name = self.archive_name(file);
            archive.append_path_with_name(self.target.join(file), &name)?;
        }

        let encoder = archive.into_inner()?;
        encoder.finish()?;
        Ok(())
    }

    fn archive_name(&self, relative: &Path) -> String {
        format!("{}/{}", self.install_dir, display_relative(relative))
    }

    fn persist(
        &self,
        mut temp: tempfile::NamedTempFile,
        timestamp: NaiveDateTime,
    ) -> Result<BackupRecord> {
        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();

        for seq in 0u32..1000 {
            let name = if seq == 0 {
                format!("{}{}{}", BACKUP_PREFIX, stamp, BACKUP_SUFFIX)
            } else {
                format!("{}{}-{}{}", BACKUP_PREFIX, stamp, seq, BACKUP_SUFFIX)
            };
            let path = self.store.join(&name);

            match temp.persist_noclobber(&path) {
                Ok(_) => {
                    sync_dir(&self.store);
                    return Ok(BackupRecord {
                        timestamp,
                        seq,
                        path,
                    });
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    temp = e.file;
                }
                Err(e) => {
                    return Err(Error::BackupError(format!(
                        "Failed to finalize {}: {}",
                        path.display(),
                        e.error
                    )));
                }
            }
        }

        Err(Error::BackupError(format!(
            "Too many snapshots for {} in {}",
            stamp,
            self.store.display()
        )))
    }

    /// All snapshots, most recent first
    ///
    /// Ordered by timestamp, then sequence number, both descending; anything
    /// still tied is ordered by file name. Files that don't follow the naming
    /// pattern are ignored. A missing store is an empty list.
    pub fn list(&self) -> Result<Vec<BackupRecord>> {
        let entries = match fs::read_dir(&self.store) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::BackupError(format!(
                    "Cannot read backup store {}: {}",
                    self.store.display(),
                    e
                )));
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match BackupRecord::from_path(&entry.path()) {
                Some(record) => records.push(record),
                None => debug!("Ignoring {} in backup store", entry.path().display()),
            }
        }

        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(b.seq.cmp(&a.seq))
                .then_with(|| a.file_name().cmp(&b.file_name()))
        });
        Ok(records)
    }

    /// The most recent snapshot, if any
    pub fn latest(&self) -> Result<Option<BackupRecord>> {
        Ok(self.list()?.into_iter().next())
    }
}

/// List a snapshot archive, rejecting entries that escape the installation
/// directory or are not plain files and directories
fn read_archive_contents(file: File) -> io::Result<BackupContents> {
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut contents = BackupContents::default();

    for entry in archive.entries()? {
        let entry = entry?;
        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();

        let Some(relative) = strip_root(&raw) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected entry {:?}", raw),
            ));
        };

        if entry_type.is_dir() {
            match relative {
                None => contents.has_root = true,
                Some(path) => contents.dirs.push(path),
            }
        } else if entry_type.is_file() {
            match relative {
                Some(path) => contents.files.push(path),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("file entry at archive root: {:?}", raw),
                    ));
                }
            }
        } else {
            warn!("Skipping {:?} entry {:?} in snapshot", entry_type, raw);
        }
    }

    if !contents.files.is_empty() || !contents.dirs.is_empty() {
        contents.has_root = true;
    }
    contents.files.sort();
    contents.dirs.sort();
    Ok(contents)
}

/// Split `.rockbox/a/b` into `Some(Some("a/b"))`; the bare root gives
/// `Some(None)`; unsafe names give `None`
pub(crate) fn strip_root(name: &str) -> Option<Option<PathBuf>> {
    let mut components = Path::new(name).components().filter(|c| *c != Component::CurDir);

    match components.next()? {
        Component::Normal(_) => {}
        _ => return None,
    }

    let mut rest = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(c) => rest.push(c),
            _ => return None,
        }
    }

    Some(if rest.as_os_str().is_empty() { None } else { Some(rest) })
}
