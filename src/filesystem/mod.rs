// src/filesystem/mod.rs

//! Filesystem operations for rbdeploy
//!
//! This module provides:
//! - Path sanitization for untrusted archive entry names
//! - Crash-safe (write-then-rename) file replacement
//! - Deterministic directory tree listings used by backup, merge and revert

pub mod atomic;
pub mod path;

pub use atomic::{copy_file_atomic, files_identical};
pub use path::{safe_join, sanitize_entry_path};

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Relative listing of a directory tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeListing {
    /// Regular files (and symlinks), relative to the tree root, sorted
    pub files: Vec<PathBuf>,
    /// Directories below the root, relative to it, sorted parents-first
    pub dirs: Vec<PathBuf>,
}

impl TreeListing {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }
}

/// Walk `root` and list everything below it
///
/// Symlinks are listed as files and never followed. A missing root yields an
/// empty listing; any error during the walk is returned, never skipped, since
/// callers rely on the listing being complete.
pub fn walk_tree(root: &Path) -> Result<TreeListing> {
    let mut listing = TreeListing::default();
    if !root.exists() {
        return Ok(listing);
    }

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry.map_err(|e| {
            Error::IoError(format!("Failed to walk {}: {}", root.display(), e))
        })?;

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?
            .to_path_buf();

        if entry.file_type().is_dir() {
            listing.dirs.push(relative);
        } else {
            listing.files.push(relative);
        }
    }

    listing.files.sort();
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_tree_lists_files_and_dirs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("themes/cabbie")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("config.cfg"), b"volume: -20").unwrap();
        fs::write(root.join("themes/cabbie/cabbie.wps"), b"wps").unwrap();

        let listing = walk_tree(root).unwrap();
        assert_eq!(
            listing.files,
            vec![
                PathBuf::from("config.cfg"),
                PathBuf::from("themes/cabbie/cabbie.wps"),
            ]
        );
        assert!(listing.dirs.contains(&PathBuf::from("empty")));
        assert!(listing.dirs.contains(&PathBuf::from("themes")));
        assert!(listing.dirs.contains(&PathBuf::from("themes/cabbie")));
    }

    #[test]
    fn test_walk_tree_missing_root() {
        let temp = TempDir::new().unwrap();
        let listing = walk_tree(&temp.path().join("absent")).unwrap();
        assert!(listing.is_empty());
    }
}
