// src/filesystem/path.rs

//! Path sanitization utilities for security
//!
//! Archive entry names come from untrusted input: the integrity check only
//! authenticates an artifact as a whole, never the individual paths inside
//! it. Everything that turns an entry name into a filesystem path goes
//! through here.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Sanitize an archive entry name into a relative path
///
/// Unlike a lenient normalizer this rejects, rather than rewrites, anything
/// that could resolve outside the extraction root:
/// - `..` components anywhere in the path
/// - absolute paths (`/etc/passwd`) and Windows prefixes (`C:\`)
/// - backslash separators, which some archivers emit for Windows paths
///
/// `.` components are dropped. Empty results are rejected.
///
/// # Examples
///
/// ```
/// use rbdeploy::filesystem::path::sanitize_entry_path;
/// use std::path::PathBuf;
///
/// assert_eq!(
///     sanitize_entry_path(".rockbox/rockbox.rock").unwrap(),
///     PathBuf::from(".rockbox/rockbox.rock")
/// );
/// assert!(sanitize_entry_path("../etc/passwd").is_err());
/// assert!(sanitize_entry_path("/etc/passwd").is_err());
/// ```
pub fn sanitize_entry_path(name: &str) -> Result<PathBuf> {
    if name.contains('\\') {
        return Err(Error::PathTraversal(format!(
            "Backslash in entry name: {}",
            name
        )));
    }

    let mut normalized = PathBuf::new();

    for component in Path::new(name).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal(name.to_string()));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::PathTraversal(format!(
                    "Absolute entry name: {}",
                    name
                )));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidPath(format!(
            "Empty entry name after sanitization: {:?}",
            name
        )));
    }

    Ok(normalized)
}

/// Safely join a root path with an untrusted entry name
///
/// The name is sanitized first; the joined result is then checked to still
/// sit under `root`, and, when both exist on disk, their canonical forms are
/// compared as well so a symlinked intermediate directory cannot redirect the
/// write.
pub fn safe_join(root: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
    let root = root.as_ref();
    let sanitized = sanitize_entry_path(name)?;
    let joined = root.join(&sanitized);

    if !joined.starts_with(root) {
        return Err(Error::PathTraversal(format!(
            "{} resolves outside {}",
            joined.display(),
            root.display()
        )));
    }

    if let (Ok(canonical_root), Some(parent)) = (root.canonicalize(), joined.parent())
        && let Ok(canonical_parent) = parent.canonicalize()
        && !canonical_parent.starts_with(&canonical_root)
    {
        return Err(Error::PathTraversal(format!(
            "{} is reached through a link leaving {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}

/// Render a relative path with forward slashes for reports
pub fn display_relative(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
