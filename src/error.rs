// src/error.rs

//! Crate-wide error type
//!
//! Every failure the deployment engine can produce maps onto one
//! [`ErrorKind`], which is what callers (and the CLI's exit codes) branch on.

use crate::hash::{HashAlgorithm, HashError};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for rbdeploy operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("HTTP 403 Forbidden for {0}")]
    Forbidden(String),

    #[error("Integrity check failed: {algorithm} mismatch (expected {expected}, got {actual})")]
    IntegrityMismatch {
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },

    #[error("Checksum verification required but no digest is available for {0}")]
    ChecksumRequired(String),

    #[error("Extraction failed: {0}")]
    ExtractionError(String),

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Backup failed: {0}")]
    BackupError(String),

    #[error("Merge conflict at {}: {reason}", .path.display())]
    MergeConflict { path: PathBuf, reason: String },

    #[error(
        "Merge failed at {} after {completed}/{planned} actions: {reason}",
        .path.display()
    )]
    MergeError {
        completed: usize,
        planned: usize,
        path: PathBuf,
        reason: String,
    },

    #[error("No backups found in {}", .0.display())]
    NoBackupsFound(PathBuf),

    #[error("Revert failed: {0}")]
    RevertError(String),

    #[error("Volume error: {0}")]
    VolumeError(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid digest: {0}")]
    Hash(#[from] HashError),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Integrity,
    Extraction,
    Backup,
    Merge,
    Revert,
    Volume,
    Config,
    Lock,
    Io,
}

impl ErrorKind {
    /// Process exit code used by the CLI for this kind
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Volume | Self::Config => 2,
            Self::Network => 3,
            Self::Integrity => 4,
            Self::Extraction => 5,
            Self::Backup => 6,
            Self::Merge => 7,
            Self::Revert => 8,
            Self::Lock | Self::Io => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Integrity => "integrity",
            Self::Extraction => "extraction",
            Self::Backup => "backup",
            Self::Merge => "merge",
            Self::Revert => "revert",
            Self::Volume => "volume",
            Self::Config => "config",
            Self::Lock => "lock",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DownloadError(_) | Self::Forbidden(_) => ErrorKind::Network,
            Self::IntegrityMismatch { .. } | Self::ChecksumRequired(_) => ErrorKind::Integrity,
            Self::ExtractionError(_) | Self::PathTraversal(_) => ErrorKind::Extraction,
            Self::BackupError(_) => ErrorKind::Backup,
            Self::MergeConflict { .. } | Self::MergeError { .. } => ErrorKind::Merge,
            Self::NoBackupsFound(_) | Self::RevertError(_) => ErrorKind::Revert,
            Self::VolumeError(_) | Self::InvalidPath(_) => ErrorKind::Volume,
            Self::ConfigError(_) | Self::ParseError(_) | Self::Hash(_) => ErrorKind::Config,
            Self::LockError(_) => ErrorKind::Lock,
            Self::Io(_) | Self::IoError(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = Error::IntegrityMismatch {
            algorithm: HashAlgorithm::Sha256,
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(err.kind().exit_code(), 4);

        assert_eq!(
            Error::ChecksumRequired("x.zip".to_string()).kind(),
            ErrorKind::Integrity
        );
        assert_eq!(
            Error::PathTraversal("../x".to_string()).kind(),
            ErrorKind::Extraction
        );
        assert_eq!(
            Error::NoBackupsFound(PathBuf::from("/media/H2/.rockbox_backups")).kind(),
            ErrorKind::Revert
        );
    }

    #[test]
    fn test_merge_error_reports_progress() {
        let err = Error::MergeError {
            completed: 3,
            planned: 10,
            path: PathBuf::from("codecs/mpa.codec"),
            reason: "No space left on device".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3/10"));
        assert!(msg.contains("codecs/mpa.codec"));
        assert_eq!(err.kind(), ErrorKind::Merge);
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
