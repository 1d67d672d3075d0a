// src/lib.rs

//! rbdeploy
//!
//! Fetches Rockbox builds and installs them onto removable media without
//! ever leaving the card in a state that cannot be recovered.
//!
//! # Architecture
//!
//! - Verify before touching anything: artifacts are checked against a
//!   supplied or published digest
//! - Stage in scratch space: archives are extracted and validated off-card
//! - Snapshot first: the live installation is archived and read back before
//!   the first write
//! - Non-destructive merge: files are created or overwritten, never removed
//! - Exact revert: restoring a snapshot reproduces the captured tree

pub mod config;
pub mod deploy;
mod error;
pub mod filesystem;
pub mod hash;
pub mod progress;
pub mod repository;
pub mod volume;

pub use config::Config;
pub use deploy::{
    ArtifactReference, ArtifactSource, BackupManager, BackupRecord, BackupSelector, BuildKind,
    DeployFailure, DeployOptions, DeployReport, DeployState, Deployer, MergePlan, RevertOutcome,
    Reverter, VerifyOutcome,
};
pub use error::{Error, ErrorKind, Result};
pub use hash::{Hash, HashAlgorithm, Hasher};
pub use progress::{CliProgress, LogProgress, ProgressTracker, SilentProgress};
pub use volume::TargetVolume;
