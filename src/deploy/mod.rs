// src/deploy/mod.rs

//! Safe deployment pipeline
//!
//! A deploy moves through these states, strictly in order:
//!
//! ```text
//! INIT -> VERIFIED -> STAGED -> BACKED_UP -> MERGE_PLANNED -> MERGED
//!                        \
//!                         `-> MERGE_PLANNED -> DRY_RUN_REPORTED   (dry run)
//! ```
//!
//! Any failure up to and including staging ends in `ABORTED` with the live
//! tree untouched. A failure after the backup ends in `MERGE_FAILED`; the
//! snapshot taken in `BACKED_UP` is the recovery point.

pub mod backup;
pub mod merge;
pub mod planner;
pub mod revert;
pub mod stage;
pub mod verify;

pub use backup::{BackupContents, BackupManager, BackupRecord};
pub use merge::{apply, completed_paths, MergeResult};
pub use planner::{plan, MergeAction, MergePlan, PlanSummary, PlannedAction};
pub use revert::{
    BackupSelector, RestoreAction, RestoreEntry, RestorePlan, RevertOutcome, RevertResult,
    Reverter,
};
pub use stage::{stage, ArchiveFormat, StagedTree};
pub use verify::{ChecksumManifest, DigestSource, VerificationPolicy, VerifyOutcome};

use crate::error::{Error, ErrorKind, Result};
use crate::hash::Hash;
use crate::progress::{ProgressTracker, SilentProgress};
use crate::volume::TargetVolume;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

/// Nightly builds vs tagged releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildKind {
    #[default]
    Nightly,
    Release,
    /// An archive on local disk
    Local,
}

impl fmt::Display for BuildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Nightly => "nightly",
            Self::Release => "release",
            Self::Local => "local",
        })
    }
}

/// One resolved artifact to install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReference {
    /// URL or local path
    pub locator: String,
    /// Digest the caller insists on; makes verification mandatory
    pub expected_digest: Option<Hash>,
    /// Human-readable description (`nightly 20250822`, `release 4.0`)
    pub label: String,
    pub kind: BuildKind,
}

impl ArtifactReference {
    pub fn new(locator: impl Into<String>) -> Self {
        let locator = locator.into();
        Self {
            label: locator.clone(),
            locator,
            expected_digest: None,
            kind: BuildKind::default(),
        }
    }

    pub fn with_digest(mut self, digest: Hash) -> Self {
        self.expected_digest = Some(digest);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_kind(mut self, kind: BuildKind) -> Self {
        self.kind = kind;
        self
    }

    /// File name of the artifact, used to find it in checksum manifests
    pub fn artifact_name(&self) -> &str {
        let trimmed = self.locator.split(['?', '#']).next().unwrap_or(&self.locator);
        trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
    }
}

/// Where artifact bytes and their checksum manifests come from
pub trait ArtifactSource {
    /// Fetch the artifact
    fn fetch(&self, reference: &ArtifactReference) -> Result<Vec<u8>>;

    /// Fetch a checksum manifest published alongside the artifact
    ///
    /// `Ok(None)` means none is published; errors are reserved for failures
    /// to find out.
    fn fetch_manifest(&self, reference: &ArtifactReference) -> Result<Option<ChecksumManifest>>;
}

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Init,
    Verified,
    Staged,
    BackedUp,
    MergePlanned,
    Merged,
    DryRunReported,
    Aborted,
    MergeFailed,
}

impl DeployState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Verified => "VERIFIED",
            Self::Staged => "STAGED",
            Self::BackedUp => "BACKED_UP",
            Self::MergePlanned => "MERGE_PLANNED",
            Self::Merged => "MERGED",
            Self::DryRunReported => "DRY_RUN_REPORTED",
            Self::Aborted => "ABORTED",
            Self::MergeFailed => "MERGE_FAILED",
        }
    }

    /// Whether the live tree may have been written in this state
    pub fn target_touched(&self) -> bool {
        matches!(self, Self::Merged | Self::MergeFailed)
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deploy that did not finish
#[derive(Debug, thiserror::Error)]
#[error("{error} [{terminal_state} after {last_completed}]")]
pub struct DeployFailure {
    /// `ABORTED` or `MERGE_FAILED`
    pub terminal_state: DeployState,
    pub last_completed: DeployState,
    /// Snapshot to revert to, when one was taken
    pub backup: Option<BackupRecord>,
    /// Files the merge finished writing before it stopped, in plan order
    pub written: Vec<PathBuf>,
    #[source]
    pub error: Error,
}

impl DeployFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// What a deploy did (or, in a dry run, would do)
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub reference: ArtifactReference,
    pub verification: VerifyOutcome,
    pub plan: MergePlan,
    pub backup: Option<BackupRecord>,
    pub merge: Option<MergeResult>,
    pub state: DeployState,
}

impl DeployReport {
    pub fn is_dry_run(&self) -> bool {
        self.state == DeployState::DryRunReported
    }
}

/// Deploy options
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    /// Plan only; no lock, no backup, no writes
    pub dry_run: bool,
    /// Refuse artifacts without a digest even when none was supplied
    pub require_checksum: bool,
}

/// Runs the deploy pipeline against one volume
pub struct Deployer<'a> {
    volume: TargetVolume,
    source: &'a dyn ArtifactSource,
    options: DeployOptions,
    progress: Option<&'a dyn ProgressTracker>,
}

impl<'a> Deployer<'a> {
    pub fn new(volume: TargetVolume, source: &'a dyn ArtifactSource) -> Self {
        Self {
            volume,
            source,
            options: DeployOptions::default(),
            progress: None,
        }
    }

    pub fn with_options(mut self, options: DeployOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.options.dry_run = dry_run;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn volume(&self) -> &TargetVolume {
        &self.volume
    }

    /// Verification policy for `reference`
    ///
    /// A caller-supplied digest or the `require_checksum` option make it
    /// mandatory; otherwise a missing digest is reported and tolerated.
    pub fn policy_for(&self, reference: &ArtifactReference) -> VerificationPolicy {
        if reference.expected_digest.is_some() || self.options.require_checksum {
            VerificationPolicy::Required
        } else {
            VerificationPolicy::Optional
        }
    }

    /// Run the pipeline for `reference`
    pub fn deploy(
        &self,
        reference: &ArtifactReference,
    ) -> std::result::Result<DeployReport, DeployFailure> {
        let mut last = DeployState::Init;

        info!("Deploying {} to {}", reference.label, self.volume.root().display());

        // INIT -> VERIFIED
        let bytes = self
            .source
            .fetch(reference)
            .map_err(|e| self.failure(last, None, e))?;
        let digest_source = match &reference.expected_digest {
            Some(digest) => DigestSource::Explicit(digest.clone()),
            None => match self
                .source
                .fetch_manifest(reference)
                .map_err(|e| self.failure(last, None, e))?
            {
                Some(manifest) => DigestSource::Manifest(manifest),
                None => DigestSource::Unavailable,
            },
        };
        let artifact_name = reference.artifact_name();
        let verification = verify::verify(&bytes, artifact_name, &digest_source);
        verify::enforce(&verification, self.policy_for(reference), artifact_name)
            .map_err(|e| self.failure(last, None, e))?;
        last = DeployState::Verified;

        // VERIFIED -> STAGED
        let staged = stage(&bytes, self.volume.install_dir_name(), None)
            .map_err(|e| self.failure(last, None, e))?;
        drop(bytes);
        last = DeployState::Staged;

        let target = self.volume.install_dir();

        if self.options.dry_run {
            let merge_plan =
                plan(staged.root(), &target).map_err(|e| self.failure(last, None, e))?;
            info!("Dry run: {}", merge_plan.summary());
            return Ok(DeployReport {
                reference: reference.clone(),
                verification,
                plan: merge_plan,
                backup: None,
                merge: None,
                state: DeployState::DryRunReported,
            });
        }

        // STAGED -> BACKED_UP
        self.volume
            .ensure_writable()
            .map_err(|e| self.failure(last, None, e))?;
        let _lock = self
            .volume
            .lock()
            .map_err(|e| self.failure(last, None, e))?;
        let record = BackupManager::for_volume(&self.volume)
            .snapshot()
            .map_err(|e| self.failure(last, None, e))?;
        let backup = Some(record.clone());
        last = DeployState::BackedUp;

        // BACKED_UP -> MERGE_PLANNED
        let merge_plan = plan(staged.root(), &target)
            .map_err(|e| self.failure(last, backup.clone(), e))?;
        last = DeployState::MergePlanned;

        // MERGE_PLANNED -> MERGED
        let silent = SilentProgress::new();
        let progress: &dyn ProgressTracker = match self.progress {
            Some(progress) => progress,
            None => &silent,
        };
        let result = apply(&merge_plan, staged.root(), &target, progress).map_err(|e| {
            let written = match &e {
                Error::MergeError { completed, .. } => completed_paths(&merge_plan, *completed),
                _ => Vec::new(),
            };
            DeployFailure {
                written,
                ..self.failure(last, backup.clone(), e)
            }
        })?;

        info!(
            "Deployed {}: {} written, {} unchanged, backup at {}",
            reference.label,
            result.written(),
            result.unchanged,
            record.path.display()
        );

        Ok(DeployReport {
            reference: reference.clone(),
            verification,
            plan: merge_plan,
            backup,
            merge: Some(result),
            state: DeployState::Merged,
        })
    }

    fn failure(
        &self,
        last_completed: DeployState,
        backup: Option<BackupRecord>,
        error: Error,
    ) -> DeployFailure {
        let terminal_state = match last_completed {
            DeployState::BackedUp | DeployState::MergePlanned => DeployState::MergeFailed,
            _ => DeployState::Aborted,
        };
        warn!(
            "Deploy {} after {}: {}",
            terminal_state, last_completed, error
        );
        DeployFailure {
            terminal_state,
            last_completed,
            backup,
            written: Vec::new(),
            error,
        }
    }
}
