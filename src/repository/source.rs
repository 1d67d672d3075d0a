// src/repository/source.rs

//! Artifact sources for the deploy pipeline
//!
//! Both sources look for a checksum next to the artifact: a per-file digest
//! (`<artifact>.sha256`, `.sha512`, `.md5`) first, then the directory-level
//! manifests named in the configuration (`SHA256SUMS`, `MD5SUMS`, ...).

use crate::config::VerifyConfig;
use crate::deploy::verify::ChecksumManifest;
use crate::deploy::{ArtifactReference, ArtifactSource};
use crate::error::{Error, Result};
use crate::repository::client::{Fetched, RepositoryClient};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

/// Per-artifact digest file suffixes, in lookup order
pub const DIGEST_SUFFIXES: &[&str] = &["sha256", "sha512", "md5"];

fn create_progress_bar(name: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .expect("Invalid progress bar template")
            .progress_chars("=>-"),
    );
    pb.set_message(name.to_string());
    pb
}

/// Manifest candidates for an artifact, in lookup order
fn candidate_names(artifact_name: &str, manifest_names: &[String]) -> Vec<String> {
    DIGEST_SUFFIXES
        .iter()
        .map(|suffix| format!("{}.{}", artifact_name, suffix))
        .chain(manifest_names.iter().cloned())
        .collect()
}

/// First manifest among `candidates` that has an entry for `artifact_name`
fn first_matching<F>(
    artifact_name: &str,
    candidates: &[String],
    mut load: F,
) -> Result<Option<ChecksumManifest>>
where
    F: FnMut(&str) -> Result<Option<(String, String)>>,
{
    for candidate in candidates {
        let Some((origin, text)) = load(candidate)? else {
            continue;
        };
        let manifest = ChecksumManifest::parse(&origin, &text);
        if manifest.find(artifact_name).is_some() {
            info!("Using checksum manifest {}", origin);
            return Ok(Some(manifest));
        }
        debug!("{} has no entry for {}", origin, artifact_name);
    }
    Ok(None)
}

/// Artifacts served over HTTP(S)
pub struct HttpArtifactSource<'a> {
    client: &'a RepositoryClient,
    manifest_names: Vec<String>,
    show_progress: bool,
}

impl<'a> HttpArtifactSource<'a> {
    pub fn new(client: &'a RepositoryClient, verify: &VerifyConfig) -> Self {
        Self {
            client,
            manifest_names: verify.manifest_names.clone(),
            show_progress: std::io::stderr().is_terminal(),
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn parse_locator(reference: &ArtifactReference) -> Result<Url> {
        Url::parse(&reference.locator).map_err(|e| {
            Error::ConfigError(format!("Invalid artifact URL '{}': {}", reference.locator, e))
        })
    }
}

impl ArtifactSource for HttpArtifactSource<'_> {
    fn fetch(&self, reference: &ArtifactReference) -> Result<Vec<u8>> {
        let url = Self::parse_locator(reference)?;
        let bar = self
            .show_progress
            .then(|| create_progress_bar(reference.artifact_name()));

        let result = self.client.download_to_bytes(url.as_str(), bar.as_ref());
        if let (Err(e), Some(pb)) = (&result, &bar) {
            pb.abandon_with_message(format!("{} [FAILED: {}]", reference.artifact_name(), e));
        }
        result
    }

    fn fetch_manifest(&self, reference: &ArtifactReference) -> Result<Option<ChecksumManifest>> {
        let url = Self::parse_locator(reference)?;
        let artifact_name = reference.artifact_name();
        let candidates = candidate_names(artifact_name, &self.manifest_names);

        first_matching(artifact_name, &candidates, |name| {
            let Ok(manifest_url) = url.join(name) else {
                return Ok(None);
            };
            match self.client.fetch_optional(manifest_url.as_str())? {
                Fetched::Found(bytes) => Ok(Some((
                    manifest_url.to_string(),
                    String::from_utf8_lossy(&bytes).into_owned(),
                ))),
                Fetched::Missing(_) => Ok(None),
            }
        })
    }
}

/// Artifacts already on local disk
#[derive(Debug, Clone, Default)]
pub struct FileArtifactSource {
    manifest_names: Vec<String>,
}

impl FileArtifactSource {
    pub fn new(verify: &VerifyConfig) -> Self {
        Self {
            manifest_names: verify.manifest_names.clone(),
        }
    }

    fn sibling(path: &Path, name: &str) -> PathBuf {
        match path.parent() {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

impl ArtifactSource for FileArtifactSource {
    fn fetch(&self, reference: &ArtifactReference) -> Result<Vec<u8>> {
        let path = Path::new(&reference.locator);
        info!("Reading {}", path.display());
        fs::read(path).map_err(|e| Error::IoError(format!("Cannot read {}: {}", path.display(), e)))
    }

    fn fetch_manifest(&self, reference: &ArtifactReference) -> Result<Option<ChecksumManifest>> {
        let path = Path::new(&reference.locator);
        let artifact_name = reference.artifact_name();
        let candidates = candidate_names(artifact_name, &self.manifest_names);

        first_matching(artifact_name, &candidates, |name| {
            let candidate = Self::sibling(path, name);
            if !candidate.is_file() {
                return Ok(None);
            }
            let text = fs::read_to_string(&candidate)?;
            Ok(Some((candidate.display().to_string(), text)))
        })
    }
}
