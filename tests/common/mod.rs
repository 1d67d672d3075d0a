// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use rbdeploy::deploy::{ArtifactReference, ArtifactSource, ChecksumManifest};
use rbdeploy::volume::TargetVolume;
use rbdeploy::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

pub const NIGHTLY_URL: &str =
    "https://download.example.org/daily/ipod6g/rockbox-ipod6g-20250822.zip";

/// Build a zip archive in memory; every name is used verbatim
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A build archive holding `files` under `.rockbox/`
pub fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let named: Vec<(String, &[u8])> = files
        .iter()
        .map(|(path, data)| (format!(".rockbox/{}", path), *data))
        .collect();
    let entries: Vec<(&str, &[u8])> = named.iter().map(|(n, d)| (n.as_str(), *d)).collect();
    zip_bytes(&entries)
}

/// A tar archive whose single entry name is written raw, bypassing the
/// builder's own path checks
pub fn raw_tar_bytes(name: &str, data: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    let raw = &mut header.as_old_mut().name;
    raw[..name.len()].copy_from_slice(name.as_bytes());
    header.set_cksum();
    builder.append(&header, data).unwrap();
    builder.into_inner().unwrap()
}

/// Artifact source serving fixed bytes and an optional manifest
pub struct MemorySource {
    pub bytes: Vec<u8>,
    pub manifest: Option<String>,
}

impl MemorySource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            manifest: None,
        }
    }

    /// Publish a `sha256sum`-style manifest line for `artifact_name`
    pub fn with_manifest_for(mut self, artifact_name: &str, digest_hex: &str) -> Self {
        self.manifest = Some(format!("{}  {}\n", digest_hex, artifact_name));
        self
    }
}

impl ArtifactSource for MemorySource {
    fn fetch(&self, _reference: &ArtifactReference) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn fetch_manifest(&self, _reference: &ArtifactReference) -> Result<Option<ChecksumManifest>> {
        Ok(self
            .manifest
            .as_ref()
            .map(|text| ChecksumManifest::parse("memory://SHA256SUMS", text)))
    }
}

/// Source whose every request fails like an unreachable mirror
pub struct OfflineSource;

impl ArtifactSource for OfflineSource {
    fn fetch(&self, reference: &ArtifactReference) -> Result<Vec<u8>> {
        Err(Error::DownloadError(format!(
            "Failed to fetch {}: connection refused",
            reference.locator
        )))
    }

    fn fetch_manifest(&self, _reference: &ArtifactReference) -> Result<Option<ChecksumManifest>> {
        Ok(None)
    }
}

/// A scratch volume; keep the TempDir alive for the duration of the test
pub fn setup_volume() -> (TempDir, TargetVolume) {
    let temp = TempDir::new().unwrap();
    let volume = TargetVolume::new(temp.path());
    (temp, volume)
}

/// Write `files` below `root`, creating parents
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (path, data) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, data).unwrap();
    }
}

/// Every regular file below `root` with its contents, keyed by relative path
pub fn read_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    if !root.exists() {
        return BTreeMap::new();
    }
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Modification time of every entry below `root`
pub fn mtimes(root: &Path) -> BTreeMap<PathBuf, SystemTime> {
    if !root.exists() {
        return BTreeMap::new();
    }
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            (rel, e.metadata().unwrap().modified().unwrap())
        })
        .collect()
}

/// Names in a directory, sorted; empty when it doesn't exist
pub fn dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn tree(files: &[(&str, &[u8])]) -> BTreeMap<PathBuf, Vec<u8>> {
    files
        .iter()
        .map(|(p, d)| (PathBuf::from(p), d.to_vec()))
        .collect()
}
