// src/commands/deploy.rs

//! Deploy command - fetch, verify, back up and merge a build

use super::{print_capped, progress_reporter, resolve_volume};
use crate::cli::VolumeArgs;
use anyhow::{Context, Result};
use rbdeploy::config::Config;
use rbdeploy::deploy::{
    ArtifactReference, ArtifactSource, BuildKind, DeployOptions, DeployReport, Deployer,
};
use rbdeploy::hash::Hash;
use rbdeploy::repository::{BuildIndex, FileArtifactSource, HttpArtifactSource, RepositoryClient};
use rbdeploy::volume::TargetVolume;
use std::path::Path;
use tracing::info;

/// Plan lines printed before eliding the rest
const MAX_PLAN_LINES: usize = 50;

/// Where the build comes from
pub struct BuildRequest<'a> {
    pub device: Option<&'a str>,
    pub date: Option<&'a str>,
    pub release: Option<&'a str>,
    pub file: Option<&'a Path>,
    pub checksum: Option<&'a str>,
}

/// Deploy a build onto a volume
pub fn cmd_deploy(
    config: &Config,
    request: BuildRequest<'_>,
    volume_args: &VolumeArgs,
    require_checksum: bool,
    dry_run: bool,
) -> Result<()> {
    let volume = resolve_volume(config, volume_args)?;
    println!("Volume: {}", volume.root().display());

    let options = DeployOptions {
        dry_run,
        require_checksum: require_checksum || config.verify.require_checksum,
    };

    let report = match request.file {
        Some(path) => {
            let reference = local_reference(path, request.checksum)?;
            let source = FileArtifactSource::new(&config.verify);
            run(volume, &source, &reference, options)?
        }
        None => {
            let client = RepositoryClient::new(&config.remote)?;
            let reference = remote_reference(&client, config, &request)?;
            let source = HttpArtifactSource::new(&client, &config.verify);
            run(volume, &source, &reference, options)?
        }
    };

    print_report(&report);
    Ok(())
}

fn run(
    volume: TargetVolume,
    source: &dyn ArtifactSource,
    reference: &ArtifactReference,
    options: DeployOptions,
) -> Result<DeployReport> {
    println!("Build: {} ({})", reference.label, reference.locator);

    let progress = progress_reporter();
    let deployer = Deployer::new(volume, source)
        .with_options(options)
        .with_progress(progress.as_ref());

    match deployer.deploy(reference) {
        Ok(report) => Ok(report),
        Err(failure) => {
            eprintln!("Deploy failed in {}: {}", failure.terminal_state, failure.error);
            if !failure.terminal_state.target_touched() {
                eprintln!("The installation was not modified.");
            } else if failure.written.is_empty() {
                eprintln!("No files were written before the failure.");
            } else {
                eprintln!("Written before the failure ({} files):", failure.written.len());
                for path in failure.written.iter().take(MAX_PLAN_LINES) {
                    eprintln!("  {}", path.display());
                }
                if failure.written.len() > MAX_PLAN_LINES {
                    eprintln!("  ... ({} more)", failure.written.len() - MAX_PLAN_LINES);
                }
            }
            if let Some(backup) = &failure.backup {
                eprintln!(
                    "The previous installation is saved in {}; run `rbdeploy revert` to restore it.",
                    backup.path.display()
                );
            }
            Err(failure.into())
        }
    }
}

fn parse_checksum(checksum: Option<&str>) -> Result<Option<Hash>> {
    checksum
        .map(|s| Hash::parse_prefixed(s).with_context(|| format!("Invalid checksum '{}'", s)))
        .transpose()
}

fn local_reference(path: &Path, checksum: Option<&str>) -> Result<ArtifactReference> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut reference = ArtifactReference::new(path.to_string_lossy())
        .with_kind(BuildKind::Local)
        .with_label(format!("local {}", name));
    if let Some(digest) = parse_checksum(checksum)? {
        reference = reference.with_digest(digest);
    }
    Ok(reference)
}

fn remote_reference(
    client: &RepositoryClient,
    config: &Config,
    request: &BuildRequest<'_>,
) -> Result<ArtifactReference> {
    let device = request
        .device
        .context("A device is required unless deploying a local file")?;
    let index = BuildIndex::new(client, &config.remote);

    let mut reference = match (request.release, request.date) {
        (Some(version), _) => {
            let url = index.release_url(device, version)?;
            ArtifactReference::new(url.as_str())
                .with_kind(BuildKind::Release)
                .with_label(format!("{} release {}", device, version))
        }
        (None, Some(date)) => {
            let url = index.nightly_url(device, date)?;
            ArtifactReference::new(url.as_str())
                .with_kind(BuildKind::Nightly)
                .with_label(format!("{} nightly {}", device, date))
        }
        (None, None) => {
            let (date, url) = index
                .latest_nightly(device)
                .with_context(|| format!("Failed to find the latest nightly for {}", device))?;
            info!("Latest nightly for {} is {}", device, date);
            ArtifactReference::new(url.as_str())
                .with_kind(BuildKind::Nightly)
                .with_label(format!("{} nightly {}", device, date))
        }
    };

    if let Some(digest) = parse_checksum(request.checksum)? {
        reference = reference.with_digest(digest);
    }
    Ok(reference)
}

fn print_report(report: &DeployReport) {
    println!("Integrity: {}", report.verification);

    if report.is_dry_run() {
        println!("\n[DRY RUN] Would make these changes:");
        let pending: Vec<_> = report.plan.pending().collect();
        if pending.is_empty() {
            println!("  (nothing to write)");
        } else {
            print_capped(&pending, MAX_PLAN_LINES);
        }
        for dir in &report.plan.dirs {
            info!("would create directory {}", dir.display());
        }
        println!("\nSummary: {}", report.plan.summary());
        println!("No backup taken and nothing written.");
        return;
    }

    if let Some(backup) = &report.backup {
        println!("Backup: {}", backup.path.display());
    }
    if let Some(result) = &report.merge {
        println!(
            "\nDeployed {}: {} created, {} overwritten, {} unchanged ({} bytes written)",
            report.reference.label,
            result.created,
            result.overwritten,
            result.unchanged,
            result.bytes_written
        );
    }
    println!("State: {}", report.state);
}

