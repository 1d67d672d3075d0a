// src/commands/mod.rs
//! Command handlers for the rbdeploy CLI

mod backups;
mod deploy;
mod list;
mod revert;

pub use backups::cmd_backups;
pub use deploy::{BuildRequest, cmd_deploy};
pub use list::cmd_list;
pub use revert::cmd_revert;

use crate::cli::VolumeArgs;
use anyhow::Result;
use rbdeploy::config::Config;
use rbdeploy::progress::{CliProgress, LogProgress, ProgressTracker};
use rbdeploy::volume::{TargetVolume, resolve_mount_path};
use std::fmt::Display;
use std::io::IsTerminal;

/// Resolve the target volume from CLI arguments and config
pub(crate) fn resolve_volume(config: &Config, args: &VolumeArgs) -> Result<TargetVolume> {
    let mount_root = args
        .mount_root
        .clone()
        .unwrap_or_else(|| config.volume.mount_root());

    let root = resolve_mount_path(
        args.label.as_deref(),
        &mount_root,
        args.mount_path.as_deref(),
    )?;

    Ok(TargetVolume::with_layout(root, &config.volume))
}

/// A progress bar on a terminal, log lines otherwise
pub(crate) fn progress_reporter() -> Box<dyn ProgressTracker> {
    if std::io::stderr().is_terminal() {
        Box::new(CliProgress::new())
    } else {
        Box::new(LogProgress::new())
    }
}

/// Print up to `max` items, then how many were left out
pub(crate) fn print_capped<T: Display>(items: &[T], max: usize) {
    for item in items.iter().take(max) {
        println!("  {}", item);
    }
    if items.len() > max {
        println!("  ... ({} more)", items.len() - max);
    }
}
