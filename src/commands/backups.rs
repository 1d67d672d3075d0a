// src/commands/backups.rs

//! Backups command - list snapshots on a volume

use super::resolve_volume;
use crate::cli::VolumeArgs;
use anyhow::{Context, Result};
use rbdeploy::config::Config;
use rbdeploy::deploy::BackupManager;

/// List the backups on a volume, newest first
pub fn cmd_backups(config: &Config, volume_args: &VolumeArgs) -> Result<()> {
    let volume = resolve_volume(config, volume_args)?;
    let manager = BackupManager::for_volume(&volume);
    let backups = manager
        .list()
        .with_context(|| format!("Failed to list {}", manager.store().display()))?;

    if backups.is_empty() {
        println!("No backups in {}", manager.store().display());
        return Ok(());
    }

    println!("Backups in {}:", manager.store().display());
    for (i, backup) in backups.iter().enumerate() {
        let size = std::fs::metadata(&backup.path).map(|m| m.len()).unwrap_or(0);
        let marker = if i == 0 { " (latest)" } else { "" };
        println!(
            "  {}  {}  {:>10} bytes{}",
            backup.timestamp.format("%Y-%m-%d %H:%M:%S"),
            backup.file_name(),
            size,
            marker
        );
    }
    println!("\nTotal: {} backup(s)", backups.len());
    Ok(())
}
