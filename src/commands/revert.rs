// src/commands/revert.rs

//! Revert command - restore the installation from a backup

use super::{print_capped, progress_reporter, resolve_volume};
use crate::cli::VolumeArgs;
use anyhow::Result;
use rbdeploy::config::Config;
use rbdeploy::deploy::{BackupSelector, RestorePlan, RevertOutcome, Reverter};
use tracing::info;

const MAX_PLAN_LINES: usize = 50;

/// Restore a volume's installation from a backup
pub fn cmd_revert(
    config: &Config,
    backup: Option<&str>,
    volume_args: &VolumeArgs,
    dry_run: bool,
) -> Result<()> {
    let volume = resolve_volume(config, volume_args)?;
    let selector: BackupSelector = backup.unwrap_or_default().parse()?;
    info!("Reverting {} (dry_run={})", volume.install_dir().display(), dry_run);

    let progress = progress_reporter();
    let reverter = Reverter::for_volume(&volume).with_dry_run(dry_run);

    match reverter.run(&selector, progress.as_ref())? {
        RevertOutcome::Planned(plan) => {
            print_plan(&plan);
            println!("\n[DRY RUN] Nothing written.");
        }
        RevertOutcome::Restored { plan, result } => {
            print_plan(&plan);
            println!(
                "\nRestored {} from {}: {} files restored, {} removed",
                volume.install_dir().display(),
                result.backup.file_name(),
                result.restored,
                result.removed
            );
        }
    }
    Ok(())
}

fn print_plan(plan: &RestorePlan) {
    println!(
        "Backup: {} ({})",
        plan.backup.path.display(),
        plan.backup.timestamp.format("%Y-%m-%d %H:%M:%S")
    );

    if plan.removes_target {
        println!("The backup predates the installation; it will be removed entirely.");
    }

    let restores: Vec<_> = plan.restores().collect();
    let removals: Vec<_> = plan.removals().collect();
    println!("\nRestore {} files:", restores.len());
    print_capped(&restores, MAX_PLAN_LINES);
    if !removals.is_empty() {
        println!("\nRemove {} files not in the backup:", removals.len());
        print_capped(&removals, MAX_PLAN_LINES);
    }
}
