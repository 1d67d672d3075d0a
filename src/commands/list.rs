// src/commands/list.rs

//! List command - discover releases, devices and nightly builds

use super::print_capped;
use crate::cli::ListKind;
use anyhow::{Context, Result};
use rbdeploy::config::Config;
use rbdeploy::repository::{BuildIndex, RepositoryClient};

/// List what the distribution point offers
pub fn cmd_list(config: &Config, what: ListKind, device: Option<&str>, max: usize) -> Result<()> {
    let client = RepositoryClient::new(&config.remote)?;
    let index = BuildIndex::new(&client, &config.remote);

    match what {
        ListKind::Releases => {
            let releases = index.list_releases().context("Failed to list releases")?;
            println!("Releases ({}):", releases.len());
            print_capped(&releases, max);
        }
        ListKind::Devices => {
            let devices = index.list_devices().context("Failed to list devices")?;
            println!("Devices with nightly builds ({}):", devices.len());
            print_capped(&devices, max);
        }
        ListKind::Dailies => {
            let device = device.context("--device is required to list nightly builds")?;
            let dates = index
                .list_dailies(device)
                .with_context(|| format!("Failed to list nightly builds for {}", device))?;
            if dates.is_empty() {
                println!("No nightly builds found for {}", device);
                return Ok(());
            }
            println!("Nightly builds for {} ({}):", device, dates.len());
            print_capped(&dates, max);
        }
    }
    Ok(())
}
