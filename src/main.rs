// src/main.rs

use anyhow::Result;
use clap::Parser;
use rbdeploy::config::Config;
use rbdeploy::{DeployFailure, Error};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Deploy {
            device,
            date,
            release,
            file,
            checksum,
            volume,
            require_checksum,
            dry_run,
        } => commands::cmd_deploy(
            &config,
            commands::BuildRequest {
                device: device.as_deref(),
                date: date.as_deref(),
                release: release.as_deref(),
                file: file.as_deref(),
                checksum: checksum.as_deref(),
            },
            &volume,
            require_checksum,
            dry_run,
        ),
        Commands::Revert {
            backup,
            volume,
            dry_run,
        } => commands::cmd_revert(&config, backup.as_deref(), &volume, dry_run),
        Commands::Backups { volume } => commands::cmd_backups(&config, &volume),
        Commands::List { what, device, max } => {
            commands::cmd_list(&config, what, device.as_deref(), max)
        }
    }
}

/// Exit code for the first classified error in the chain, 1 otherwise
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| {
            if let Some(failure) = cause.downcast_ref::<DeployFailure>() {
                return Some(failure.kind().exit_code());
            }
            cause.downcast_ref::<Error>().map(|e| e.kind().exit_code())
        })
        .unwrap_or(1)
}
