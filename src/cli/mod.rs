// src/cli/mod.rs
//! CLI definitions for rbdeploy
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `deploy` - Fetch, verify, back up and merge a build onto a volume
//! - `revert` - Restore the installation from a backup
//! - `backups` - List the backups on a volume
//! - `list` - Discover releases, devices and nightly builds

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rbdeploy")]
#[command(version)]
#[command(about = "Fetch Rockbox builds and deploy them with backup and revert", long_about = None)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: $RBDEPLOY_CONFIG or ~/.config/rbdeploy/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// How to find the target volume
#[derive(Args, Debug, Clone)]
pub struct VolumeArgs {
    /// Volume label, looked up under the mount root
    #[arg(short, long)]
    pub label: Option<String>,

    /// Explicit mount path of the volume (overrides --label)
    #[arg(short = 'm', long, value_name = "PATH")]
    pub mount_path: Option<PathBuf>,

    /// Directory volumes are mounted under (default: /run/media/$USER)
    #[arg(long, value_name = "PATH")]
    pub mount_root: Option<PathBuf>,
}

/// What `list` enumerates
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Releases,
    Devices,
    Dailies,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy a build onto a volume
    ///
    /// Without --date or --release the newest nightly for the device is
    /// used. The live installation is backed up before anything is written.
    Deploy {
        /// Device model (e.g. ipod6g, erosqnative)
        #[arg(short, long, required_unless_present = "file")]
        device: Option<String>,

        /// Nightly build date (YYYYMMDD)
        #[arg(long, conflicts_with_all = ["release", "file"])]
        date: Option<String>,

        /// Release version (e.g. 4.0)
        #[arg(short, long, conflicts_with = "file")]
        release: Option<String>,

        /// Deploy a local archive instead of downloading
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Expected digest, as `sha256:<hex>` or bare hex
        #[arg(long, value_name = "DIGEST")]
        checksum: Option<String>,

        #[command(flatten)]
        volume: VolumeArgs,

        /// Refuse builds without a published or supplied checksum
        #[arg(long)]
        require_checksum: bool,

        /// Show what would change without writing to the volume
        #[arg(long)]
        dry_run: bool,
    },

    /// Restore the installation from a backup
    Revert {
        /// Backup archive to restore, or `latest` (default)
        #[arg(value_name = "BACKUP")]
        backup: Option<String>,

        #[command(flatten)]
        volume: VolumeArgs,

        /// Show what would change without writing to the volume
        #[arg(long)]
        dry_run: bool,
    },

    /// List backups on a volume, newest first
    Backups {
        #[command(flatten)]
        volume: VolumeArgs,
    },

    /// List available builds
    List {
        /// What to list
        #[arg(value_enum)]
        what: ListKind,

        /// Device model (required for dailies)
        #[arg(short, long, required_if_eq("what", "dailies"))]
        device: Option<String>,

        /// Show at most this many entries
        #[arg(short = 'n', long, default_value = "20")]
        max: usize,
    },
}
