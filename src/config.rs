// src/config.rs

//! Configuration for rbdeploy
//!
//! All settings have working defaults, so a config file is optional. When one
//! is present it is TOML, looked up in this order:
//!
//! 1. an explicit path (the CLI's `--config`)
//! 2. `$RBDEPLOY_CONFIG`
//! 3. `<config dir>/rbdeploy/config.toml` (e.g. `~/.config/rbdeploy/config.toml`)
//!
//! ```toml
//! [remote]
//! timeout_secs = 60
//!
//! [volume]
//! mount_root = "/media/me"
//!
//! [verify]
//! require_checksum = true
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "RBDEPLOY_CONFIG";

/// Distribution point settings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of tagged releases (`<base>/<version>/rockbox-<device>-<version>.zip`)
    pub release_base: String,
    /// Base URL of nightly builds (`<base>/<device>/rockbox-<device>-<date>.zip`)
    pub daily_base: String,
    /// Status page listing nightly builds, used when the index is unavailable
    pub daily_page: String,
    /// User-Agent header; some mirrors reject non-browser agents with 403
    pub user_agent: String,
    /// Timeout for index pages and checksum manifests
    pub timeout_secs: u64,
    /// Timeout for artifact downloads
    pub download_timeout_secs: u64,
    /// Total attempts for transient failures
    pub max_retries: u32,
    /// Linear backoff step between attempts
    pub retry_delay_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            release_base: "https://download.rockbox.org/release/".to_string(),
            daily_base: "https://download.rockbox.org/daily/".to_string(),
            daily_page: "https://www.rockbox.org/daily.shtml".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0"
                .to_string(),
            timeout_secs: 20,
            download_timeout_secs: 60,
            max_retries: 3,
            retry_delay_ms: 400,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Removable volume layout
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VolumeConfig {
    /// Directory under which removable volumes are mounted
    pub mount_root: Option<PathBuf>,
    /// Installation directory at the volume root
    pub install_dir: String,
    /// Backup store directory at the volume root
    pub backup_dir: String,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            mount_root: None,
            install_dir: ".rockbox".to_string(),
            backup_dir: ".rockbox_backups".to_string(),
        }
    }
}

impl VolumeConfig {
    /// Mount root, defaulting to `/run/media/<user>`
    pub fn mount_root(&self) -> PathBuf {
        self.mount_root.clone().unwrap_or_else(default_mount_root)
    }
}

/// Integrity verification policy
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Refuse to install artifacts without a published or supplied digest
    pub require_checksum: bool,
    /// Directory-level manifests tried next to the artifact, in order
    pub manifest_names: Vec<String>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            require_checksum: false,
            manifest_names: vec![
                "SHA256SUMS".to_string(),
                "sha256sums.txt".to_string(),
                "SHA512SUMS".to_string(),
                "MD5SUMS".to_string(),
                "md5sum.txt".to_string(),
            ],
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub volume: VolumeConfig,
    pub verify: VerifyConfig,
}

impl Config {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Load a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text).map_err(|e| match e {
            Error::ConfigError(msg) => {
                Error::ConfigError(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Load using the standard lookup order
    ///
    /// An explicit path or `$RBDEPLOY_CONFIG` must exist; the per-user file is
    /// optional and defaults are used when it is missing.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            debug!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            debug!("Loading config from ${}: {}", CONFIG_ENV, path);
            return Self::from_file(Path::new(&path));
        }

        if let Some(path) = user_config_path()
            && path.is_file()
        {
            debug!("Loading config from {}", path.display());
            return Self::from_file(&path);
        }

        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Override the mount root
    pub fn with_mount_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.volume.mount_root = Some(path.into());
        self
    }

    /// Require a digest for every artifact
    pub fn with_require_checksum(mut self, require: bool) -> Self {
        self.verify.require_checksum = require;
        self
    }

    /// Point discovery at different base URLs (mirrors, tests)
    pub fn with_remote_bases(
        mut self,
        release_base: impl Into<String>,
        daily_base: impl Into<String>,
    ) -> Self {
        self.remote.release_base = release_base.into();
        self.remote.daily_base = daily_base.into();
        self
    }
}

/// Per-user config file location
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rbdeploy").join("config.toml"))
}

fn default_mount_root() -> PathBuf {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "root".to_string());
    PathBuf::from("/run/media").join(user)
}
