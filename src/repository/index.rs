// src/repository/index.rs

//! Build discovery
//!
//! The distribution point publishes plain HTML directory indexes:
//!
//! ```text
//! <release_base>/4.0/rockbox-ipod6g-4.0.zip
//! <daily_base>/ipod6g/rockbox-ipod6g-20250822.zip
//! ```
//!
//! plus a status page listing the current nightlies, used when an index is
//! unavailable. Parsing is kept in free functions over the page text so it
//! can be tested without a network.

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::repository::client::RepositoryClient;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

static NIGHTLY_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"rockbox-(?P<device>[a-z0-9]+)-(?P<date>\d{8})\.zip")
        .expect("valid nightly regex")
});

static DIR_HREF_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#"href="([^"/]+)/""#).expect("valid href regex")
});

static DAILY_LINK_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#"href="/?daily/([a-z0-9]+)/"#).expect("valid daily link regex")
});

static VERSION_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^\d+(\.\d+)+$").expect("valid version regex"));

static DEVICE_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-z0-9]+$").expect("valid device regex"));

static DATE_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^\d{8}$").expect("valid date regex"));

/// Compare dotted versions numerically (`4.10` > `4.9`)
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> { v.split('.').map(|p| p.parse().unwrap_or(0)).collect() };
    parse(a).cmp(&parse(b))
}

/// Release versions in a release index, newest first
pub fn parse_release_versions(html: &str) -> Vec<String> {
    let mut versions: Vec<String> = DIR_HREF_RE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .filter(|v| VERSION_RE.is_match(v))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    versions.sort_by(|a, b| compare_versions(b, a));
    versions
}

/// Device directories in the daily index, sorted
pub fn parse_device_dirs(html: &str) -> Vec<String> {
    DIR_HREF_RE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .filter(|d| DEVICE_RE.is_match(d))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Devices mentioned on the daily status page, sorted
pub fn parse_devices_from_page(html: &str) -> Vec<String> {
    let mut devices: BTreeSet<String> = DAILY_LINK_RE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect();
    devices.extend(NIGHTLY_RE.captures_iter(html).map(|c| c["device"].to_string()));
    devices.into_iter().collect()
}

/// Nightly dates for `device` found anywhere in `html`, newest first, unique
pub fn parse_nightly_dates(html: &str, device: &str) -> Vec<String> {
    let dates: BTreeSet<String> = NIGHTLY_RE
        .captures_iter(html)
        .filter(|c| &c["device"] == device)
        .map(|c| c["date"].to_string())
        .collect();
    dates.into_iter().rev().collect()
}

fn validate_device(device: &str) -> Result<()> {
    if DEVICE_RE.is_match(device) {
        Ok(())
    } else {
        Err(Error::ConfigError(format!(
            "Invalid device name '{}': expected lowercase letters and digits",
            device
        )))
    }
}

fn parse_base(base: &str) -> Result<Url> {
    let normalized = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    };
    Url::parse(&normalized)
        .map_err(|e| Error::ConfigError(format!("Invalid base URL '{}': {}", base, e)))
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| Error::ConfigError(format!("Cannot build URL from {} and {}: {}", base, path, e)))
}

/// URL of a specific nightly build
pub fn nightly_url(daily_base: &str, device: &str, date: &str) -> Result<Url> {
    validate_device(device)?;
    if !DATE_RE.is_match(date) {
        return Err(Error::ConfigError(format!(
            "Invalid date '{}': expected YYYYMMDD",
            date
        )));
    }
    let base = parse_base(daily_base)?;
    join(&base, &format!("{device}/rockbox-{device}-{date}.zip"))
}

/// URL of a tagged release build
pub fn release_url(release_base: &str, device: &str, version: &str) -> Result<Url> {
    validate_device(device)?;
    if version.is_empty() || version.contains(['/', '\\', '?', '#']) || version.contains("..") {
        return Err(Error::ConfigError(format!("Invalid release version '{}'", version)));
    }
    let base = parse_base(release_base)?;
    join(&base, &format!("{version}/rockbox-{device}-{version}.zip"))
}

/// Discovery against a live distribution point
pub struct BuildIndex<'a> {
    client: &'a RepositoryClient,
    remote: &'a RemoteConfig,
}

impl<'a> BuildIndex<'a> {
    pub fn new(client: &'a RepositoryClient, remote: &'a RemoteConfig) -> Self {
        Self { client, remote }
    }

    /// Tagged releases, newest first
    pub fn list_releases(&self) -> Result<Vec<String>> {
        let html = self.client.get_text(&self.remote.release_base)?;
        Ok(parse_release_versions(&html))
    }

    /// Devices with nightly builds
    ///
    /// Falls back to the status page when the daily index can't be read or
    /// lists nothing.
    pub fn list_devices(&self) -> Result<Vec<String>> {
        match self.client.get_text(&self.remote.daily_base) {
            Ok(html) => {
                let devices = parse_device_dirs(&html);
                if !devices.is_empty() {
                    return Ok(devices);
                }
                debug!("Daily index lists no devices, trying status page");
            }
            Err(e) => warn!("Daily index unavailable ({}), trying status page", e),
        }

        let page = self.client.get_text(&self.remote.daily_page)?;
        Ok(parse_devices_from_page(&page))
    }

    /// Nightly dates for `device`, newest first
    pub fn list_dailies(&self, device: &str) -> Result<Vec<String>> {
        validate_device(device)?;
        let index_url = join(&parse_base(&self.remote.daily_base)?, &format!("{device}/"))?;

        match self.client.get_text(index_url.as_str()) {
            Ok(html) => {
                let dates = parse_nightly_dates(&html, device);
                if !dates.is_empty() {
                    return Ok(dates);
                }
                debug!("No dates in {}, trying status page", index_url);
            }
            Err(e) => warn!("Device index unavailable ({}), trying status page", e),
        }

        let page = self.client.get_text(&self.remote.daily_page)?;
        Ok(parse_nightly_dates(&page, device))
    }

    /// Newest nightly for `device` and its URL
    pub fn latest_nightly(&self, device: &str) -> Result<(String, Url)> {
        let date = self
            .list_dailies(device)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::DownloadError(format!("No nightly builds found for {}", device)))?;
        let url = self.nightly_url(device, &date)?;
        Ok((date, url))
    }

    pub fn nightly_url(&self, device: &str, date: &str) -> Result<Url> {
        nightly_url(&self.remote.daily_base, device, date)
    }

    pub fn release_url(&self, device: &str, version: &str) -> Result<Url> {
        release_url(&self.remote.release_base, device, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELEASE_INDEX: &str = r#"
<a href="../">../</a>
<a href="3.15/">3.15/</a>
<a href="4.0/">4.0/</a>
<a href="3.9/">3.9/</a>
<a href="source/">source/</a>
<a href="4.0/">4.0/</a>
"#;

    const DEVICE_INDEX: &str = r#"
<a href="rockbox-ipod6g-20250820.zip">rockbox-ipod6g-20250820.zip</a>
<a href="rockbox-ipod6g-20250822.zip">rockbox-ipod6g-20250822.zip</a>
<a href="rockbox-ipod6g-20250821.zip">rockbox-ipod6g-20250821.zip</a>
<a href="rockbox-ipod6g-20250822.zip">dup</a>
<a href="rockbox-ipodvideo-20250823.zip">other device</a>
"#;

    #[test]
    fn test_parse_release_versions() {
        assert_eq!(parse_release_versions(RELEASE_INDEX), vec!["4.0", "3.15", "3.9"]);
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("4.10", "4.9"), Ordering::Greater);
        assert_eq!(compare_versions("3.15", "3.15"), Ordering::Equal);
    }

    #[test]
    fn test_parse_nightly_dates() {
        assert_eq!(
            parse_nightly_dates(DEVICE_INDEX, "ipod6g"),
            vec!["20250822", "20250821", "20250820"]
        );
        assert!(parse_nightly_dates(DEVICE_INDEX, "sansae200").is_empty());
    }

    #[test]
    fn test_parse_devices() {
        let index = r#"<a href="../">..</a><a href="ipod6g/">x</a><a href="erosqnative/">x</a><a href="ipod6g/">x</a>"#;
        assert_eq!(parse_device_dirs(index), vec!["erosqnative", "ipod6g"]);

        let page = r#"<a href="/daily/sansae200/">e200</a> rockbox-h300-20250822.zip"#;
        assert_eq!(parse_devices_from_page(page), vec!["h300", "sansae200"]);
    }

    #[test]
    fn test_nightly_url() {
        let url = nightly_url("https://download.rockbox.org/daily", "ipod6g", "20250822").unwrap();
        assert_eq!(
            url.as_str(),
            "https://download.rockbox.org/daily/ipod6g/rockbox-ipod6g-20250822.zip"
        );

        assert!(nightly_url("https://download.rockbox.org/daily/", "ipod6g", "2025-08-22").is_err());
        assert!(nightly_url("https://download.rockbox.org/daily/", "../x", "20250822").is_err());
    }

    #[test]
    fn test_release_url() {
        let url = release_url("https://download.rockbox.org/release/", "erosqnative", "4.0").unwrap();
        assert_eq!(
            url.as_str(),
            "https://download.rockbox.org/release/4.0/rockbox-erosqnative-4.0.zip"
        );
        assert!(release_url("https://download.rockbox.org/release/", "ipod6g", "../4.0").is_err());
    }
}
