// src/repository/client.rs

//! HTTP client for the build distribution point
//!
//! A thin wrapper around a blocking reqwest client that adds a browser-like
//! User-Agent (some mirrors answer 403 otherwise), per-request timeouts and
//! retry with linear backoff for transport errors and retryable statuses.

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use indicatif::ProgressBar;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Upper bound on what a server's Content-Length may reserve up front
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Content-Length is only a hint; a larger body grows the buffer as it arrives
fn initial_capacity(content_length: u64) -> usize {
    usize::try_from(content_length.min(MAX_PREALLOCATION)).unwrap_or(0)
}

/// Statuses worth retrying
fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Read a response body into memory, updating an optional progress bar
fn read_response(
    mut response: Response,
    progress_bar: Option<&ProgressBar>,
    display_name: &str,
) -> Result<Vec<u8>> {
    let total_size = response.content_length().unwrap_or(0);

    if let Some(pb) = progress_bar {
        if total_size > 0 {
            pb.set_length(total_size);
            pb.set_message(display_name.to_string());
        } else {
            pb.set_message(format!("{} (unknown size)", display_name));
        }
    }

    let mut body = Vec::with_capacity(initial_capacity(total_size));
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];

    loop {
        let bytes_read = response
            .read(&mut buffer)
            .map_err(|e| Error::DownloadError(format!("Failed to read response: {e}")))?;

        if bytes_read == 0 {
            break;
        }

        body.extend_from_slice(&buffer[..bytes_read]);

        if let Some(pb) = progress_bar {
            pb.set_position(body.len() as u64);
        }
    }

    Ok(body)
}

/// Outcome of a GET that may legitimately find nothing
#[derive(Debug)]
pub enum Fetched {
    Found(Vec<u8>),
    /// Non-success status after retries
    Missing(StatusCode),
}

/// HTTP client wrapper with retry support
pub struct RepositoryClient {
    client: Client,
    timeout: Duration,
    download_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl RepositoryClient {
    /// Create a client from the remote settings
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout: config.timeout(),
            download_timeout: config.download_timeout(),
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// GET with retries; returns the final response whatever its status
    fn get_with_retry(&self, url: &str, timeout: Duration) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, "*/*")
                .timeout(timeout)
                .send()
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || !is_retryable(status) || attempt >= self.max_retries {
                        return Ok(response);
                    }
                    warn!("HTTP {} from {} (attempt {}), retrying...", status, url, attempt);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to fetch {url} after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, url, e);
                }
            }
            std::thread::sleep(self.retry_delay * attempt);
        }
    }

    fn check_status(response: Response, url: &str) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(Error::Forbidden(url.to_string()));
        }
        if !status.is_success() {
            return Err(Error::DownloadError(format!("HTTP {} from {}", status, url)));
        }
        Ok(response)
    }

    /// Fetch an index page as text
    pub fn get_text(&self, url: &str) -> Result<String> {
        debug!("Fetching index {}", url);
        let response = Self::check_status(self.get_with_retry(url, self.timeout)?, url)?;
        response
            .text()
            .map_err(|e| Error::DownloadError(format!("Failed to read {}: {}", url, e)))
    }

    /// Download an artifact into memory
    pub fn download_to_bytes(&self, url: &str, progress_bar: Option<&ProgressBar>) -> Result<Vec<u8>> {
        info!("Downloading {}", url);
        let response = Self::check_status(self.get_with_retry(url, self.download_timeout)?, url)?;

        let display_name = url.rsplit('/').next().unwrap_or(url);
        let bytes = read_response(response, progress_bar, display_name)?;

        if let Some(pb) = progress_bar {
            pb.finish_with_message(format!("{} [done]", display_name));
        }
        info!("Downloaded {} bytes", bytes.len());
        Ok(bytes)
    }

    /// Fetch a small file that may not exist (checksum manifests)
    ///
    /// A non-success status is `Missing`, not an error; only transport
    /// failures are errors.
    pub fn fetch_optional(&self, url: &str) -> Result<Fetched> {
        let response = self.get_with_retry(url, self.timeout)?;
        let status = response.status();
        if !status.is_success() {
            debug!("HTTP {} for {}", status, url);
            return Ok(Fetched::Missing(status));
        }
        let bytes = response
            .bytes()
            .map_err(|e| Error::DownloadError(format!("Failed to read {}: {}", url, e)))?;
        Ok(Fetched::Found(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::FORBIDDEN));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::OK));
    }

    #[test]
    fn test_initial_capacity_is_bounded() {
        assert_eq!(initial_capacity(0), 0);
        assert_eq!(initial_capacity(1024), 1024);
        assert_eq!(initial_capacity(u64::MAX), MAX_PREALLOCATION as usize);
    }

    #[test]
    fn test_client_from_config() {
        let mut config = RemoteConfig::default();
        config.max_retries = 0;
        let client = RepositoryClient::new(&config).unwrap();
        // At least one attempt is always made
        assert_eq!(client.max_retries, 1);
        assert_eq!(client.timeout, Duration::from_secs(20));
    }
}
