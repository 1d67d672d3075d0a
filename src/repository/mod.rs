// src/repository/mod.rs

//! Remote distribution point access
//!
//! This module provides:
//! - An HTTP client with retry, timeouts and a browser-like User-Agent
//! - Discovery of releases, devices and nightly builds from HTML indexes
//! - Artifact sources (HTTP and local file) for the deploy pipeline

pub mod client;
pub mod index;
pub mod source;

pub use client::{Fetched, RepositoryClient};
pub use index::{nightly_url, release_url, BuildIndex};
pub use source::{FileArtifactSource, HttpArtifactSource};
