// src/progress.rs

//! Per-file progress for merges and restores
//!
//! Both walk a known list of files on a card that can be slow to write. The
//! engine reports through [`ProgressTracker`]; the CLI picks a terminal bar or
//! log lines, tests use [`SilentProgress`].

use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

/// Receives progress for one file-by-file phase
pub trait ProgressTracker: Send + Sync {
    /// A phase over `total` files starts
    fn begin(&self, phase: &str, total: u64);

    /// One more file is done
    fn advance(&self, path: &Path);

    /// Files done so far
    fn position(&self) -> u64;

    fn finish(&self, message: &str);

    /// The phase stopped early
    fn fail(&self, message: &str);
}

/// Counts but shows nothing
#[derive(Debug, Default)]
pub struct SilentProgress {
    position: AtomicU64,
    total: AtomicU64,
    finished: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl ProgressTracker for SilentProgress {
    fn begin(&self, _phase: &str, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.position.store(0, Ordering::Relaxed);
        self.finished.store(false, Ordering::Relaxed);
    }

    fn advance(&self, _path: &Path) {
        self.position.fetch_add(1, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish(&self, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn fail(&self, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

/// Logs a line at every tenth of the way, for non-interactive runs
#[derive(Debug, Default)]
pub struct LogProgress {
    phase: Mutex<String>,
    position: AtomicU64,
    total: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn phase(&self) -> String {
        self.phase.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl ProgressTracker for LogProgress {
    fn begin(&self, phase: &str, total: u64) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase.to_string();
        }
        self.total.store(total, Ordering::Relaxed);
        self.position.store(0, Ordering::Relaxed);
        info!("{}: {} files", phase, total);
    }

    fn advance(&self, _path: &Path) {
        let done = self.position.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total.load(Ordering::Relaxed);
        let step = (total / 10).max(1);
        if total > 0 && done % step == 0 {
            info!("{}: {}% ({}/{})", self.phase(), done * 100 / total, done, total);
        }
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish(&self, message: &str) {
        info!("{}: {}", self.phase(), message);
    }

    fn fail(&self, message: &str) {
        warn!("{}: stopped at {}: {}", self.phase(), self.position(), message);
    }
}

/// indicatif bar showing the file being written
pub struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{bar:40.green/dim}] {pos}/{len} {wide_msg}")
                .expect("Invalid progress bar template")
                .progress_chars("##-"),
        );
        Self { bar }
    }
}

impl Default for CliProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker for CliProgress {
    fn begin(&self, phase: &str, total: u64) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_prefix(phase.to_string());
        self.bar.set_length(total);
        self.bar.set_position(0);
    }

    fn advance(&self, path: &Path) {
        self.bar.set_message(path.display().to_string());
        self.bar.inc(1);
    }

    fn position(&self) -> u64 {
        self.bar.position()
    }

    fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    fn fail(&self, message: &str) {
        self.bar.abandon_with_message(format!("FAILED: {}", message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_progress_counts() {
        let progress = SilentProgress::new();
        progress.begin("Merging", 3);
        progress.advance(Path::new("a"));
        progress.advance(Path::new("b"));

        assert_eq!(progress.position(), 2);
        assert_eq!(progress.total(), 3);
        assert!(!progress.is_finished());

        progress.fail("disk full");
        assert!(progress.is_finished());
    }

    #[test]
    fn test_begin_resets_position() {
        let progress = LogProgress::new();
        progress.begin("Merging", 5);
        progress.advance(Path::new("a"));
        progress.begin("Restoring", 2);
        assert_eq!(progress.position(), 0);
        progress.advance(Path::new("b"));
        progress.advance(Path::new("c"));
        assert_eq!(progress.position(), 2);
    }
}
