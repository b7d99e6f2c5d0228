//! Change detection and debouncing
//!
//! [`ChangeDetector`] compares file size and modification time between checks.
//! Overwrites that keep both unchanged go unnoticed; there is no content hash.
//!
//! [`Debouncer`] collapses a burst of notifications into a single firing:
//! every `reset()` pushes the deadline to `now + delay`.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Default quiet interval before a resync
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Observable identity of the source file between checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileFingerprint {
    pub fn of(path: &Path) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// Size/mtime change detector for one file
#[derive(Debug)]
pub struct ChangeDetector {
    path: PathBuf,
    last_observed: Option<FileFingerprint>,
}

impl ChangeDetector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_observed: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_observed(&self) -> Option<FileFingerprint> {
        self.last_observed
    }

    /// Whether the file differs from the last observation, recording the
    /// current fingerprint
    ///
    /// The first check always reports a change.
    pub fn has_changed(&mut self) -> io::Result<bool> {
        let current = FileFingerprint::of(&self.path)?;
        let changed = self.last_observed != Some(current);
        self.last_observed = Some(current);
        Ok(changed)
    }

    /// Record the current fingerprint without reporting a change
    pub fn prime(&mut self) -> io::Result<()> {
        self.last_observed = Some(FileFingerprint::of(&self.path)?);
        Ok(())
    }

    /// Drop the last observation so the next check reports a change
    pub fn forget(&mut self) {
        self.last_observed = None;
    }
}

/// Single-slot debounce timer
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, deadline: None }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace any pending deadline with `now + delay`
    pub fn reset(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Complete at the pending deadline and disarm
    ///
    /// Never completes while disarmed, so it can sit in a `select!` branch
    /// unconditionally.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
