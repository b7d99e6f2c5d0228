//! Error types for zonetrack-sync
//!
//! Malformed source records are not errors at this level: the normalizer
//! reports them as [`SkipReason`](crate::normalize::SkipReason) and the cycle
//! continues without them.

use crate::writer::WriteFailure;
use thiserror::Error;

/// Failure of a sync cycle or of the watch machinery
#[derive(Debug, Error)]
pub enum SyncError {
    /// Source container missing, unreadable, or without the reading table
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Store query or schema operation could not execute
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] zonetrack_common::Error),

    /// A chunk transaction failed; earlier chunks stay committed
    #[error("Write failure: {0}")]
    Write(#[from] WriteFailure),

    /// Filesystem notification mechanism failed
    #[error("Watch failure: {0}")]
    WatchFailure(String),

    /// Source file metadata could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether the watch loop must stop on this error
    ///
    /// Cycle failures are logged and retried on the next notification.
    pub fn is_fatal_at_runtime(&self) -> bool {
        matches!(self, SyncError::WatchFailure(_))
    }
}

/// Convenience Result type for sync operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;
