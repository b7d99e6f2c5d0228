//! Filesystem watch loop
//!
//! A `notify` watcher on the source file's parent directory feeds a bounded
//! channel; a single task owns the [`Debouncer`] and turns each quiet period
//! after a burst into one sync trigger.
//!
//! The parent directory is watched (not the file) so replacing the file by
//! rename is still seen.

use crate::detector::Debouncer;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::SyncOrchestrator;
use crate::source::SourceReader;
use notify::event::EventKind;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 64;

/// Message from the notify callback thread to the watch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMessage {
    /// Something happened to the source file
    Changed,
    /// The watcher backend reported an error
    Error(String),
}

/// Start watching `source`
///
/// The returned watcher must be kept alive for notifications to flow.
pub fn watch_source(source: &Path) -> SyncResult<(RecommendedWatcher, mpsc::Receiver<WatchMessage>)> {
    let file_name: OsString = source
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| SyncError::WatchFailure(format!("{} does not name a file", source.display())))?;
    let parent = match source.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                let concerns_source = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if concerns_source && tx.blocking_send(WatchMessage::Changed).is_err() {
                    debug!("Watch loop gone, dropping notification");
                }
            }
            Err(err) => {
                let _ = tx.blocking_send(WatchMessage::Error(err.to_string()));
            }
        },
        NotifyConfig::default(),
    )
    .map_err(|e| SyncError::WatchFailure(format!("failed to create watcher: {}", e)))?;

    watcher
        .watch(&parent, RecursiveMode::NonRecursive)
        .map_err(|e| SyncError::WatchFailure(format!("failed to watch {}: {}", parent.display(), e)))?;

    Ok((watcher, rx))
}

/// Debounce notifications and call `on_fire` once per quiet period
///
/// Returns `Ok(())` on cancellation and [`SyncError::WatchFailure`] when the
/// watcher reports an error or its channel closes.
pub async fn debounce_loop<F>(
    mut rx: mpsc::Receiver<WatchMessage>,
    delay: Duration,
    cancel: CancellationToken,
    mut on_fire: F,
) -> SyncResult<()>
where
    F: FnMut(),
{
    let mut debouncer = Debouncer::new(delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Watch loop cancelled");
                return Ok(());
            }
            message = rx.recv() => match message {
                Some(WatchMessage::Changed) => debouncer.reset(),
                Some(WatchMessage::Error(e)) => return Err(SyncError::WatchFailure(e)),
                None => return Err(SyncError::WatchFailure("notification channel closed".to_string())),
            },
            _ = debouncer.fired() => {
                info!("Source file changed, processing new records...");
                on_fire();
            }
        }
    }
}

/// Watch `source` and run debounced sync cycles until cancelled
///
/// A cycle still running at cancellation is awaited before returning.
pub async fn run_watch_loop<R: SourceReader + 'static>(
    orchestrator: Arc<SyncOrchestrator<R>>,
    source: &Path,
    debounce: Duration,
    cancel: CancellationToken,
) -> SyncResult<()> {
    let (_watcher, rx) = watch_source(source)?;
    info!("Watching for changes to {}...", source.display());

    let mut in_flight: Option<JoinHandle<()>> = None;
    let result = debounce_loop(rx, debounce, cancel, || {
        if let Some(handle) = orchestrator.spawn_cycle() {
            in_flight = Some(handle);
        }
    })
    .await;

    if let Some(handle) = in_flight {
        if !handle.is_finished() {
            info!("Waiting for running sync cycle to finish");
        }
        if let Err(e) = handle.await {
            warn!("Sync task ended abnormally: {}", e);
        }
    }

    result
}
