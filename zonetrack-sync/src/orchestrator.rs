//! Sync orchestrator
//!
//! Drives one sync cycle at a time through a small state machine:
//!
//! ```text
//! Idle → Checking ─(unchanged)──────────────→ Idle
//!           └─(changed / empty store)→ Processing → Idle
//!                                          └─(failure)→ Error → Idle
//! ```
//!
//! Overlapping triggers are dropped, not queued. The watermark is re-read from
//! the store at the start of every cycle.

use crate::dedup::filter_new;
use crate::detector::ChangeDetector;
use crate::error::{SyncError, SyncResult};
use crate::normalize::normalize_all;
use crate::source::SourceReader;
use crate::writer::BatchWriter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zonetrack_common::{ReadingStore, ReadingTime};

/// Transitions kept for inspection
const TRANSITION_HISTORY: usize = 32;

// ============================================================================
// State
// ============================================================================

/// Phase of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// Waiting for a trigger
    Idle,
    /// Resolving the watermark and comparing the source fingerprint
    Checking,
    /// Reading, normalizing and writing new readings
    Processing,
    /// Last cycle failed; returns to Idle once the failure is reported
    Error,
}

/// One recorded phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseTransition {
    pub from: SyncPhase,
    pub to: SyncPhase,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct PhaseState {
    current: SyncPhase,
    history: VecDeque<PhaseTransition>,
}

impl PhaseState {
    fn transition_to(&mut self, to: SyncPhase) -> PhaseTransition {
        let transition = PhaseTransition {
            from: self.current,
            to,
            at: Utc::now(),
        };
        self.current = to;

        if self.history.len() == TRANSITION_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(transition);

        transition
    }
}

/// Counters of one processed cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Records read from the source
    pub scanned: usize,
    /// Records that produced no reading
    pub skipped: usize,
    pub skip_counts: BTreeMap<&'static str, usize>,
    /// Readings newer than the watermark
    pub new_readings: usize,
    pub chunks: usize,
    pub rows_written: u64,
    /// In-memory watermark after the cycle
    pub watermark: Option<ReadingTime>,
}

/// How a cycle ended, when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Source fingerprint unchanged and store non-empty
    Unchanged,
    /// Another cycle held the guard; this trigger was dropped
    AlreadyRunning,
    Synced(SyncReport),
}

/// Clears the in-progress flag when the cycle ends, however it ends
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Coordinates change detection, reading, dedup and writing
pub struct SyncOrchestrator<R: SourceReader> {
    reader: R,
    store: ReadingStore,
    writer: BatchWriter,
    detector: Mutex<ChangeDetector>,
    watermark: RwLock<Option<ReadingTime>>,
    phase: RwLock<PhaseState>,
    in_progress: AtomicBool,
}

impl<R: SourceReader> SyncOrchestrator<R> {
    pub fn new(reader: R, store: ReadingStore, source_path: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            reader,
            writer: BatchWriter::new(store.clone(), batch_size),
            store,
            detector: Mutex::new(ChangeDetector::new(source_path)),
            watermark: RwLock::new(None),
            phase: RwLock::new(PhaseState {
                current: SyncPhase::Idle,
                history: VecDeque::new(),
            }),
            in_progress: AtomicBool::new(false),
        }
    }

    pub async fn phase(&self) -> SyncPhase {
        self.phase.read().await.current
    }

    /// Recent phase transitions, oldest first
    pub async fn transitions(&self) -> Vec<PhaseTransition> {
        self.phase.read().await.history.iter().copied().collect()
    }

    pub async fn watermark(&self) -> Option<ReadingTime> {
        *self.watermark.read().await
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn store(&self) -> &ReadingStore {
        &self.store
    }

    /// First cycle after start
    ///
    /// Always processes (nothing observed yet). The caller treats any error as
    /// fatal.
    pub async fn startup(&self) -> SyncResult<CycleOutcome> {
        info!(source = %self.reader.describe(), "Starting initial sync");
        self.run_cycle().await
    }

    /// Run one cycle now, unless one is already running
    pub async fn run_cycle(&self) -> SyncResult<CycleOutcome> {
        let Some(_guard) = CycleGuard::acquire(&self.in_progress) else {
            debug!("Sync already in progress, dropping trigger");
            return Ok(CycleOutcome::AlreadyRunning);
        };

        self.transition_to(SyncPhase::Checking).await;
        let result = self.check_and_process().await;

        if let Err(e) = &result {
            self.transition_to(SyncPhase::Error).await;
            warn!(error = %e, "Sync cycle failed");
            // Force the next trigger to re-scan even if the file is unchanged
            self.detector.lock().await.forget();
        }
        self.transition_to(SyncPhase::Idle).await;

        result
    }

    async fn check_and_process(&self) -> SyncResult<CycleOutcome> {
        let watermark = self.store.max_timestamp().await?;
        *self.watermark.write().await = watermark;

        let changed = self
            .detector
            .lock()
            .await
            .has_changed()
            .map_err(|e| self.source_stat_error(e))?;

        if watermark.is_some() && !changed {
            debug!("Source unchanged since last check");
            return Ok(CycleOutcome::Unchanged);
        }

        self.transition_to(SyncPhase::Processing).await;
        info!("Checking for new records...");

        let records = self.reader.read().await?;
        let scanned = records.len();
        let normalized = normalize_all(&records);

        let mut fresh = filter_new(normalized.readings, watermark);
        fresh.sort_by_key(|r| r.timestamp);

        let mut report = SyncReport {
            scanned,
            skipped: normalized.skipped,
            skip_counts: normalized.skip_counts,
            new_readings: fresh.len(),
            ..Default::default()
        };

        if fresh.is_empty() {
            info!(scanned, skipped = report.skipped, "No new records found");
            report.watermark = watermark;
            return Ok(CycleOutcome::Synced(report));
        }

        info!(scanned, skipped = report.skipped, "Found {} new records", fresh.len());

        let written = match self.writer.write(&fresh).await {
            Ok(written) => written,
            Err(failure) => {
                let advanced = self.advance_watermark(failure.last_committed).await;
                error!(
                    committed_rows = failure.committed_rows,
                    watermark = ?advanced,
                    "Write aborted: {}",
                    failure
                );
                return Err(failure.into());
            }
        };

        report.chunks = written.chunks;
        report.rows_written = written.rows;
        report.watermark = self.advance_watermark(written.last_written).await;

        info!(
            rows = written.rows,
            chunks = written.chunks,
            watermark = ?report.watermark,
            "Successfully processed new records"
        );

        Ok(CycleOutcome::Synced(report))
    }

    async fn advance_watermark(&self, candidate: Option<ReadingTime>) -> Option<ReadingTime> {
        let mut watermark = self.watermark.write().await;
        *watermark = (*watermark).max(candidate);
        *watermark
    }

    async fn transition_to(&self, to: SyncPhase) {
        let transition = self.phase.write().await.transition_to(to);
        debug!(from = ?transition.from, to = ?transition.to, "Sync phase transition");
    }

    fn source_stat_error(&self, e: io::Error) -> SyncError {
        if e.kind() == io::ErrorKind::NotFound {
            SyncError::SourceUnavailable(format!("{} no longer exists", self.reader.describe()))
        } else {
            SyncError::Io(e)
        }
    }
}

impl<R: SourceReader + 'static> SyncOrchestrator<R> {
    /// Run a cycle on a background task, or drop the trigger when busy
    ///
    /// Failures are logged; they never stop the caller.
    pub fn spawn_cycle(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.is_running() {
            debug!("Sync already in progress, dropping trigger");
            return None;
        }

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            match this.run_cycle().await {
                Ok(CycleOutcome::Synced(report)) => {
                    debug!(?report, "Sync cycle finished");
                }
                Ok(outcome) => debug!(?outcome, "Sync cycle finished"),
                Err(e) => error!("Error processing records: {}", e),
            }
        }))
    }
}
