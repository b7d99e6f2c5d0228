//! End-to-end sync cycle tests
//!
//! Each test runs the real orchestrator against a temp-file SQLite store. The
//! source table is an in-memory [`StaticReader`]; a placeholder file on disk
//! stands in for the container so change detection sees real metadata.

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use zonetrack_common::{ReadingStore, ReadingTime};
use zonetrack_sync::orchestrator::PhaseTransition;
use zonetrack_sync::source::{RawRecord, SourceReader, StaticReader};
use zonetrack_sync::watch::run_watch_loop;
use zonetrack_sync::{CycleOutcome, SyncError, SyncOrchestrator, SyncPhase, SyncReport, SyncResult};

// ============================================================================
// Fixtures
// ============================================================================

struct Fixture {
    _dir: TempDir,
    source: PathBuf,
    store: ReadingStore,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("readings.mdb");
    std::fs::write(&source, b"container v1").unwrap();
    let store = ReadingStore::open(&dir.path().join("store.sqlite")).await.unwrap();
    Fixture {
        _dir: dir,
        source,
        store,
    }
}

/// Grow the placeholder so size-based change detection fires
fn touch(path: &Path) {
    OpenOptions::new().append(true).open(path).unwrap().write_all(b"+").unwrap();
}

fn base() -> NaiveDateTime {
    ReadingTime::parse("2024-01-01T00:00:00").unwrap().as_naive()
}

/// Source row for minute `i` after 2024-01-01T00:00:00, in exporter shape
fn row(i: i64) -> RawRecord {
    let at = base() + TimeDelta::minutes(i);
    RawRecord::new()
        .with("Date", at.format("%Y-%m-%d").to_string())
        .with("Time", at.format("1899-12-30T%H:%M:%S").to_string())
        .with("T1", 20.0 + (i % 10) as f64)
        .with("Events", i % 3)
}

fn ts(i: i64) -> ReadingTime {
    ReadingTime::from_naive(base() + TimeDelta::minutes(i)).unwrap()
}

fn rows(range: std::ops::Range<i64>) -> Vec<RawRecord> {
    range.map(row).collect()
}

fn synced(outcome: CycleOutcome) -> SyncReport {
    match outcome {
        CycleOutcome::Synced(report) => report,
        other => panic!("expected Synced, got {:?}", other),
    }
}

async fn install_poison_trigger(store: &ReadingStore, at: ReadingTime) {
    sqlx::query(&format!(
        "CREATE TRIGGER poison BEFORE INSERT ON temperature_readings \
         WHEN NEW.datetime = '{}' BEGIN SELECT RAISE(ABORT, 'poisoned row'); END",
        at.canonical()
    ))
    .execute(store.pool())
    .await
    .unwrap();
}

async fn drop_poison_trigger(store: &ReadingStore) {
    sqlx::query("DROP TRIGGER poison").execute(store.pool()).await.unwrap();
}

// ============================================================================
// Full and incremental loads
// ============================================================================

#[tokio::test]
async fn test_initial_load_in_three_chunks() {
    let fx = fixture().await;
    let orchestrator = SyncOrchestrator::new(StaticReader::new(rows(0..2500)), fx.store.clone(), &fx.source, 1000);

    let report = synced(orchestrator.startup().await.unwrap());

    assert_eq!(report.scanned, 2500);
    assert_eq!(report.new_readings, 2500);
    assert_eq!(report.chunks, 3);
    assert_eq!(report.rows_written, 2500);
    assert_eq!(report.watermark, Some(ts(2499)));
    assert_eq!(orchestrator.watermark().await, Some(ts(2499)));
    assert_eq!(fx.store.count().await.unwrap(), 2500);
    assert_eq!(fx.store.max_timestamp().await.unwrap(), Some(ts(2499)));
}

#[tokio::test]
async fn test_resync_of_unchanged_source_inserts_nothing() {
    let fx = fixture().await;
    let orchestrator = SyncOrchestrator::new(StaticReader::new(rows(0..50)), fx.store.clone(), &fx.source, 20);
    orchestrator.startup().await.unwrap();

    // Same file metadata: nothing to do
    assert_eq!(orchestrator.run_cycle().await.unwrap(), CycleOutcome::Unchanged);

    // File touched but no new rows: full scan, zero writes
    touch(&fx.source);
    let report = synced(orchestrator.run_cycle().await.unwrap());
    assert_eq!(report.scanned, 50);
    assert_eq!(report.new_readings, 0);
    assert_eq!(report.rows_written, 0);
    assert_eq!(report.chunks, 0);
    assert_eq!(fx.store.count().await.unwrap(), 50);
}

#[tokio::test]
async fn test_appended_rows_are_picked_up() {
    let fx = fixture().await;
    let reader = Arc::new(StaticReader::new(rows(0..10)));
    let orchestrator = SyncOrchestrator::new(Arc::clone(&reader), fx.store.clone(), &fx.source, 1000);
    orchestrator.startup().await.unwrap();

    reader.append(rows(10..15)).await;
    touch(&fx.source);
    let report = synced(orchestrator.run_cycle().await.unwrap());

    assert_eq!(report.scanned, 15);
    assert_eq!(report.new_readings, 5);
    assert_eq!(report.watermark, Some(ts(14)));
    assert_eq!(fx.store.count().await.unwrap(), 15);
}

#[tokio::test]
async fn test_restart_resumes_from_store_watermark() {
    let fx = fixture().await;
    {
        let first = SyncOrchestrator::new(StaticReader::new(rows(0..30)), fx.store.clone(), &fx.source, 1000);
        first.startup().await.unwrap();
    }

    // A new process sees more rows; the first check always scans
    let second = SyncOrchestrator::new(StaticReader::new(rows(0..40)), fx.store.clone(), &fx.source, 1000);
    let report = synced(second.startup().await.unwrap());

    assert_eq!(report.new_readings, 10);
    assert_eq!(fx.store.count().await.unwrap(), 40);
}

#[tokio::test]
async fn test_rows_at_watermark_are_not_reinserted() {
    let fx = fixture().await;
    let eight = RawRecord::new().with("date", "2024-01-10").with("time", "08:00:00");
    let nine = RawRecord::new().with("date", "2024-01-10").with("time", "09:00:00");

    let first = SyncOrchestrator::new(StaticReader::new(vec![eight.clone()]), fx.store.clone(), &fx.source, 1000);
    first.startup().await.unwrap();

    let second = SyncOrchestrator::new(StaticReader::new(vec![eight, nine]), fx.store.clone(), &fx.source, 1000);
    let report = synced(second.startup().await.unwrap());

    assert_eq!(report.new_readings, 1);
    assert_eq!(report.watermark, ReadingTime::parse("2024-01-10T09:00:00").ok());
    assert_eq!(fx.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_out_of_order_source_is_written_ascending() {
    let fx = fixture().await;
    let mut source = rows(0..6);
    source.reverse();
    let orchestrator = SyncOrchestrator::new(StaticReader::new(source), fx.store.clone(), &fx.source, 4);
    orchestrator.startup().await.unwrap();

    let page = fx.store.get_readings(ts(0), ts(5), 10, 0).await.unwrap();
    let ids_in_time_order: Vec<_> = page.readings.iter().map(|r| r.id).collect();
    let mut sorted = ids_in_time_order.clone();
    sorted.sort();
    assert_eq!(ids_in_time_order, sorted);
}

#[tokio::test]
async fn test_malformed_records_are_skipped_and_counted() {
    let fx = fixture().await;
    let mut source = rows(0..3);
    source.push(RawRecord::new().with("Date", "2024-01-01"));
    source.push(RawRecord::new().with("Date", "not a date").with("Time", "10:00"));
    source.push(RawRecord::new().with("T1", 1.0));
    let orchestrator = SyncOrchestrator::new(StaticReader::new(source), fx.store.clone(), &fx.source, 1000);

    let report = synced(orchestrator.startup().await.unwrap());

    assert_eq!(report.scanned, 6);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.skip_counts.get("missing-field"), Some(&2));
    assert_eq!(report.skip_counts.get("invalid-date"), Some(&1));
    assert_eq!(report.rows_written, 3);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_chunk_keeps_earlier_chunks() {
    let fx = fixture().await;
    install_poison_trigger(&fx.store, ts(3)).await;
    let orchestrator = SyncOrchestrator::new(StaticReader::new(rows(0..6)), fx.store.clone(), &fx.source, 2);

    let err = orchestrator.startup().await.unwrap_err();

    match err {
        SyncError::Write(failure) => {
            assert_eq!(failure.committed_chunks, 1);
            assert_eq!(failure.total_chunks, 3);
            assert_eq!(failure.committed_rows, 2);
            assert_eq!(failure.last_committed, Some(ts(1)));
        }
        other => panic!("expected write failure, got {:?}", other),
    }
    assert_eq!(fx.store.count().await.unwrap(), 2);
    assert_eq!(fx.store.max_timestamp().await.unwrap(), Some(ts(1)));
    assert_eq!(orchestrator.watermark().await, Some(ts(1)));
    assert_eq!(orchestrator.phase().await, SyncPhase::Idle);
}

#[tokio::test]
async fn test_failed_cycle_is_retried_on_next_trigger() {
    let fx = fixture().await;
    install_poison_trigger(&fx.store, ts(3)).await;
    let orchestrator = SyncOrchestrator::new(StaticReader::new(rows(0..6)), fx.store.clone(), &fx.source, 2);
    assert!(orchestrator.startup().await.is_err());

    drop_poison_trigger(&fx.store).await;

    // File untouched, but the failed cycle must not be mistaken for "seen"
    let report = synced(orchestrator.run_cycle().await.unwrap());
    assert_eq!(report.new_readings, 4);
    assert_eq!(fx.store.count().await.unwrap(), 6);
}

#[tokio::test]
async fn test_startup_fails_without_source_file() {
    let fx = fixture().await;
    let missing = fx.source.with_file_name("absent.mdb");
    let orchestrator = SyncOrchestrator::new(StaticReader::new(rows(0..3)), fx.store.clone(), &missing, 1000);

    let err = orchestrator.startup().await.unwrap_err();

    assert!(matches!(err, SyncError::SourceUnavailable(_)));
    assert!(!err.is_fatal_at_runtime());
    assert_eq!(fx.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unreadable_source_leaves_watermark() {
    let fx = fixture().await;
    let reader = Arc::new(StaticReader::new(rows(0..5)));
    let orchestrator = SyncOrchestrator::new(Arc::clone(&reader), fx.store.clone(), &fx.source, 1000);
    orchestrator.startup().await.unwrap();

    reader.set_unavailable(Some("container locked".to_string())).await;
    reader.append(rows(5..8)).await;
    touch(&fx.source);
    let err = orchestrator.run_cycle().await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable(msg) if msg == "container locked"));
    assert_eq!(orchestrator.watermark().await, Some(ts(4)));

    reader.set_unavailable(None).await;
    let report = synced(orchestrator.run_cycle().await.unwrap());
    assert_eq!(report.new_readings, 3);
}

// ============================================================================
// State machine
// ============================================================================

fn pairs(transitions: &[PhaseTransition]) -> Vec<(SyncPhase, SyncPhase)> {
    transitions.iter().map(|t| (t.from, t.to)).collect()
}

#[tokio::test]
async fn test_phase_transitions_are_recorded() {
    let fx = fixture().await;
    let orchestrator = SyncOrchestrator::new(StaticReader::new(rows(0..3)), fx.store.clone(), &fx.source, 1000);
    assert_eq!(orchestrator.phase().await, SyncPhase::Idle);

    orchestrator.startup().await.unwrap();
    orchestrator.run_cycle().await.unwrap();

    assert_eq!(
        pairs(&orchestrator.transitions().await),
        vec![
            (SyncPhase::Idle, SyncPhase::Checking),
            (SyncPhase::Checking, SyncPhase::Processing),
            (SyncPhase::Processing, SyncPhase::Idle),
            (SyncPhase::Idle, SyncPhase::Checking),
            (SyncPhase::Checking, SyncPhase::Idle),
        ]
    );
}

#[tokio::test]
async fn test_failure_passes_through_error_phase() {
    let fx = fixture().await;
    let reader = StaticReader::new(Vec::new());
    reader.set_unavailable(Some("gone".to_string())).await;
    let orchestrator = SyncOrchestrator::new(reader, fx.store.clone(), &fx.source, 1000);

    assert!(orchestrator.startup().await.is_err());

    let recorded = pairs(&orchestrator.transitions().await);
    assert_eq!(
        &recorded[recorded.len() - 2..],
        &[
            (SyncPhase::Processing, SyncPhase::Error),
            (SyncPhase::Error, SyncPhase::Idle),
        ]
    );
}

/// Reader that blocks until the test hands out a permit
struct GatedReader {
    inner: StaticReader,
    gate: Semaphore,
}

#[async_trait]
impl SourceReader for GatedReader {
    async fn read(&self) -> SyncResult<Vec<RawRecord>> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| SyncError::SourceUnavailable(e.to_string()))?;
        self.inner.read().await
    }

    fn describe(&self) -> String {
        "gated test source".to_string()
    }
}

#[tokio::test]
async fn test_trigger_during_processing_is_dropped() {
    let fx = fixture().await;
    let reader = Arc::new(GatedReader {
        inner: StaticReader::new(rows(0..10)),
        gate: Semaphore::new(0),
    });
    let orchestrator = Arc::new(SyncOrchestrator::new(Arc::clone(&reader), fx.store.clone(), &fx.source, 1000));

    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.startup().await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while orchestrator.phase().await != SyncPhase::Processing {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert!(orchestrator.is_running());
    assert_eq!(orchestrator.run_cycle().await.unwrap(), CycleOutcome::AlreadyRunning);
    assert!(orchestrator.spawn_cycle().is_none());

    reader.gate.add_permits(1);
    let report = synced(running.await.unwrap().unwrap());

    assert_eq!(report.rows_written, 10);
    assert!(!orchestrator.is_running());
    assert_eq!(fx.store.count().await.unwrap(), 10);
}

// ============================================================================
// Watch loop
// ============================================================================

#[tokio::test]
async fn test_file_change_triggers_debounced_sync() {
    let fx = fixture().await;
    let reader = Arc::new(StaticReader::new(rows(0..5)));
    let orchestrator = Arc::new(SyncOrchestrator::new(Arc::clone(&reader), fx.store.clone(), &fx.source, 1000));
    orchestrator.startup().await.unwrap();

    let cancel = CancellationToken::new();
    let watch = {
        let orchestrator = Arc::clone(&orchestrator);
        let source = fx.source.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { run_watch_loop(orchestrator, &source, Duration::from_millis(50), cancel).await })
    };

    // Give the watcher a moment to register before writing
    tokio::time::sleep(Duration::from_millis(100)).await;
    reader.append(rows(5..9)).await;
    touch(&fx.source);

    let store = fx.store.clone();
    tokio::time::timeout(Duration::from_secs(10), async move {
        while store.count().await.unwrap() < 9 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    watch.await.unwrap().unwrap();
    assert_eq!(orchestrator.watermark().await, Some(ts(8)));
}
