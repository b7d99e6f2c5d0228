//! Chunked, transactional persistence
//!
//! Readings are written in chunks of at most `batch_size`; each chunk is one
//! store transaction. A failing chunk stops the write: earlier chunks stay
//! committed, the failing chunk and everything after it are absent.

use crate::dedup::max_timestamp;
use thiserror::Error;
use tracing::{info, warn};
use zonetrack_common::{NormalizedReading, ReadingStore, ReadingTime};

/// Summary of a fully successful write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub chunks: usize,
    pub rows: u64,
    /// Latest timestamp written, `None` when nothing was written
    pub last_written: Option<ReadingTime>,
}

/// A chunk transaction failed partway through a write
#[derive(Debug, Error)]
#[error(
    "chunk {}/{} failed after {} committed rows: {}",
    .committed_chunks + 1,
    .total_chunks,
    .committed_rows,
    .source
)]
pub struct WriteFailure {
    /// Chunks committed before the failure
    pub committed_chunks: usize,
    pub total_chunks: usize,
    pub committed_rows: u64,
    /// Latest timestamp among committed rows
    pub last_committed: Option<ReadingTime>,
    #[source]
    pub source: zonetrack_common::Error,
}

/// Sizes of the chunks a write of `n` readings with batch size `b` uses
///
/// `b` of 0 is treated as 1.
pub fn chunk_plan(n: usize, b: usize) -> Vec<usize> {
    let b = b.max(1);
    let mut sizes = vec![b; n / b];
    if n % b != 0 {
        sizes.push(n % b);
    }
    sizes
}

/// Writes readings to the store in bounded transactions
#[derive(Debug, Clone)]
pub struct BatchWriter {
    store: ReadingStore,
    batch_size: usize,
}

impl BatchWriter {
    pub fn new(store: ReadingStore, batch_size: usize) -> Self {
        if batch_size == 0 {
            warn!("batch_size of 0 is invalid, using 1");
        }
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Persist `readings` (ascending by timestamp) chunk by chunk
    pub async fn write(&self, readings: &[NormalizedReading]) -> Result<WriteReport, WriteFailure> {
        let total_chunks = readings.len().div_ceil(self.batch_size);
        let mut report = WriteReport::default();

        for (i, chunk) in readings.chunks(self.batch_size).enumerate() {
            match self.store.insert_readings(chunk).await {
                Ok(rows) => {
                    report.chunks += 1;
                    report.rows += rows;
                    report.last_written = report.last_written.max(max_timestamp(chunk));
                    info!("Inserted batch {}/{}", i + 1, total_chunks);
                }
                Err(source) => {
                    return Err(WriteFailure {
                        committed_chunks: report.chunks,
                        total_chunks,
                        committed_rows: report.rows,
                        last_committed: report.last_written,
                        source,
                    });
                }
            }
        }

        Ok(report)
    }
}
