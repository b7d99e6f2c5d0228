//! Watermark-based dedup filter
//!
//! Readings sharing a timestamp are never compared with each other; only the
//! persisted watermark decides what is new.

use zonetrack_common::{NormalizedReading, ReadingTime};

/// Keep the readings strictly newer than `watermark`, in their original order
///
/// With no watermark (empty store) every reading is new.
pub fn filter_new(readings: Vec<NormalizedReading>, watermark: Option<ReadingTime>) -> Vec<NormalizedReading> {
    match watermark {
        None => readings,
        Some(mark) => readings.into_iter().filter(|r| r.timestamp > mark).collect(),
    }
}

/// Latest timestamp among `readings`
pub fn max_timestamp(readings: &[NormalizedReading]) -> Option<ReadingTime> {
    readings.iter().map(|r| r.timestamp).max()
}
