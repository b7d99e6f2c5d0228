//! Record normalization
//!
//! Turns one [`RawRecord`] into a [`NormalizedReading`] or a [`SkipReason`].
//!
//! **Rules:**
//! - Date and time are looked up under ordered candidate keys; `null` and
//!   blank cells count as missing
//! - The timestamp takes Y/M/D from the date cell and H:M:S from the time cell
//! - Zone values that are not finite numbers become `None`
//! - Events default to 0 and are truncated toward zero

mod datetime;

pub use datetime::{from_ole_serial, parse_date_value, parse_time_value};

use crate::source::RawRecord;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};
use zonetrack_common::{NormalizedReading, ReadingTime, ZONE_COUNT};

/// Candidate keys of the date column
pub const DATE_KEYS: &[&str] = &["date", "Date", "DATE"];
/// Candidate keys of the time column
pub const TIME_KEYS: &[&str] = &["time", "Time", "TIME"];
/// Candidate keys of the event counter column
pub const EVENT_KEYS: &[&str] = &["Events", "events", "EVENTS"];

/// Skips logged individually per scan before switching to a summary
const SKIP_LOG_LIMIT: usize = 20;
/// Records logged as original/processed samples per scan
const SAMPLE_LOG_LIMIT: usize = 5;

// ============================================================================
// Skip decisions
// ============================================================================

/// Why a source record produced no reading
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    /// Neither candidate key carried a value
    #[error("missing {field} field")]
    MissingField { field: &'static str },

    /// Date cell did not parse as a calendar date
    #[error("invalid date value {0}")]
    InvalidDate(String),

    /// Time cell did not parse as a wall-clock time
    #[error("invalid time value {0}")]
    InvalidTime(String),

    /// Both cells parsed but their combination is out of range
    #[error("date {date} and time {time} do not form a valid timestamp")]
    InvalidComposed { date: String, time: String },
}

impl SkipReason {
    /// Stable short name, used as key in skip statistics
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::MissingField { .. } => "missing-field",
            SkipReason::InvalidDate(_) => "invalid-date",
            SkipReason::InvalidTime(_) => "invalid-time",
            SkipReason::InvalidComposed { .. } => "invalid-composed",
        }
    }
}

// ============================================================================
// Per-record normalization
// ============================================================================

/// Normalize one source record
pub fn normalize(record: &RawRecord) -> Result<NormalizedReading, SkipReason> {
    let (_, date_value) = record
        .lookup(DATE_KEYS)
        .ok_or(SkipReason::MissingField { field: "date" })?;
    let (_, time_value) = record
        .lookup(TIME_KEYS)
        .ok_or(SkipReason::MissingField { field: "time" })?;

    let date = parse_date_value(date_value).ok_or_else(|| SkipReason::InvalidDate(date_value.to_string()))?;
    let time = parse_time_value(time_value).ok_or_else(|| SkipReason::InvalidTime(time_value.to_string()))?;

    let timestamp = ReadingTime::compose(date, time).ok_or_else(|| SkipReason::InvalidComposed {
        date: date_value.to_string(),
        time: time_value.to_string(),
    })?;

    let mut zones = [None; ZONE_COUNT];
    for (i, slot) in zones.iter_mut().enumerate() {
        let upper = format!("T{}", i + 1);
        let lower = format!("t{}", i + 1);
        *slot = record
            .lookup(&[upper.as_str(), lower.as_str()])
            .and_then(|(_, value)| coerce_number(value));
    }

    let events = record
        .lookup(EVENT_KEYS)
        .and_then(|(_, value)| coerce_number(value))
        .map(|v| v.trunc() as i64)
        .unwrap_or(0);

    Ok(NormalizedReading {
        timestamp,
        zones,
        events,
    })
}

/// Finite number from a numeric or numeric-text cell
pub fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

// ============================================================================
// Whole-scan normalization
// ============================================================================

/// Outcome of normalizing one full scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    /// Readings in source order
    pub readings: Vec<NormalizedReading>,
    /// Total skipped records
    pub skipped: usize,
    /// Skipped records per [`SkipReason::label`]
    pub skip_counts: BTreeMap<&'static str, usize>,
}

/// Normalize every record of a scan, counting and logging skips
pub fn normalize_all(records: &[RawRecord]) -> NormalizeReport {
    let mut report = NormalizeReport {
        readings: Vec::with_capacity(records.len()),
        ..Default::default()
    };

    for (index, record) in records.iter().enumerate() {
        let outcome = normalize(record);

        if index < SAMPLE_LOG_LIMIT {
            debug!(
                index,
                original = %serde_json::to_string(record).unwrap_or_default(),
                processed = ?outcome,
                "Sample record"
            );
        }

        match outcome {
            Ok(reading) => report.readings.push(reading),
            Err(reason) => {
                if report.skipped < SKIP_LOG_LIMIT {
                    warn!(index, reason = reason.label(), "Skipping record: {}", reason);
                }
                report.skipped += 1;
                *report.skip_counts.entry(reason.label()).or_insert(0) += 1;
            }
        }
    }

    if report.skipped > SKIP_LOG_LIMIT {
        warn!(
            skipped = report.skipped,
            counts = ?report.skip_counts,
            "Further skipped records not logged individually"
        );
    }

    report
}
