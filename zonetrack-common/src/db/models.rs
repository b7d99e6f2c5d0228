//! Reading models shared by the sync engine and the query layer

use crate::time::ReadingTime;
use serde::{Deserialize, Serialize};

/// Number of sensor zone columns (`T1`..`T14`)
pub const ZONE_COUNT: usize = 14;

/// One canonical sensor reading
///
/// A reading only exists with a valid timestamp; zone values are independent
/// and may all be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedReading {
    pub timestamp: ReadingTime,
    /// Zone values in column order (`zones[0]` is `T1`)
    pub zones: [Option<f64>; ZONE_COUNT],
    pub events: i64,
}

impl NormalizedReading {
    /// Reading with no zone values and zero events
    pub fn empty(timestamp: ReadingTime) -> Self {
        Self {
            timestamp,
            zones: [None; ZONE_COUNT],
            events: 0,
        }
    }

    /// Value of zone `n` (1-based, matching the `Tn` column names)
    pub fn zone(&self, n: usize) -> Option<f64> {
        n.checked_sub(1)
            .and_then(|i| self.zones.get(i))
            .copied()
            .flatten()
    }
}

/// A reading as stored, with its surrogate id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedReading {
    pub id: i64,
    #[serde(flatten)]
    pub reading: NormalizedReading,
}

/// One page of a range query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingsPage {
    pub readings: Vec<PersistedReading>,
    /// Rows in the whole range, ignoring limit/offset
    pub total: i64,
}

/// Aggregates over every non-null zone value in a range, all zones combined
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadingStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    /// Number of non-null zone values aggregated
    pub samples: i64,
}

/// Column name of zone `n` (1-based)
pub fn zone_column(n: usize) -> String {
    format!("T{}", n)
}
