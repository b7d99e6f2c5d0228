//! Reading timestamps
//!
//! Every persisted reading carries a [`ReadingTime`]: a naive local calendar
//! instant with whole-second precision and a four-digit year. The canonical
//! text form (`YYYY-MM-DDTHH:MM:SS`) is what the store writes to the
//! `datetime` column, so lexicographic order on stored text equals
//! chronological order on `ReadingTime`.

use crate::{Error, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// strftime pattern of the canonical text form
pub const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const MIN_YEAR: i32 = 1;
const MAX_YEAR: i32 = 9999;

/// Whole-second local timestamp of a single reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReadingTime(NaiveDateTime);

impl ReadingTime {
    /// Compose a timestamp from the calendar date of one value and the
    /// wall-clock time of another.
    ///
    /// Sub-second precision is dropped. Returns `None` when the result falls
    /// outside years 0001-9999.
    pub fn compose(date: NaiveDate, time: NaiveTime) -> Option<Self> {
        let time = NaiveTime::from_hms_opt(time.hour(), time.minute(), time.second())?;
        Self::from_naive(NaiveDateTime::new(date, time))
    }

    /// Wrap a naive datetime, truncating sub-second precision
    pub fn from_naive(value: NaiveDateTime) -> Option<Self> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&value.year()) {
            return None;
        }
        value.with_nanosecond(0).map(Self)
    }

    /// Build from explicit components (convenience for callers and tests)
    pub fn from_ymd_hms(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let time = NaiveTime::from_hms_opt(hour, min, sec)?;
        Self::compose(date, time)
    }

    /// First second of a calendar day
    pub fn start_of_day(date: NaiveDate) -> Option<Self> {
        Self::compose(date, NaiveTime::MIN)
    }

    /// Last whole second of a calendar day
    pub fn end_of_day(date: NaiveDate) -> Option<Self> {
        Self::compose(date, NaiveTime::from_hms_opt(23, 59, 59)?)
    }

    /// Parse the canonical `YYYY-MM-DDTHH:MM:SS` form
    pub fn parse(text: &str) -> Result<Self> {
        let value = NaiveDateTime::parse_from_str(text.trim(), CANONICAL_FORMAT)
            .map_err(|e| Error::InvalidData(format!("'{}' is not a reading timestamp: {}", text, e)))?;
        Self::from_naive(value)
            .ok_or_else(|| Error::InvalidData(format!("'{}' is out of the supported year range", text)))
    }

    /// Canonical text form used for storage and comparison
    pub fn canonical(&self) -> String {
        self.0.format(CANONICAL_FORMAT).to_string()
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.0.time()
    }
}

impl fmt::Display for ReadingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(CANONICAL_FORMAT))
    }
}

impl FromStr for ReadingTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ReadingTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReadingTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
