//! Source container access
//!
//! The container can only be read in full: every [`SourceReader::read`] is a
//! complete scan of the reading table, producing one [`RawRecord`] per row.

mod mdb;

pub use mdb::{parse_export, MdbJsonReader, EXPORT_DATETIME_FORMAT, EXPORT_DATE_FORMAT};

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One source row: column name → cell value, exactly as exported
///
/// Column names are not normalized; the same logical column can appear with
/// different capitalization between containers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// First present value among `candidates`, in order
    ///
    /// `null` and blank strings count as absent.
    pub fn lookup<'a>(&'a self, candidates: &[&'a str]) -> Option<(&'a str, &'a Value)> {
        candidates.iter().find_map(|key| {
            self.0
                .get(*key)
                .filter(|value| is_present(value))
                .map(|value| (*key, value))
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Full-scan access to the reading table
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Read every row of the reading table
    ///
    /// Fails with [`SyncError::SourceUnavailable`] when the container cannot
    /// be opened or the table is missing.
    async fn read(&self) -> SyncResult<Vec<RawRecord>>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

#[async_trait]
impl<T: SourceReader + ?Sized> SourceReader for Arc<T> {
    async fn read(&self) -> SyncResult<Vec<RawRecord>> {
        (**self).read().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// In-memory source, for tests and dry runs
///
/// Contents can be replaced between scans to simulate upstream appends.
#[derive(Debug, Default)]
pub struct StaticReader {
    records: Mutex<Vec<RawRecord>>,
    unavailable: Mutex<Option<String>>,
}

impl StaticReader {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            unavailable: Mutex::new(None),
        }
    }

    /// Replace the table contents
    pub async fn set_records(&self, records: Vec<RawRecord>) {
        *self.records.lock().await = records;
    }

    /// Append rows, as the upstream writer would
    pub async fn append(&self, records: impl IntoIterator<Item = RawRecord>) {
        self.records.lock().await.extend(records);
    }

    /// Make subsequent reads fail (`Some`) or succeed again (`None`)
    pub async fn set_unavailable(&self, reason: Option<String>) {
        *self.unavailable.lock().await = reason;
    }
}

#[async_trait]
impl SourceReader for StaticReader {
    async fn read(&self) -> SyncResult<Vec<RawRecord>> {
        if let Some(reason) = self.unavailable.lock().await.clone() {
            return Err(SyncError::SourceUnavailable(reason));
        }
        Ok(self.records.lock().await.clone())
    }

    fn describe(&self) -> String {
        "in-memory source".to_string()
    }
}
