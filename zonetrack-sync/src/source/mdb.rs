//! `.mdb` container access through the mdbtools JSON exporter
//!
//! `mdb-json <file> <table>` prints one JSON object per table row. Cell types
//! survive the export: numbers stay numbers, text stays text, and date/time
//! columns are rendered with the formats passed via `-D`/`-T`.

use super::{RawRecord, SourceReader};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Format requested for date-only cells
pub const EXPORT_DATE_FORMAT: &str = "%Y-%m-%d";
/// Format requested for date/time cells (time-of-day columns included)
pub const EXPORT_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Reads the reading table by running the exporter as a child process
#[derive(Debug, Clone)]
pub struct MdbJsonReader {
    source: PathBuf,
    table: String,
    exporter: PathBuf,
}

impl MdbJsonReader {
    pub fn new(source: impl Into<PathBuf>, table: impl Into<String>, exporter: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            table: table.into(),
            exporter: exporter.into(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[async_trait]
impl SourceReader for MdbJsonReader {
    async fn read(&self) -> SyncResult<Vec<RawRecord>> {
        if let Err(e) = tokio::fs::metadata(&self.source).await {
            return Err(SyncError::SourceUnavailable(format!(
                "cannot open {}: {}",
                self.source.display(),
                e
            )));
        }

        debug!(
            exporter = %self.exporter.display(),
            table = %self.table,
            "Exporting source table"
        );

        let output = Command::new(&self.exporter)
            .arg("-D")
            .arg(EXPORT_DATE_FORMAT)
            .arg("-T")
            .arg(EXPORT_DATETIME_FORMAT)
            .arg(&self.source)
            .arg(&self.table)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SyncError::SourceUnavailable(format!(
                    "failed to run {}: {}",
                    self.exporter.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::SourceUnavailable(format!(
                "{} exited with {} reading table '{}' from {}: {}",
                self.exporter.display(),
                output.status,
                self.table,
                self.source.display(),
                stderr.trim()
            )));
        }

        Ok(parse_export(&String::from_utf8_lossy(&output.stdout)))
    }

    fn describe(&self) -> String {
        format!("{} (table {})", self.source.display(), self.table)
    }
}

/// Parse exporter output into raw records
///
/// Blank lines are ignored. A line that is not a JSON object is logged and
/// dropped.
pub fn parse_export(text: &str) -> Vec<RawRecord> {
    let mut records = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => records.push(RawRecord::from(map)),
            Ok(other) => warn!(
                line = index + 1,
                kind = json_kind(&other),
                "Ignoring exported line that is not a row object"
            ),
            Err(e) => warn!(line = index + 1, error = %e, "Ignoring unparsable exported line"),
        }
    }

    records
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
