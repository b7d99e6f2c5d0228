//! Reading persistence and queries
//!
//! [`ReadingStore`] is the only way the sync engine and the query layer touch
//! the `temperature_readings` table:
//! - `insert_readings`: bulk append inside one transaction
//! - `max_timestamp`: high-water mark of persisted readings
//! - `get_readings` / `get_daily_readings`: paginated range queries
//! - `get_statistics`: min/max/avg over all zone columns combined

use super::init::{create_readings_table, init_database};
use super::models::{zone_column, NormalizedReading, PersistedReading, ReadingStats, ReadingsPage, ZONE_COUNT};
use crate::time::ReadingTime;
use crate::{Error, Result};
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Row limit used by the one-day convenience query
pub const DAILY_LIMIT: i64 = 1000;

fn insert_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        let columns: Vec<String> = (1..=ZONE_COUNT).map(zone_column).collect();
        let placeholders = vec!["?"; ZONE_COUNT + 2].join(", ");
        format!(
            "INSERT INTO temperature_readings (datetime, {}, events) VALUES ({})",
            columns.join(", "),
            placeholders
        )
    })
}

fn stats_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        // One value column per zone, stacked, so aggregates see every zone
        let stacked: Vec<String> = (1..=ZONE_COUNT)
            .map(|n| {
                format!(
                    "SELECT {} AS v FROM temperature_readings WHERE datetime BETWEEN ?1 AND ?2",
                    zone_column(n)
                )
            })
            .collect();
        format!(
            "SELECT MIN(v) AS min_v, MAX(v) AS max_v, AVG(v) AS avg_v, COUNT(v) AS samples FROM ({})",
            stacked.join(" UNION ALL ")
        )
    })
}

/// Handle to the reading store
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct ReadingStore {
    pool: SqlitePool,
}

impl ReadingStore {
    /// Open (or create) the store file and ensure the schema exists
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = init_database(db_path).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool, creating the schema if absent
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.create_schema_if_absent().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Idempotent schema creation
    pub async fn create_schema_if_absent(&self) -> Result<()> {
        create_readings_table(&self.pool).await
    }

    /// Maximum persisted timestamp, or `None` for an empty store
    pub async fn max_timestamp(&self) -> Result<Option<ReadingTime>> {
        let max: Option<String> = sqlx::query_scalar("SELECT MAX(datetime) FROM temperature_readings")
            .fetch_one(&self.pool)
            .await?;

        max.as_deref().map(ReadingTime::parse).transpose()
    }

    /// Append readings in a single transaction
    ///
    /// Either every reading becomes a row or none does. Returns the number of
    /// inserted rows.
    pub async fn insert_readings(&self, readings: &[NormalizedReading]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for reading in readings {
            let mut query = sqlx::query(insert_sql()).bind(reading.timestamp.canonical());
            for value in reading.zones {
                query = query.bind(value);
            }
            // Dropping `tx` on the error path rolls the transaction back
            let result = query.bind(reading.events).execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!(rows = inserted, "Committed reading transaction");

        Ok(inserted)
    }

    /// Readings with `start <= datetime <= end`, ascending, paginated
    pub async fn get_readings(
        &self,
        start: ReadingTime,
        end: ReadingTime,
        limit: i64,
        offset: i64,
    ) -> Result<ReadingsPage> {
        if limit < 0 || offset < 0 {
            return Err(Error::InvalidInput(format!(
                "limit and offset must be non-negative (limit={}, offset={})",
                limit, offset
            )));
        }

        let rows = sqlx::query(
            r#"
            SELECT *
            FROM temperature_readings
            WHERE datetime BETWEEN ? AND ?
            ORDER BY datetime, id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(start.canonical())
        .bind(end.canonical())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM temperature_readings WHERE datetime BETWEEN ? AND ?",
        )
        .bind(start.canonical())
        .bind(end.canonical())
        .fetch_one(&self.pool)
        .await?;

        let readings = rows
            .iter()
            .map(row_to_reading)
            .collect::<Result<Vec<_>>>()?;

        Ok(ReadingsPage { readings, total })
    }

    /// All readings of one calendar day (first [`DAILY_LIMIT`] rows)
    pub async fn get_daily_readings(&self, date: NaiveDate) -> Result<ReadingsPage> {
        let start = ReadingTime::start_of_day(date)
            .ok_or_else(|| Error::InvalidInput(format!("unsupported date {}", date)))?;
        let end = ReadingTime::end_of_day(date)
            .ok_or_else(|| Error::InvalidInput(format!("unsupported date {}", date)))?;
        self.get_readings(start, end, DAILY_LIMIT, 0).await
    }

    /// Min/max/average over every non-null zone value in the range
    pub async fn get_statistics(&self, start: ReadingTime, end: ReadingTime) -> Result<ReadingStats> {
        let row = sqlx::query(stats_sql())
            .bind(start.canonical())
            .bind(end.canonical())
            .fetch_one(&self.pool)
            .await?;

        Ok(ReadingStats {
            min: row.try_get("min_v")?,
            max: row.try_get("max_v")?,
            avg: row.try_get("avg_v")?,
            samples: row.try_get("samples")?,
        })
    }

    /// Total number of stored readings
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM temperature_readings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn row_to_reading(row: &SqliteRow) -> Result<PersistedReading> {
    let datetime: String = row.try_get("datetime")?;
    let mut zones = [None; ZONE_COUNT];
    for (i, slot) in zones.iter_mut().enumerate() {
        *slot = row.try_get::<Option<f64>, _>(zone_column(i + 1).as_str())?;
    }

    Ok(PersistedReading {
        id: row.try_get("id")?,
        reading: NormalizedReading {
            timestamp: ReadingTime::parse(&datetime)?,
            zones,
            events: row.try_get("events")?,
        },
    })
}
