//! # ZoneTrack Common Library
//!
//! Shared code for the ZoneTrack sync service and its collaborators:
//! - Reading store (schema, bulk append, range queries, statistics)
//! - Canonical reading timestamps
//! - Bootstrap configuration loading and resolution
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use db::{NormalizedReading, ReadingStore, ZONE_COUNT};
pub use error::{Error, Result};
pub use time::ReadingTime;
