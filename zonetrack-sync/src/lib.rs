//! zonetrack-sync library
//!
//! Incremental sync engine that mirrors the reading table of a legacy `.mdb`
//! container into the SQLite reading store:
//!
//! ```text
//! change/startup → ChangeDetector → SourceReader (full scan)
//!   → normalize (per row) → filter_new (watermark) → BatchWriter → store
//! ```
//!
//! [`SyncOrchestrator`] drives one cycle at a time; [`watch`] turns filesystem
//! notifications into debounced cycles.

pub mod dedup;
pub mod detector;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod source;
pub mod watch;
pub mod writer;

pub use crate::error::{SyncError, SyncResult};
pub use crate::orchestrator::{CycleOutcome, SyncOrchestrator, SyncPhase, SyncReport};
