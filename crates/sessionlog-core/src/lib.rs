//! Session event aggregation and at-most-once summary emission.
//!
//! Tracks per-session interaction counters and timestamps for the lifetime
//! of a session, computes derived rate metrics when the session ends, and
//! guarantees the summary is emitted exactly once even when independent
//! termination triggers race to finalize the same session.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod record;
pub mod sink;
pub mod summary;

pub use aggregator::{Finalization, SessionEventAggregator};
pub use config::AppConfig;
pub use error::{Result, SessionLogError};
pub use record::{OperationEntry, SessionRecord};
pub use sink::{FlatRecord, NoopSink, SummarySink};
pub use summary::{EventStats, SessionSummary};
