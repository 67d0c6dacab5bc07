use crate::record::{OperationEntry, SessionRecord, ERROR_SUFFIX};
use crate::sink::FlatRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Floor for elapsed seconds when computing rates, so a zero-length
/// session never divides by zero.
pub const ELAPSED_EPSILON_SECS: f64 = 1e-6;

/// Derived metrics for one countable event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStats {
    pub count: u64,
    pub error_count: u64,
    /// count / max(elapsed_seconds, epsilon).
    pub rate_per_sec: f64,
    /// Timestamp of the event's first occurrence, if it occurred at all.
    pub first_time: Option<DateTime<Utc>>,
}

/// Immutable snapshot of a finalized session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub group: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_seconds: f64,
    /// Per-event stats, keyed by event name.
    pub events: BTreeMap<String, EventStats>,
    /// Operation log, truncated to the flattening capacity.
    pub operations: Vec<OperationEntry>,
    /// Number of indexed operation fields in the flattened record.
    pub operation_capacity: usize,
    /// True when any error counter is nonzero or any operation failed.
    pub has_error: bool,
}

impl SessionSummary {
    /// Compute the snapshot for a record being finalized at `end_time`.
    pub(crate) fn from_record(
        record: &SessionRecord,
        end_time: DateTime<Utc>,
        operation_capacity: usize,
    ) -> Self {
        let total_seconds =
            (end_time - record.start_time).num_milliseconds().max(0) as f64 / 1000.0;
        let elapsed = total_seconds.max(ELAPSED_EPSILON_SECS);

        let mut events = BTreeMap::new();
        for name in record.event_names() {
            let count = record.counter(name).unwrap_or(0);
            let error_count = record
                .counter(&format!("{name}{ERROR_SUFFIX}"))
                .unwrap_or(0);
            events.insert(
                name.clone(),
                EventStats {
                    count,
                    error_count,
                    rate_per_sec: count as f64 / elapsed,
                    first_time: record.first_occurrence(name),
                },
            );
        }

        let operations: Vec<OperationEntry> = record
            .operations()
            .iter()
            .take(operation_capacity)
            .cloned()
            .collect();

        let has_error = record
            .counters()
            .iter()
            .any(|(key, count)| key.ends_with(ERROR_SUFFIX) && *count > 0)
            || operations.iter().any(|op| op.error.is_some());

        Self {
            session_id: record.session_id.clone(),
            group: record.group.clone(),
            start_time: record.start_time,
            end_time,
            total_seconds,
            events,
            operations,
            operation_capacity,
            has_error,
        }
    }

    /// Flatten into the field-name → scalar record the sink contract expects.
    ///
    /// Timestamps are RFC 3339 strings. Operation fields are indexed from 1
    /// up to the configured capacity, with nulls past the recorded length.
    pub fn to_record(&self) -> FlatRecord {
        let mut record = FlatRecord::new();
        record.insert("session_id".into(), json!(self.session_id));
        record.insert("group".into(), json!(self.group));
        record.insert(
            "session_start_time".into(),
            json!(self.start_time.to_rfc3339()),
        );
        record.insert("session_end_time".into(), json!(self.end_time.to_rfc3339()));
        record.insert("total_session_seconds".into(), json!(self.total_seconds));
        record.insert("has_error".into(), json!(self.has_error));

        for (name, stats) in &self.events {
            record.insert(format!("{name}_count"), json!(stats.count));
            record.insert(format!("{name}_error_count"), json!(stats.error_count));
            record.insert(format!("{name}_rate"), json!(stats.rate_per_sec));
            record.insert(
                format!("{name}_first_time"),
                stats
                    .first_time
                    .map_or(Value::Null, |t| json!(t.to_rfc3339())),
            );
        }

        for i in 1..=self.operation_capacity {
            let entry = self.operations.get(i - 1);
            record.insert(
                format!("operation_name{i}"),
                entry.map_or(Value::Null, |op| json!(op.name)),
            );
            record.insert(
                format!("operation_is_error{i}"),
                entry.map_or(Value::Null, |op| json!(op.error.is_some())),
            );
        }

        record
    }
}
