use crate::summary::SessionSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Suffix appended to an event name to form its error counter key.
pub const ERROR_SUFFIX: &str = "_error";

/// One entry in a session's operation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationEntry {
    pub name: String,
    /// Error message when the operation failed, None on success.
    pub error: Option<String>,
}

/// In-memory state for one active session.
///
/// Counter keys are fixed at construction: one counter per configured event
/// name plus an `_error`-suffixed twin. Counters only increase, and no field
/// mutates after `try_finalize` has produced a summary.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    /// Experiment arm label, set once by the caller (never randomized here).
    pub group: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Set exactly once, at finalization.
    pub end_time: Option<DateTime<Utc>>,
    counters: HashMap<String, u64>,
    first_occurrence: HashMap<String, Option<DateTime<Utc>>>,
    operation_log: Vec<OperationEntry>,
    finalized: bool,
}

impl SessionRecord {
    /// Create a record with all counters for `events` initialized to zero.
    pub fn new(session_id: impl Into<String>, events: &[String]) -> Self {
        let mut counters = HashMap::new();
        let mut first_occurrence = HashMap::new();
        for event in events {
            counters.insert(event.clone(), 0);
            counters.insert(format!("{event}{ERROR_SUFFIX}"), 0);
            first_occurrence.insert(event.clone(), None);
        }
        Self {
            session_id: session_id.into(),
            group: None,
            start_time: Utc::now(),
            end_time: None,
            counters,
            first_occurrence,
            operation_log: Vec::new(),
            finalized: false,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Increment the counter for `event` and stamp its first occurrence.
    /// Returns false if the event name is not a configured counter key
    /// or the record is already finalized.
    pub fn record_event(&mut self, event: &str, at: DateTime<Utc>) -> bool {
        if self.finalized {
            return false;
        }
        let Some(count) = self.counters.get_mut(event) else {
            return false;
        };
        *count += 1;
        if let Some(first) = self.first_occurrence.get_mut(event) {
            first.get_or_insert(at);
        }
        true
    }

    /// Increment the `_error` counter for `event`.
    pub fn record_error(&mut self, event: &str) -> bool {
        if self.finalized {
            return false;
        }
        let key = format!("{event}{ERROR_SUFFIX}");
        let Some(count) = self.counters.get_mut(&key) else {
            return false;
        };
        *count += 1;
        true
    }

    /// Append an operation to the log. Returns false once finalized.
    pub fn record_operation(&mut self, name: impl Into<String>, error: Option<String>) -> bool {
        if self.finalized {
            return false;
        }
        self.operation_log.push(OperationEntry {
            name: name.into(),
            error,
        });
        true
    }

    /// Set the experiment group. The first write wins; overwriting an
    /// already-set group is rejected to preserve assignment stability.
    pub fn set_group(&mut self, group: impl Into<String>) -> bool {
        if self.finalized || self.group.is_some() {
            return false;
        }
        self.group = Some(group.into());
        true
    }

    /// Current value of a counter key (`event` or `event_error`).
    pub fn counter(&self, key: &str) -> Option<u64> {
        self.counters.get(key).copied()
    }

    pub fn first_occurrence(&self, event: &str) -> Option<DateTime<Utc>> {
        self.first_occurrence.get(event).copied().flatten()
    }

    pub fn operations(&self) -> &[OperationEntry] {
        &self.operation_log
    }

    pub(crate) fn counters(&self) -> &HashMap<String, u64> {
        &self.counters
    }

    pub(crate) fn event_names(&self) -> impl Iterator<Item = &String> {
        self.first_occurrence.keys()
    }

    /// Check-and-set finalization. The first call seals the record, stamps
    /// `end_time`, and returns the computed summary; every later call
    /// returns None. Callers serialize access through the aggregator's
    /// per-entry lock, which makes this the at-most-once point.
    pub fn try_finalize(
        &mut self,
        end_time: DateTime<Utc>,
        operation_capacity: usize,
    ) -> Option<SessionSummary> {
        if self.finalized {
            return None;
        }
        self.finalized = true;
        self.end_time = Some(end_time);
        Some(SessionSummary::from_record(self, end_time, operation_capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn events() -> Vec<String> {
        vec!["apply".into(), "revert".into(), "download".into()]
    }

    #[test]
    fn test_counters_initialized_to_zero() {
        let record = SessionRecord::new("s1", &events());
        assert_eq!(record.counter("apply"), Some(0));
        assert_eq!(record.counter("apply_error"), Some(0));
        assert_eq!(record.counter("download_error"), Some(0));
        assert_eq!(record.counter("unknown"), None);
    }

    #[test]
    fn test_record_event_increments_and_stamps_first() {
        let mut record = SessionRecord::new("s1", &events());
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(5);

        assert!(record.record_event("apply", t1));
        assert!(record.record_event("apply", t2));
        assert_eq!(record.counter("apply"), Some(2));
        assert_eq!(record.first_occurrence("apply"), Some(t1));
        assert_eq!(record.first_occurrence("revert"), None);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let mut record = SessionRecord::new("s1", &events());
        assert!(!record.record_event("nope", Utc::now()));
        assert!(!record.record_error("nope"));
    }

    #[test]
    fn test_group_set_once() {
        let mut record = SessionRecord::new("s1", &events());
        assert!(record.set_group("A"));
        assert!(!record.set_group("B"));
        assert_eq!(record.group.as_deref(), Some("A"));
    }

    #[test]
    fn test_try_finalize_once() {
        let mut record = SessionRecord::new("s1", &events());
        record.record_event("apply", Utc::now());

        let end = Utc::now();
        assert!(record.try_finalize(end, 10).is_some());
        assert!(record.is_finalized());
        assert_eq!(record.end_time, Some(end));
        assert!(record.try_finalize(Utc::now(), 10).is_none());
    }

    #[test]
    fn test_mutation_after_finalize_is_dropped() {
        let mut record = SessionRecord::new("s1", &events());
        record.try_finalize(Utc::now(), 10);

        assert!(!record.record_event("apply", Utc::now()));
        assert!(!record.record_error("apply"));
        assert!(!record.record_operation("impute", None));
        assert!(!record.set_group("A"));
        assert_eq!(record.counter("apply"), Some(0));
        assert!(record.operations().is_empty());
    }
}
