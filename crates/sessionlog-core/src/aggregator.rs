//! Per-session event aggregation with an at-most-once finalize contract.

use crate::config::AggregatorConfig;
use crate::error::{Result, SessionLogError};
use crate::record::SessionRecord;
use crate::sink::SummarySink;
use crate::summary::SessionSummary;
use chrono::Utc;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

/// Outcome of the winning `finalize` call.
#[derive(Debug)]
pub struct Finalization {
    /// The sealed summary. Always present for the winner, even when
    /// emission failed — callers can persist it locally as a fallback.
    pub summary: SessionSummary,
    /// Result of handing the flattened record to the sink. An error here
    /// never rolls back finalization.
    pub emission: Result<()>,
}

/// Owns one [`SessionRecord`] per live session and mediates all mutations
/// and the terminal emission.
///
/// Sessions are independent: the outer map lock is held only to insert or
/// remove entries, and each record has its own lock, so activity on one
/// session never serializes against another. Mutation calls are best-effort
/// and never return errors — a UI event handler must not crash the
/// interaction it came from.
///
/// A session whose termination trigger never fires stays in the map for the
/// process lifetime; process exit reclaims it. There is deliberately no
/// timeout or reaper.
pub struct SessionEventAggregator {
    config: AggregatorConfig,
    sink: Arc<dyn SummarySink>,
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionRecord>>>>,
}

impl SessionEventAggregator {
    pub fn new(config: AggregatorConfig, sink: Arc<dyn SummarySink>) -> Self {
        Self {
            config,
            sink,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a session with a generated id.
    pub fn start_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let record = SessionRecord::new(&id, &self.config.events);
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::new(Mutex::new(record)));
        tracing::debug!(session_id = %id, "session started");
        id
    }

    /// Start a session under a caller-supplied id.
    pub fn start_session_with_id(&self, session_id: &str) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(SessionLogError::DuplicateSession(session_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(SessionRecord::new(
                    session_id,
                    &self.config.events,
                ))));
                tracing::debug!(session_id, "session started");
                Ok(())
            }
        }
    }

    /// Number of live (not yet finalized) sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn entry(&self, session_id: &str) -> Option<Arc<Mutex<SessionRecord>>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Increment the counter for `event` on a live session. Unknown
    /// sessions, finalized sessions, and unconfigured event names are
    /// dropped with a warning instead of raised.
    pub fn record_event(&self, session_id: &str, event: &str) {
        let Some(entry) = self.entry(session_id) else {
            tracing::warn!(session_id, event, "record_event on unknown session, dropped");
            return;
        };
        let mut record = entry.lock().unwrap_or_else(PoisonError::into_inner);
        if record.is_finalized() {
            tracing::warn!(session_id, event, "record_event after finalize, dropped");
        } else if !record.record_event(event, Utc::now()) {
            tracing::warn!(session_id, event, "record_event for unconfigured event, dropped");
        }
    }

    /// Increment the error counter for `event`. Same drop policy as
    /// [`record_event`](Self::record_event).
    pub fn record_error(&self, session_id: &str, event: &str) {
        let Some(entry) = self.entry(session_id) else {
            tracing::warn!(session_id, event, "record_error on unknown session, dropped");
            return;
        };
        let mut record = entry.lock().unwrap_or_else(PoisonError::into_inner);
        if record.is_finalized() {
            tracing::warn!(session_id, event, "record_error after finalize, dropped");
        } else if !record.record_error(event) {
            tracing::warn!(session_id, event, "record_error for unconfigured event, dropped");
        }
    }

    /// Append an operation (and its error message, if any) to the session's
    /// operation log.
    pub fn record_operation(&self, session_id: &str, name: &str, error: Option<String>) {
        let Some(entry) = self.entry(session_id) else {
            tracing::warn!(
                session_id,
                operation = name,
                "record_operation on unknown session, dropped"
            );
            return;
        };
        let mut record = entry.lock().unwrap_or_else(PoisonError::into_inner);
        if !record.record_operation(name, error) {
            tracing::warn!(
                session_id,
                operation = name,
                "record_operation after finalize, dropped"
            );
        }
    }

    /// Set the session's experiment group. The first assignment wins;
    /// later writes are dropped.
    pub fn set_group(&self, session_id: &str, group: &str) {
        let Some(entry) = self.entry(session_id) else {
            tracing::warn!(session_id, group, "set_group on unknown session, dropped");
            return;
        };
        let mut record = entry.lock().unwrap_or_else(PoisonError::into_inner);
        if !record.set_group(group) {
            tracing::warn!(session_id, group, "set_group rejected (already set or finalized)");
        }
    }

    /// Finalize a session: seal its counters, compute the summary, and emit
    /// the flattened record to the sink.
    ///
    /// At most one caller wins, no matter how many termination triggers
    /// race here — the per-record flag is checked and set under the entry
    /// lock, and losers get `None` immediately. The record is released from
    /// the map before emission is awaited, so a slow sink never holds
    /// memory or blocks other triggers.
    ///
    /// An emission failure is reported in [`Finalization::emission`] but
    /// the session stays finalized — retrying would risk double-counting
    /// downstream.
    pub async fn finalize(&self, session_id: &str) -> Option<Finalization> {
        let entry = match self.entry(session_id) {
            Some(entry) => entry,
            None => {
                tracing::warn!(session_id, "finalize on unknown session, dropped");
                return None;
            }
        };

        let summary = {
            let mut record = entry.lock().unwrap_or_else(PoisonError::into_inner);
            record.try_finalize(Utc::now(), self.config.operation_log_capacity)?
        };

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);

        let emission = self.sink.emit(&summary.to_record()).await;
        match &emission {
            Ok(()) => tracing::info!(session_id, "session summary emitted"),
            Err(e) => tracing::warn!(session_id, error = %e, "summary emission failed"),
        }

        Some(Finalization { summary, emission })
    }
}
