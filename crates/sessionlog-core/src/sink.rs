use crate::error::Result;
use async_trait::async_trait;

/// A flattened session summary: field name → scalar JSON value.
pub type FlatRecord = serde_json::Map<String, serde_json::Value>;

/// Downstream destination for finalized session summaries.
///
/// The aggregator only requires a single emit call per finalized session;
/// transport (HTTP POST, append-to-file, ...) is the implementation's
/// concern.
#[async_trait]
pub trait SummarySink: Send + Sync {
    async fn emit(&self, record: &FlatRecord) -> Result<()>;
}

/// Sink that discards every record. Used in tests and as the default when
/// no emission target is configured.
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl SummarySink for NoopSink {
    async fn emit(&self, _record: &FlatRecord) -> Result<()> {
        Ok(())
    }
}
