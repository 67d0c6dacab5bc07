//! Concrete [`SummarySink`] implementations.
//!
//! The aggregator hands every finalized session to exactly one `emit` call;
//! these sinks cover the two transports the system uses (HTTP POST to the
//! collector, append to a local JSON-lines file) plus a fallback combinator
//! that chains them.

use async_trait::async_trait;
use sessionlog_core::config::SinkConfig;
use sessionlog_core::{AppConfig, FlatRecord, NoopSink, Result, SessionLogError, SummarySink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// POSTs each flattened record as JSON to a collector endpoint.
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| SessionLogError::Config(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl SummarySink for HttpSink {
    async fn emit(&self, record: &FlatRecord) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(record)
            .send()
            .await
            .map_err(|e| SessionLogError::Emission(e.to_string()))?;
        response
            .error_for_status()
            .map_err(|e| SessionLogError::Emission(e.to_string()))?;
        Ok(())
    }
}

/// Appends each record as one JSON line to a local file.
///
/// Creates the parent directory on first write. Writes within one process
/// are serialized by a lock so interleaved emissions never tear a line.
pub struct JsonlSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SummarySink for JsonlSink {
    async fn emit(&self, record: &FlatRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Tries a primary sink and falls through to a fallback on failure.
///
/// Returns Ok when either delivery succeeds; the original error surfaces
/// only when both fail.
pub struct FallbackSink {
    primary: Arc<dyn SummarySink>,
    fallback: Arc<dyn SummarySink>,
}

impl FallbackSink {
    pub fn new(primary: Arc<dyn SummarySink>, fallback: Arc<dyn SummarySink>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl SummarySink for FallbackSink {
    async fn emit(&self, record: &FlatRecord) -> Result<()> {
        match self.primary.emit(record).await {
            Ok(()) => Ok(()),
            Err(primary_err) => {
                tracing::warn!(error = %primary_err, "primary sink failed, using fallback");
                self.fallback.emit(record).await.map_err(|fallback_err| {
                    tracing::error!(error = %fallback_err, "fallback sink also failed");
                    primary_err
                })
            }
        }
    }
}

/// Build the sink stack described by the configuration.
///
/// Endpoint configured → HTTP sink with the local file as fallback.
/// No endpoint → local file only. Neither → discard.
pub fn build_sink(config: &AppConfig) -> Result<Arc<dyn SummarySink>> {
    let fallback_path = config
        .sink
        .fallback_file
        .clone()
        .unwrap_or_else(|| AppConfig::data_dir().join("session_log.jsonl"));
    build_from(&config.sink, fallback_path)
}

fn build_from(sink: &SinkConfig, fallback_path: PathBuf) -> Result<Arc<dyn SummarySink>> {
    let file = Arc::new(JsonlSink::new(fallback_path));
    match &sink.endpoint {
        Some(endpoint) if !endpoint.is_empty() => {
            let http = Arc::new(HttpSink::new(endpoint.clone(), sink.timeout_secs)?);
            Ok(Arc::new(FallbackSink::new(http, file)))
        }
        Some(_) => {
            tracing::warn!("empty sink endpoint configured, discarding summaries");
            Ok(Arc::new(NoopSink))
        }
        None => Ok(file as Arc<dyn SummarySink>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> FlatRecord {
        let mut record = FlatRecord::new();
        record.insert("session_id".into(), json!("s1"));
        record.insert("apply_count".into(), json!(3));
        record.insert("group".into(), serde_json::Value::Null);
        record
    }

    struct FailingSink;

    #[async_trait]
    impl SummarySink for FailingSink {
        async fn emit(&self, _record: &FlatRecord) -> Result<()> {
            Err(SessionLogError::Emission("down".into()))
        }
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_parseable_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs").join("out.jsonl");
        let sink = JsonlSink::new(&path);

        sink.emit(&sample_record()).await.unwrap();
        sink.emit(&sample_record()).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: FlatRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["session_id"], json!("s1"));
            assert_eq!(parsed["apply_count"], json!(3));
        }
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fallback.jsonl");
        let sink = FallbackSink::new(
            Arc::new(FailingSink),
            Arc::new(JsonlSink::new(&path)),
        );

        sink.emit(&sample_record()).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_error_surfaces_when_both_fail() {
        let sink = FallbackSink::new(Arc::new(FailingSink), Arc::new(FailingSink));
        match sink.emit(&sample_record()).await {
            Err(SessionLogError::Emission(msg)) => assert_eq!(msg, "down"),
            other => panic!("expected Emission error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_sink_reports_unreachable_collector() {
        // Nothing listens on this port; the request must fail as Emission.
        let sink = HttpSink::new("http://127.0.0.1:1/log", 1).unwrap();
        match sink.emit(&sample_record()).await {
            Err(SessionLogError::Emission(_)) => {}
            other => panic!("expected Emission error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_sink_delivers_to_collector() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.server.log_file = Some(tmp.path().join("received.jsonl"));
        let state = sessionlog_server::AppState::new(config);
        let store = state.store.clone();
        let app = sessionlog_server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sink = HttpSink::new(format!("http://{addr}/log"), 5).unwrap();
        sink.emit(&sample_record()).await.unwrap();
        sink.emit(&sample_record()).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[test]
    fn test_build_sink_defaults_to_file() {
        let config = AppConfig::default();
        assert!(build_sink(&config).is_ok());
    }
}
