use sessionlog_core::{AppConfig, FlatRecord};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Append-only store for received records, one JSON object per line.
pub struct LogStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl LogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Append one record. Concurrent requests are serialized so lines
    /// never interleave.
    pub async fn append(&self, record: &FlatRecord) -> anyhow::Result<()> {
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

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Number of records currently in the log file.
    pub async fn count(&self) -> anyhow::Result<usize> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents.lines().count()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// Shared application state for the collector.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<LogStore>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let path = config
            .server
            .log_file
            .clone()
            .unwrap_or_else(|| AppConfig::data_dir().join("received_logs.jsonl"));
        Self {
            config,
            store: Arc::new(LogStore::new(path)),
        }
    }
}
