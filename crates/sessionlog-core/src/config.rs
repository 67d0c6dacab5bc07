use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub aggregator: AggregatorConfig,
    pub sink: SinkConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from the default path (~/.config/sessionlog/config.toml),
    /// falling back to defaults if the file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sessionlog")
            .join("config.toml")
    }

    /// Data directory for received logs and local fallback files.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sessionlog")
    }
}

/// Aggregator configuration: which events are counted and how the
/// operation log is flattened at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Countable event names. Each gets a count, an error count, a rate,
    /// and a first-occurrence timestamp in the emitted summary. The key set
    /// is fixed at session start.
    pub events: Vec<String>,
    /// Number of indexed `operation_name{i}` / `operation_is_error{i}`
    /// fields in the flattened record.
    pub operation_log_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            events: vec!["apply".into(), "revert".into(), "download".into()],
            operation_log_capacity: 10,
        }
    }
}

/// Emission sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Collector endpoint URL (e.g. "http://127.0.0.1:5000/log").
    /// None = emit to the local fallback file only.
    pub endpoint: Option<String>,
    /// Local JSON-lines file used when the endpoint is unset or unreachable.
    /// None = resolved at runtime to data_dir/session_log.jsonl.
    pub fallback_file: Option<PathBuf>,
    /// Request timeout for the HTTP sink, in seconds.
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            fallback_file: None,
            timeout_secs: 10,
        }
    }
}

/// Collector server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Bearer token for authentication (None = no auth).
    pub auth_token: Option<String>,
    /// Enable CORS.
    pub cors: bool,
    /// File that received records are appended to.
    /// None = resolved at runtime to data_dir/received_logs.jsonl.
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            auth_token: None,
            cors: true,
            log_file: None,
        }
    }
}
