//! Configuration loading for topicsync-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`). Every
//! section and field is optional; missing values take the defaults below.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for topicsync-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Topic admission configuration.
    #[serde(default)]
    pub topics: TopicsConfig,
    /// Pipeline limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Sync engine storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Server configuration.
#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the ingestion listener (default: 0.0.0.0:9084).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Token clients must present in their handshake (default: empty).
    #[serde(default)]
    pub token: String,
    /// Topic used when the client does not name one (default: none).
    #[serde(default)]
    pub default_topic: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_address", &self.bind_address)
            .field("token", &"[REDACTED]")
            .field("default_topic", &self.default_topic)
            .finish()
    }
}

/// Topic admission configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicsConfig {
    /// Accept any topic (default: false).
    #[serde(default)]
    pub allow_all: bool,
    /// File listing allowed topics, one per line, `#` starts a comment line.
    /// When unset only the default topic is accepted.
    pub allowed_topics_file: Option<PathBuf>,
}

/// Pipeline limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Records buffered between the decoder and the sync engine (default: 1000).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Largest single frame accepted from a client (default: 16 MiB).
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Seconds to wait for an abandoned sync to stop before releasing its
    /// topic anyway (default: 30).
    #[serde(default = "default_abandon_grace_secs")]
    pub abandon_grace_secs: u64,
}

/// Storage backend for the built-in sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Topics live in process memory and are lost on restart.
    #[default]
    Memory,
    /// Topics live in a SQLite database.
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend to use (default: memory).
    #[serde(default)]
    pub backend: StorageBackend,
    /// Path to SQLite database file (default: topics.db).
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Serve /health, /status and /metrics (default: true).
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    /// Bind address for HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:9084".to_string()
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_max_frame_bytes() -> usize {
    sync_types::DEFAULT_MAX_FRAME_BYTES
}

fn default_abandon_grace_secs() -> u64 {
    30
}

fn default_database_path() -> PathBuf {
    PathBuf::from("topics.db")
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            token: String::new(),
            default_topic: String::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_frame_bytes: default_max_frame_bytes(),
            abandon_grace_secs: default_abandon_grace_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database: default_database_path(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_http_bind(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the relay unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.queue_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.limits.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.max_frame_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
