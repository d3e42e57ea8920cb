//! topicsync-relay binary entry point.
//!
//! Usage:
//! ```bash
//! topicsync-relay --config relay.toml
//! topicsync-relay --token secret --default-topic orders
//! topicsync-relay --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use topicsync_relay::config::{Config, StorageBackend};
use topicsync_relay::engine::StoreEngine;
use topicsync_relay::server::SyncRelay;
use topicsync_relay::storage::{MemoryTopicStore, SqliteTopicStore, TopicStore};
use tracing_subscriber::EnvFilter;

/// Streaming key/value ingestion server.
#[derive(Parser, Debug)]
#[command(name = "topicsync-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (missing file means all defaults)
    #[arg(long, short, default_value = "relay.toml")]
    config: PathBuf,

    /// Token clients must present
    #[arg(long, env = "TOPICSYNC_TOKEN")]
    token: Option<String>,

    /// Topic used when a client names none
    #[arg(long)]
    default_topic: Option<String>,

    /// Accept every topic
    #[arg(long)]
    allow_all_topics: bool,

    /// File listing allowed topics, one per line
    #[arg(long, conflicts_with = "allow_all_topics")]
    allowed_topics_file: Option<PathBuf>,

    /// Ingestion listener address
    #[arg(long)]
    bind: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = if self.config.exists() {
            Config::from_file(&self.config)
                .with_context(|| format!("Failed to load {}", self.config.display()))?
        } else {
            tracing::info!("{} not found, using defaults", self.config.display());
            Config::default()
        };

        if let Some(token) = &self.token {
            config.server.token = token.clone();
        }
        if let Some(topic) = &self.default_topic {
            config.server.default_topic = topic.clone();
        }
        if self.allow_all_topics {
            config.topics.allow_all = true;
        }
        if let Some(path) = &self.allowed_topics_file {
            config.topics.allowed_topics_file = Some(path.clone());
        }
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
    install_panic_hook();

    let config = cli.load_config()?;
    if config.server.token.is_empty() {
        tracing::warn!("No token configured: clients must send an empty token");
    }

    let store: Arc<dyn TopicStore> = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory topic store");
            Arc::new(MemoryTopicStore::new())
        }
        StorageBackend::Sqlite => {
            tracing::info!("Using SQLite topic store at {}", config.storage.database.display());
            Arc::new(
                SqliteTopicStore::new(&config.storage.database)
                    .await
                    .context("Failed to open topic database")?,
            )
        }
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;

    let http = config.http.clone();
    let relay = Arc::new(SyncRelay::new(config, Arc::new(StoreEngine::new(store))));

    if http.enabled {
        let relay = relay.clone();
        tokio::spawn(async move {
            if let Err(e) = topicsync_relay::http::serve(relay, &http.bind_address).await {
                tracing::error!("HTTP server failed: {}", e);
            }
        });
    }

    tokio::select! {
        result = topicsync_relay::protocol::serve(relay, listener) => {
            result.context("Ingestion listener failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}

/// Route panic reports through tracing, with a backtrace.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!("{}\n{}", info, backtrace);
    }));
}
