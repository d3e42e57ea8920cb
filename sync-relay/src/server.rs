//! Shared relay state.
//!
//! `SyncRelay` holds everything sessions share: configuration, the topic lock
//! set, the allow-list policy, the sync engine, the status board and metrics.

use crate::config::Config;
use crate::engine::SyncEngine;
use crate::error::ProtocolError;
use crate::locks::TopicLocks;
use crate::policy::TopicPolicy;
use crate::status::StatusBoard;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Sessions that replied `{success: true}`.
    pub syncs_succeeded: AtomicU64,
    /// Sessions that replied `{success: false}`.
    pub syncs_failed: AtomicU64,
    /// Sessions turned away by token, topic or lock checks.
    pub rejections: AtomicU64,
    /// Sessions closed by malformed or truncated input.
    pub protocol_errors: AtomicU64,
    /// Sessions that panicked.
    pub panics: AtomicU64,
    /// Records decoded across all sessions.
    pub records_read: AtomicU64,
}

impl RelayMetrics {
    /// Count a session that ended without a reply.
    pub fn record_error(&self, error: &ProtocolError) {
        if error.is_rejection() {
            self.rejections.fetch_add(1, Ordering::Relaxed);
        } else if !matches!(error, ProtocolError::Wire(e) if e.is_closed()) {
            self.protocol_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a session that replied.
    pub fn record_reply(&self, success: bool) {
        if success {
            self.syncs_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.syncs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Main relay server state.
pub struct SyncRelay {
    config: Config,
    locks: TopicLocks,
    policy: TopicPolicy,
    engine: Arc<dyn SyncEngine>,
    status: StatusBoard,
    metrics: RelayMetrics,
    started_at: Instant,
}

impl std::fmt::Debug for SyncRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRelay")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("metrics", &self.metrics)
            .field("locked_topics", &self.locks.len())
            .field("active_sessions", &self.status.len())
            .finish_non_exhaustive()
    }
}

impl SyncRelay {
    /// Create a relay that hands records to `engine`.
    pub fn new(config: Config, engine: Arc<dyn SyncEngine>) -> Self {
        let policy = TopicPolicy::from_config(&config.server, &config.topics);
        Self {
            config,
            locks: TopicLocks::new(),
            policy,
            engine,
            status: StatusBoard::new(),
            metrics: RelayMetrics::default(),
            started_at: Instant::now(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Topics currently being synchronized.
    pub fn locks(&self) -> &TopicLocks {
        &self.locks
    }

    /// Topic allow-list.
    pub fn policy(&self) -> &TopicPolicy {
        &self.policy
    }

    /// The sync engine, for spawning into a session's engine task.
    pub fn engine(&self) -> Arc<dyn SyncEngine> {
        Arc::clone(&self.engine)
    }

    /// Live sessions.
    pub fn status_board(&self) -> &StatusBoard {
        &self.status
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Number of open connections.
    pub fn active_sessions(&self) -> usize {
        self.status.len()
    }

    /// Time since the relay was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
