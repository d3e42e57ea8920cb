//! Live per-connection status.
//!
//! A [`SessionStatus`] is written by the session (phase, topic, final stats)
//! and by the record decoder (items read), and read at any time by the HTTP
//! status endpoint. Fields are atomics or set-once cells, so readers never
//! block the pipeline.

use crate::engine::SyncStats;
use dashmap::DashMap;
use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
    /// Waiting for the init object.
    Handshaking = 0,
    /// Checking token and topic.
    Authorizing = 1,
    /// Topic lock acquired.
    Locked = 2,
    /// Reading records and feeding the sync engine.
    Streaming = 3,
    /// Stream complete, waiting for the sync engine.
    Finalizing = 4,
    /// Session over.
    Closed = 5,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Handshaking,
            1 => Phase::Authorizing,
            2 => Phase::Locked,
            3 => Phase::Streaming,
            4 => Phase::Finalizing,
            _ => Phase::Closed,
        }
    }
}

/// Observable state of one connection.
#[derive(Debug)]
pub struct SessionStatus {
    id: u64,
    remote_addr: String,
    started_at: Instant,
    phase: AtomicU8,
    items_read: AtomicU64,
    topic: OnceLock<String>,
    stats: OnceLock<SyncStats>,
}

impl SessionStatus {
    /// Status for a connection that was just accepted.
    pub fn new(id: u64, remote_addr: impl Into<String>) -> Self {
        Self {
            id,
            remote_addr: remote_addr.into(),
            started_at: Instant::now(),
            phase: AtomicU8::new(Phase::Handshaking as u8),
            items_read: AtomicU64::new(0),
            topic: OnceLock::new(),
            stats: OnceLock::new(),
        }
    }

    /// Connection id, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address.
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Move to a new phase.
    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Records decoded so far (end-of-stream marker excluded).
    pub fn items_read(&self) -> u64 {
        self.items_read.load(Ordering::Relaxed)
    }

    /// Count one decoded record.
    pub fn record_read(&self) {
        self.items_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Resolved target topic, once authorized.
    pub fn topic(&self) -> Option<&str> {
        self.topic.get().map(String::as_str)
    }

    /// Record the resolved target topic. Later calls are ignored.
    pub fn set_topic(&self, topic: &str) {
        let _ = self.topic.set(topic.to_string());
    }

    /// Final sync statistics, once the engine has returned.
    pub fn stats(&self) -> Option<&SyncStats> {
        self.stats.get()
    }

    /// Record final sync statistics. Later calls are ignored.
    pub fn set_stats(&self, stats: SyncStats) {
        let _ = self.stats.set(stats);
    }

    /// Serializable copy of the current state.
    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            remote_addr: self.remote_addr.clone(),
            topic: self.topic().map(str::to_string),
            phase: self.phase(),
            items_read: self.items_read(),
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            stats: self.stats().cloned(),
        }
    }
}

/// Point-in-time view of a session, as served by `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    /// Connection id.
    pub id: u64,
    /// Peer address.
    pub remote_addr: String,
    /// Resolved target topic.
    pub topic: Option<String>,
    /// Current phase.
    pub phase: Phase,
    /// Records decoded so far.
    pub items_read: u64,
    /// Time since the connection was accepted.
    pub elapsed_ms: u64,
    /// Final sync statistics.
    pub stats: Option<SyncStats>,
}

/// Registry of live sessions.
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<BoardInner>,
}

#[derive(Debug, Default)]
struct BoardInner {
    next_id: AtomicU64,
    sessions: DashMap<u64, Arc<SessionStatus>>,
}

impl StatusBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection.
    ///
    /// The session stays listed until the returned handle is dropped.
    pub fn register(&self, remote_addr: impl Into<String>) -> StatusHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let status = Arc::new(SessionStatus::new(id, remote_addr));
        self.inner.sessions.insert(id, Arc::clone(&status));
        StatusHandle {
            board: Arc::clone(&self.inner),
            status,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Status of one live session.
    pub fn get(&self, id: u64) -> Option<Arc<SessionStatus>> {
        self.inner.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Views of all live sessions, ordered by id.
    pub fn snapshot(&self) -> Vec<SessionView> {
        let mut views: Vec<SessionView> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().view())
            .collect();
        views.sort_by_key(|v| v.id);
        views
    }
}

/// A session's entry on the [`StatusBoard`].
///
/// Dereferences to the [`SessionStatus`]; dropping it marks the session
/// closed and removes it from the board.
#[derive(Debug)]
pub struct StatusHandle {
    board: Arc<BoardInner>,
    status: Arc<SessionStatus>,
}

impl StatusHandle {
    /// Shared reference to the status, for tasks that outlive a borrow.
    pub fn shared(&self) -> Arc<SessionStatus> {
        Arc::clone(&self.status)
    }
}

impl Deref for StatusHandle {
    type Target = SessionStatus;

    fn deref(&self) -> &SessionStatus {
        &self.status
    }
}

impl Drop for StatusHandle {
    fn drop(&mut self) {
        self.status.set_phase(Phase::Closed);
        self.board.sessions.remove(&self.status.id);
    }
}
