//! Sync engine contract and the built-in reconciling engine.
//!
//! A session hands the engine a [`RecordSource`]: the receiving end of the
//! bounded record queue plus a teardown signal. The engine drains records in
//! order until the source reports [`Next::Exhausted`] (the session read the
//! whole stream and closed the queue) or [`Next::Abandoned`] (the session
//! ended abnormally). An abandoned sync must return promptly and must not
//! treat the partial stream as complete.
//!
//! ```text
//! decoder ──► RecordSink ══ bounded queue ══► RecordSource ──► SyncEngine
//!                 └──────── teardown signal ───────┘
//! ```

use crate::error::EngineError;
use crate::storage::{value_digest, TopicStore, ValueDigest};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use sync_types::KeyValue;
use tokio::sync::{mpsc, watch};

/// What to synchronize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    /// Destination topic.
    pub topic: String,
    /// Delete keys present in the topic but absent from the stream.
    pub delete_missing: bool,
}

/// Counters reported by a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Records consumed from the stream.
    pub items: u64,
    /// Keys that did not exist in the topic.
    pub created: u64,
    /// Keys whose value changed.
    pub modified: u64,
    /// Keys whose value was already current.
    pub unchanged: u64,
    /// Keys removed because the stream did not contain them.
    pub deleted: u64,
    /// Keys in the topic before the sync started.
    pub keys_in_topic: u64,
    /// Time spent loading the topic index, in milliseconds.
    pub index_ms: u64,
    /// Total time of the sync, in milliseconds.
    pub total_ms: u64,
}

impl SyncStats {
    /// Multi-line rendering for logs.
    pub fn log_string(&self) -> String {
        format!(
            "  items read:    {}\n  keys in topic: {}\n  created:       {}\n  modified:      {}\n  unchanged:     {}\n  deleted:       {}\n  index load:    {}ms\n  total:         {}ms",
            self.items,
            self.keys_in_topic,
            self.created,
            self.modified,
            self.unchanged,
            self.deleted,
            self.index_ms,
            self.total_ms,
        )
    }
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} items: {} created, {} modified, {} unchanged, {} deleted in {}ms",
            self.items, self.created, self.modified, self.unchanged, self.deleted, self.total_ms
        )
    }
}

/// A sync that did not complete.
#[derive(Debug)]
pub struct SyncFailure {
    /// Counters up to the point of failure, if the engine has them.
    pub stats: Option<SyncStats>,
    /// Why the sync failed.
    pub error: EngineError,
}

impl SyncFailure {
    /// Failure without statistics.
    pub fn new(error: EngineError) -> Self {
        Self { stats: None, error }
    }
}

/// Result of one sync call.
pub type SyncOutcome = Result<SyncStats, SyncFailure>;

/// Reconciles a topic with a record stream.
#[async_trait]
pub trait SyncEngine: Send + Sync + 'static {
    /// Make `job.topic` match the records delivered by `source`.
    ///
    /// Implementations must return promptly once `source` reports
    /// [`Next::Abandoned`], and own `source` so nothing is consumed after
    /// returning.
    async fn sync(&self, job: SyncJob, source: RecordSource) -> SyncOutcome;
}

/// What [`RecordSource::next`] produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Next {
    /// The next record, in stream order.
    Record(KeyValue),
    /// The stream ended normally; no more records will arrive.
    Exhausted,
    /// The session ended before the stream completed.
    Abandoned,
}

/// Create the bounded queue and teardown signal connecting a session to its
/// sync engine.
pub fn pipeline(capacity: usize) -> (RecordSink, RecordSource) {
    let (records_tx, records_rx) = mpsc::channel(capacity);
    let (teardown_tx, teardown_rx) = watch::channel(());
    (
        RecordSink {
            teardown: Some(teardown_tx),
            records: Some(records_tx),
        },
        RecordSource {
            records: records_rx,
            teardown: teardown_rx,
        },
    )
}

/// Producer side of the pipeline, owned by the session.
///
/// Dropping the sink fires the teardown signal before closing the queue, so
/// an engine can never mistake an aborted stream for exhausted input.
#[derive(Debug)]
pub struct RecordSink {
    teardown: Option<watch::Sender<()>>,
    records: Option<mpsc::Sender<KeyValue>>,
}

impl RecordSink {
    /// Queue one record, waiting while the queue is full.
    ///
    /// Gives the record back if the engine has stopped receiving or the
    /// queue was already closed.
    pub async fn send(&self, record: KeyValue) -> Result<(), KeyValue> {
        match &self.records {
            Some(tx) => tx.send(record).await.map_err(|e| e.0),
            None => Err(record),
        }
    }

    /// Close the queue: the engine sees [`Next::Exhausted`] once it has
    /// drained what is buffered.
    pub fn finish(&mut self) {
        self.records.take();
    }

    /// Fire the teardown signal and close the queue.
    pub fn abandon(&mut self) {
        self.teardown.take();
        self.records.take();
    }
}

impl Drop for RecordSink {
    fn drop(&mut self) {
        self.abandon();
    }
}

/// Consumer side of the pipeline, handed to the sync engine.
#[derive(Debug)]
pub struct RecordSource {
    records: mpsc::Receiver<KeyValue>,
    teardown: watch::Receiver<()>,
}

impl RecordSource {
    /// Wait for the next record, the end of the stream, or abandonment.
    ///
    /// Abandonment takes priority over records still buffered.
    pub async fn next(&mut self) -> Next {
        if self.is_abandoned() {
            return Next::Abandoned;
        }

        let received = tokio::select! {
            biased;
            // never written, so this only resolves when the session drops the sender
            _ = self.teardown.changed() => return Next::Abandoned,
            record = self.records.recv() => record,
        };

        match received {
            Some(kv) => Next::Record(kv),
            None if self.is_abandoned() => Next::Abandoned,
            None => Next::Exhausted,
        }
    }

    /// Whether the session has ended abnormally.
    pub fn is_abandoned(&self) -> bool {
        self.teardown.has_changed().is_err()
    }
}

/// Reconciling engine over a [`TopicStore`].
///
/// Loads the digest of every value in the topic, upserts records whose value
/// differs, and with `delete_missing` removes keys the stream did not
/// mention. Deletion only happens after a complete stream.
#[derive(Clone)]
pub struct StoreEngine {
    store: Arc<dyn TopicStore>,
}

impl fmt::Debug for StoreEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreEngine").finish_non_exhaustive()
    }
}

struct IndexEntry {
    digest: ValueDigest,
    seen: bool,
}

impl StoreEngine {
    /// Create an engine writing to `store`.
    pub fn new(store: Arc<dyn TopicStore>) -> Self {
        Self { store }
    }

    async fn run(
        &self,
        job: &SyncJob,
        source: &mut RecordSource,
        stats: &mut SyncStats,
        started: Instant,
    ) -> Result<(), EngineError> {
        let mut index: HashMap<Vec<u8>, IndexEntry> = self
            .store
            .load_index(&job.topic)
            .await?
            .into_iter()
            .map(|(key, digest)| (key, IndexEntry { digest, seen: false }))
            .collect();
        stats.keys_in_topic = index.len() as u64;
        stats.index_ms = started.elapsed().as_millis() as u64;

        loop {
            let kv = match source.next().await {
                Next::Record(kv) => kv,
                Next::Exhausted => break,
                Next::Abandoned => return Err(EngineError::Abandoned),
            };
            stats.items += 1;

            let digest = value_digest(&kv.value);
            match index.get_mut(&kv.key) {
                Some(entry) if entry.digest == digest => {
                    entry.seen = true;
                    stats.unchanged += 1;
                }
                Some(entry) => {
                    self.store.put(&job.topic, &kv.key, &kv.value).await?;
                    entry.digest = digest;
                    entry.seen = true;
                    stats.modified += 1;
                }
                None => {
                    self.store.put(&job.topic, &kv.key, &kv.value).await?;
                    index.insert(kv.key, IndexEntry { digest, seen: true });
                    stats.created += 1;
                }
            }
        }

        if job.delete_missing {
            for (key, _) in index.iter().filter(|(_, entry)| !entry.seen) {
                if source.is_abandoned() {
                    return Err(EngineError::Abandoned);
                }
                self.store.delete(&job.topic, key).await?;
                stats.deleted += 1;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SyncEngine for StoreEngine {
    async fn sync(&self, job: SyncJob, mut source: RecordSource) -> SyncOutcome {
        let started = Instant::now();
        let mut stats = SyncStats::default();

        let result = self.run(&job, &mut source, &mut stats, started).await;
        stats.total_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                tracing::debug!(topic = %job.topic, "Sync complete: {}", stats);
                Ok(stats)
            }
            Err(error) => Err(SyncFailure {
                stats: Some(stats),
                error,
            }),
        }
    }
}
