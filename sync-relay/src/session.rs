//! Per-connection sync session.
//!
//! A session reads the handshake, authorizes it, takes the topic lock, then
//! streams records into the sync engine and reports the outcome. A decode
//! failure or disconnect before the end-of-stream marker closes the
//! connection without a reply.
//!
//! ```text
//! Handshaking ─► Authorizing ─► Locked ─► Streaming ─► Finalizing ─► Closed
//!      │              │            │           │
//!      └──────────────┴────────────┴───────────┴──► Closed (no reply)
//! ```

use crate::decoder::decode_stream;
use crate::engine::{
    pipeline, RecordSink, SyncEngine, SyncFailure, SyncJob, SyncOutcome, SyncStats,
};
use crate::error::{EngineError, ProtocolError, ProtocolResult};
use crate::locks::TopicLease;
use crate::server::SyncRelay;
use crate::status::{Phase, SessionStatus};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use sync_types::{FrameReader, FrameWriter, SessionInit, SyncResult, WireFormat};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{JoinError, JoinHandle};

/// A single client connection.
pub struct Session<S> {
    relay: Arc<SyncRelay>,
    stream: S,
    status: Arc<SessionStatus>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a session over an accepted stream.
    pub fn new(relay: Arc<SyncRelay>, stream: S, status: Arc<SessionStatus>) -> Self {
        Self {
            relay,
            stream,
            status,
        }
    }

    /// Run the session to completion.
    ///
    /// Returns the `success` flag sent to the client, or the reason the
    /// connection was closed without a reply.
    pub async fn run(self) -> ProtocolResult<bool> {
        let Session {
            relay,
            stream,
            status,
        } = self;
        let limits = &relay.config().limits;

        let (reader, writer) = tokio::io::split(stream);
        let mut frames = FrameReader::with_max_frame(reader, limits.max_frame_bytes);

        let init: SessionInit = frames.read_frame().await?;
        tracing::debug!(?init, "Handshake received");

        status.set_phase(Phase::Authorizing);
        let topic = authorize(&relay, &init).await?;
        status.set_topic(&topic);

        let lease = relay
            .locks()
            .try_lock(&topic)
            .ok_or_else(|| ProtocolError::TopicLocked {
                topic: topic.clone(),
            })?;
        status.set_phase(Phase::Locked);

        let format: WireFormat = init.format.parse()?;

        status.set_phase(Phase::Streaming);
        tracing::info!(topic = %topic, format = %format, delete = init.do_delete, "Sync started");

        let job = SyncJob {
            topic: topic.clone(),
            delete_missing: init.do_delete,
        };
        let run = EngineRun::spawn(
            relay.engine(),
            job,
            lease,
            limits.queue_capacity,
            Duration::from_secs(limits.abandon_grace_secs),
        );

        if let Err(e) = decode_stream(format, &mut frames, run.sink(), &status).await {
            run.abandon().await;
            return Err(e);
        }

        status.set_phase(Phase::Finalizing);
        let outcome = run.finish().await;

        let success = report(&topic, &status, outcome);
        status.set_phase(Phase::Closed);

        let mut replies = FrameWriter::new(writer);
        replies.write_frame(&SyncResult { success }).await?;
        replies.shutdown().await?;

        Ok(success)
    }
}

/// A spawned sync engine and the topic lease it runs under.
///
/// The lease is released only after the engine task has returned or been
/// aborted. Dropping a run that was neither finished nor abandoned (the
/// session unwound) fires teardown and moves the grace wait to a background
/// task.
struct EngineRun {
    sink: RecordSink,
    task: Option<JoinHandle<SyncOutcome>>,
    lease: Option<TopicLease>,
    grace: Duration,
}

impl EngineRun {
    fn spawn(
        engine: Arc<dyn SyncEngine>,
        job: SyncJob,
        lease: TopicLease,
        capacity: usize,
        grace: Duration,
    ) -> Self {
        let (sink, source) = pipeline(capacity);
        let task = tokio::spawn(async move { engine.sync(job, source).await });
        Self {
            sink,
            task: Some(task),
            lease: Some(lease),
            grace,
        }
    }

    fn sink(&self) -> &RecordSink {
        &self.sink
    }

    /// Close the queue and wait for the engine's result. The lease is
    /// released on return.
    async fn finish(mut self) -> SyncOutcome {
        self.sink.finish();
        match self.task.take() {
            Some(task) => engine_outcome(task.await),
            None => Err(SyncFailure::new(EngineError::Cancelled)),
        }
    }

    /// Fire teardown and wait for the engine to stop.
    async fn abandon(mut self) {
        self.sink.abandon();
        if let Some(task) = self.task.take() {
            settle(task, self.lease.take(), self.grace).await;
        }
    }
}

impl Drop for EngineRun {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.sink.abandon();
        let lease = self.lease.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(settle(task, lease, self.grace));
            }
            Err(_) => task.abort(),
        }
    }
}

/// Wait up to `grace` for an abandoned engine, abort it if it is still
/// running, then release the topic.
async fn settle(mut task: JoinHandle<SyncOutcome>, lease: Option<TopicLease>, grace: Duration) {
    let topic = lease.as_ref().map(TopicLease::topic).unwrap_or_default();
    match tokio::time::timeout(grace, &mut task).await {
        Ok(joined) => {
            if let Err(failure) = engine_outcome(joined) {
                tracing::debug!(topic, "Abandoned sync returned: {}", failure.error);
            }
        }
        Err(_) => {
            tracing::warn!(
                topic,
                "Sync engine ignored teardown for {}s, aborting it",
                grace.as_secs()
            );
            task.abort();
            // the topic is released only once the task is gone
            let _ = task.await;
        }
    }
    drop(lease);
}

/// Check the token and resolve the topic against the allow-list.
async fn authorize(relay: &SyncRelay, init: &SessionInit) -> ProtocolResult<String> {
    let server = &relay.config().server;
    if init.token != server.token {
        return Err(ProtocolError::BadToken);
    }

    let topic = if init.topic.is_empty() {
        server.default_topic.clone()
    } else {
        init.topic.clone()
    };
    if topic.is_empty() {
        return Err(ProtocolError::NoTopic);
    }

    if !relay.policy().is_allowed(&topic).await {
        return Err(ProtocolError::TopicNotAllowed { topic });
    }

    Ok(topic)
}

/// Log the engine's result and keep its stats. Returns the reply flag.
fn report(topic: &str, status: &SessionStatus, outcome: SyncOutcome) -> bool {
    let (stats, error): (Option<SyncStats>, Option<EngineError>) = match outcome {
        Ok(stats) => (Some(stats), None),
        Err(SyncFailure { stats, error }) => (stats, Some(error)),
    };

    if let Some(stats) = stats {
        tracing::info!(topic = %topic, "Sync stats:\n{}", stats.log_string());
        status.set_stats(stats);
    }

    match error {
        None => {
            tracing::info!(topic = %topic, items = status.items_read(), "Sync complete");
            true
        }
        Some(e) => {
            tracing::error!(topic = %topic, "Sync failed: {}", e);
            false
        }
    }
}

async fn join_engine(task: JoinHandle<SyncOutcome>) -> SyncOutcome {
    engine_outcome(task.await)
}

fn engine_outcome(joined: Result<SyncOutcome, JoinError>) -> SyncOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(SyncFailure::new(EngineError::Panicked(panic_message(
            e.into_panic(),
        )))),
        Err(_) => Err(SyncFailure::new(EngineError::Cancelled)),
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::{Next, RecordSource};
    use crate::error::StorageError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use sync_types::{KeyValue, WireError};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Records every job and record it is given.
    #[derive(Default)]
    struct RecordingEngine {
        jobs: Mutex<Vec<SyncJob>>,
        records: Mutex<Vec<KeyValue>>,
        ended: Mutex<Option<Next>>,
    }

    #[async_trait]
    impl SyncEngine for Arc<RecordingEngine> {
        async fn sync(&self, job: SyncJob, mut source: RecordSource) -> SyncOutcome {
            self.jobs.lock().unwrap().push(job);
            let mut stats = SyncStats::default();
            loop {
                match source.next().await {
                    Next::Record(kv) => {
                        stats.items += 1;
                        stats.created += 1;
                        self.records.lock().unwrap().push(kv);
                    }
                    end => {
                        let abandoned = end == Next::Abandoned;
                        *self.ended.lock().unwrap() = Some(end);
                        if abandoned {
                            return Err(SyncFailure {
                                stats: Some(stats),
                                error: EngineError::Abandoned,
                            });
                        }
                        return Ok(stats);
                    }
                }
            }
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl SyncEngine for FailingEngine {
        async fn sync(&self, _job: SyncJob, mut source: RecordSource) -> SyncOutcome {
            while let Next::Record(_) = source.next().await {}
            Err(SyncFailure::new(EngineError::Storage(StorageError::CorruptRow {
                topic: "orders".into(),
                reason: "test".into(),
            })))
        }
    }

    struct PanickingEngine;

    #[async_trait]
    impl SyncEngine for PanickingEngine {
        async fn sync(&self, _job: SyncJob, mut source: RecordSource) -> SyncOutcome {
            while let Next::Record(_) = source.next().await {}
            panic!("engine exploded");
        }
    }

    /// Never consumes; waits for teardown unless `stubborn`.
    #[derive(Default)]
    struct StalledEngine {
        stubborn: bool,
        saw_abandon: AtomicBool,
    }

    #[async_trait]
    impl SyncEngine for Arc<StalledEngine> {
        async fn sync(&self, _job: SyncJob, source: RecordSource) -> SyncOutcome {
            if self.stubborn {
                std::future::pending::<()>().await;
            }
            while !source.is_abandoned() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.saw_abandon.store(true, Ordering::SeqCst);
            Err(SyncFailure::new(EngineError::Abandoned))
        }
    }

    /// Takes one record, then fails while the client is still sending.
    struct EarlyFailingEngine;

    #[async_trait]
    impl SyncEngine for EarlyFailingEngine {
        async fn sync(&self, _job: SyncJob, mut source: RecordSource) -> SyncOutcome {
            source.next().await;
            Err(SyncFailure::new(EngineError::Storage(StorageError::CorruptRow {
                topic: "orders".into(),
                reason: "test".into(),
            })))
        }
    }

    /// Keeps working for a while after teardown before it returns.
    #[derive(Default)]
    struct LingeringEngine {
        returned: AtomicBool,
    }

    #[async_trait]
    impl SyncEngine for Arc<LingeringEngine> {
        async fn sync(&self, _job: SyncJob, mut source: RecordSource) -> SyncOutcome {
            while let Next::Record(_) = source.next().await {}
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.returned.store(true, Ordering::SeqCst);
            Err(SyncFailure::new(EngineError::Abandoned))
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.server.token = "T".into();
        config.server.default_topic = "orders".into();
        config
    }

    fn relay(engine: impl SyncEngine) -> Arc<SyncRelay> {
        Arc::new(SyncRelay::new(config(), Arc::new(engine)))
    }

    const INIT: &[u8] = br#"{"token":"T","topic":"orders","format":"json","doDelete":true}"#;
    const RECORDS: &[u8] = br#"{"key":"a","value":"1"}{"key":"b","value":"2"}{"endOfTransfer":true}"#;

    async fn run_session(relay: &Arc<SyncRelay>, input: &[u8]) -> (ProtocolResult<bool>, Vec<u8>) {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();

        let status = relay.status_board().register("test");
        let result = Session::new(relay.clone(), server, status.shared())
            .run()
            .await;

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        (result, reply)
    }

    fn parse_reply(reply: &[u8]) -> SyncResult {
        serde_json::from_slice(reply).unwrap()
    }

    #[tokio::test]
    async fn successful_sync_replies_true() {
        let engine = Arc::new(RecordingEngine::default());
        let relay = relay(engine.clone());

        let input = [INIT, RECORDS].concat();
        let (result, reply) = run_session(&relay, &input).await;

        assert!(result.unwrap());
        assert_eq!(parse_reply(&reply), SyncResult { success: true });
        assert_eq!(
            *engine.jobs.lock().unwrap(),
            vec![SyncJob {
                topic: "orders".into(),
                delete_missing: true
            }]
        );
        assert_eq!(
            *engine.records.lock().unwrap(),
            vec![KeyValue::new("a", "1"), KeyValue::new("b", "2")]
        );
        assert_eq!(*engine.ended.lock().unwrap(), Some(Next::Exhausted));
        assert!(!relay.locks().is_locked("orders"));
    }

    #[tokio::test]
    async fn empty_topic_falls_back_to_default() {
        let engine = Arc::new(RecordingEngine::default());
        let relay = relay(engine.clone());

        let input = [
            &br#"{"token":"T","format":"binary"}"#[..],
            &br#"{"key":"YQ==","value":"MQ=="}{"endOfTransfer":true}"#[..],
        ]
        .concat();
        let (result, _) = run_session(&relay, &input).await;

        assert!(result.unwrap());
        let jobs = engine.jobs.lock().unwrap();
        assert_eq!(jobs[0].topic, "orders");
        assert!(!jobs[0].delete_missing);
        assert_eq!(*engine.records.lock().unwrap(), vec![KeyValue::new("a", "1")]);
    }

    #[tokio::test]
    async fn wrong_token_closes_silently() {
        let engine = Arc::new(RecordingEngine::default());
        let relay = relay(engine.clone());

        let input = [&br#"{"token":"nope","topic":"orders","format":"json"}"#[..], RECORDS].concat();
        let (result, reply) = run_session(&relay, &input).await;

        assert!(matches!(result, Err(ProtocolError::BadToken)));
        assert!(reply.is_empty());
        assert!(engine.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disallowed_topic_is_rejected() {
        let relay = relay(Arc::new(RecordingEngine::default()));
        let input = [&br#"{"token":"T","topic":"payments","format":"json"}"#[..], RECORDS].concat();
        let (result, reply) = run_session(&relay, &input).await;

        assert!(matches!(
            result,
            Err(ProtocolError::TopicNotAllowed { ref topic }) if topic == "payments"
        ));
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn no_topic_anywhere_is_rejected() {
        let mut config = config();
        config.server.default_topic.clear();
        let relay = Arc::new(SyncRelay::new(
            config,
            Arc::new(Arc::new(RecordingEngine::default())),
        ));

        let (result, reply) = run_session(&relay, br#"{"token":"T","format":"json"}"#).await;
        assert!(matches!(result, Err(ProtocolError::NoTopic)));
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn locked_topic_is_rejected() {
        let relay = relay(Arc::new(RecordingEngine::default()));
        let held = relay.locks().try_lock("orders").unwrap();

        let input = [INIT, RECORDS].concat();
        let (result, reply) = run_session(&relay, &input).await;

        assert!(matches!(result, Err(ProtocolError::TopicLocked { .. })));
        assert!(reply.is_empty());
        assert!(relay.locks().is_locked("orders"));
        drop(held);
    }

    #[tokio::test]
    async fn unknown_format_releases_lock() {
        let relay = relay(Arc::new(RecordingEngine::default()));
        let (result, reply) =
            run_session(&relay, br#"{"token":"T","topic":"orders","format":"xml"}"#).await;

        assert!(matches!(
            result,
            Err(ProtocolError::Wire(WireError::UnknownFormat(ref f))) if f == "xml"
        ));
        assert!(reply.is_empty());
        assert!(!relay.locks().is_locked("orders"));
    }

    #[tokio::test]
    async fn malformed_handshake_closes_silently() {
        let relay = relay(Arc::new(RecordingEngine::default()));
        let (result, reply) = run_session(&relay, b"not json at all").await;

        assert!(matches!(result, Err(ProtocolError::Wire(_))));
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn mid_stream_failure_abandons_engine_and_unlocks() {
        let engine = Arc::new(RecordingEngine::default());
        let relay = relay(engine.clone());

        let input = [INIT, &br#"{"key":"a","value":"1"}{"key":5}"#[..]].concat();
        let (result, reply) = run_session(&relay, &input).await;

        assert!(matches!(result, Err(ProtocolError::Wire(_))));
        assert!(reply.is_empty());
        assert_eq!(*engine.ended.lock().unwrap(), Some(Next::Abandoned));
        assert!(relay.locks().try_lock("orders").is_some());
    }

    #[tokio::test]
    async fn truncated_stream_wakes_a_waiting_engine() {
        let engine = Arc::new(StalledEngine::default());
        let relay = relay(engine.clone());

        let input = [INIT, &br#"{"key":"a","value":"1"}"#[..]].concat();
        let (result, _) = run_session(&relay, &input).await;

        assert!(result.is_err());
        assert!(engine.saw_abandon.load(Ordering::SeqCst));
        assert!(!relay.locks().is_locked("orders"));
    }

    #[tokio::test]
    async fn stubborn_engine_is_aborted_after_grace() {
        let engine = Arc::new(StalledEngine {
            stubborn: true,
            ..StalledEngine::default()
        });
        let mut config = config();
        config.limits.abandon_grace_secs = 0;
        let relay = Arc::new(SyncRelay::new(config, Arc::new(engine)));

        let input = [INIT, &br#"{"key":"a""#[..]].concat();
        let (result, _) = tokio::time::timeout(Duration::from_secs(5), run_session(&relay, &input))
            .await
            .expect("session must not wait for a stuck engine");

        assert!(result.is_err());
        assert!(!relay.locks().is_locked("orders"));
    }

    #[tokio::test]
    async fn engine_failure_replies_false() {
        let relay = relay(FailingEngine);
        let input = [INIT, RECORDS].concat();
        let (result, reply) = run_session(&relay, &input).await;

        assert!(!result.unwrap());
        assert_eq!(parse_reply(&reply), SyncResult { success: false });
    }

    #[tokio::test]
    async fn engine_failing_mid_upload_still_replies_false() {
        let relay = relay(EarlyFailingEngine);
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let status = relay.status_board().register("test");
        let session = tokio::spawn(Session::new(relay.clone(), server, status.shared()).run());

        client
            .write_all(&[INIT, &br#"{"key":"a","value":"1"}"#[..]].concat())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        for i in 0..49 {
            client
                .write_all(format!(r#"{{"key":"k{i}","value":"v"}}"#).as_bytes())
                .await
                .unwrap();
        }
        client.write_all(br#"{"endOfTransfer":true}"#).await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();

        assert!(!session.await.unwrap().unwrap());
        assert_eq!(parse_reply(&reply), SyncResult { success: false });
        assert_eq!(status.items_read(), 50);
        assert!(!relay.locks().is_locked("orders"));
    }

    #[tokio::test]
    async fn unwound_session_holds_topic_until_engine_returns() {
        let engine = Arc::new(LingeringEngine::default());
        let relay = relay(engine.clone());
        let lease = relay.locks().try_lock("orders").unwrap();
        let run = EngineRun::spawn(
            relay.engine(),
            SyncJob {
                topic: "orders".into(),
                delete_missing: true,
            },
            lease,
            8,
            Duration::from_secs(5),
        );

        let unwound = tokio::spawn(async move {
            let _run = run;
            panic!("session failed mid-stream");
        })
        .await;
        assert!(unwound.unwrap_err().is_panic());
        assert!(relay.locks().is_locked("orders"));

        tokio::time::timeout(Duration::from_secs(5), async {
            while relay.locks().is_locked("orders") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("topic must be released once the engine returns");
        assert!(engine.returned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn engine_panic_replies_false() {
        let relay = relay(PanickingEngine);
        let input = [INIT, RECORDS].concat();
        let (result, reply) = run_session(&relay, &input).await;

        assert!(!result.unwrap());
        assert_eq!(parse_reply(&reply), SyncResult { success: false });
        assert!(!relay.locks().is_locked("orders"));
    }

    #[tokio::test]
    async fn status_tracks_topic_counter_and_stats() {
        let relay = relay(Arc::new(RecordingEngine::default()));
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(&[INIT, RECORDS].concat()).await.unwrap();

        let status = relay.status_board().register("test");
        Session::new(relay.clone(), server, status.shared())
            .run()
            .await
            .unwrap();

        assert_eq!(status.topic(), Some("orders"));
        assert_eq!(status.items_read(), 2);
        assert_eq!(status.phase(), Phase::Closed);
        assert_eq!(status.stats().map(|s| s.items), Some(2));
    }

    #[tokio::test]
    async fn allow_list_file_gates_topics() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("allowed");
        std::fs::write(&list, "payments\n").unwrap();

        let mut config = config();
        config.topics.allowed_topics_file = Some(list);
        let relay = Arc::new(SyncRelay::new(
            config,
            Arc::new(Arc::new(RecordingEngine::default())),
        ));
        assert!(relay.policy().is_allowed("payments").await);

        let (result, _) = run_session(&relay, &[INIT, RECORDS].concat()).await;
        assert!(matches!(result, Err(ProtocolError::TopicNotAllowed { .. })));
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u32)), "non-string panic payload");
    }
}
