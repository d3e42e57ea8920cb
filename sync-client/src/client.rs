//! SyncClient - streams records to a topicsync relay.
//!
//! A sync is one connection: the client sends the handshake, every record,
//! and the end-of-stream marker, then waits for the relay's verdict.
//!
//! ```text
//! SyncClient::connect ─► Upload::send (× N) ─► Upload::finish ─► success flag
//! ```
//!
//! A relay that rejects the handshake closes the connection without a reply;
//! that surfaces as [`ClientError::Rejected`] from [`Upload::finish`] (or as
//! an I/O error from an earlier `send` if the close is noticed first).

use std::time::Duration;
use sync_types::{
    BinaryRecord, FrameReader, FrameWriter, JsonRecord, KeyValue, SessionInit, SyncResult,
    WireError, WireFormat,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Framing or transport error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Connection failed.
    #[error("connection to {address} failed: {source}")]
    ConnectionFailed {
        /// Relay address.
        address: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Connection timeout.
    #[error("connection to {0} timed out")]
    Timeout(String),

    /// The relay closed the connection without replying.
    #[error("relay closed the connection without a result (rejected or aborted)")]
    Rejected,

    /// A record cannot be sent in the `json` format.
    #[error("record {field} is not valid UTF-8; use the binary format")]
    NotUtf8 {
        /// "key" or "value".
        field: &'static str,
    },
}

/// Configuration for SyncClient.
#[derive(Clone)]
pub struct SyncConfig {
    /// Relay address (`host:port`).
    pub address: String,
    /// Shared token.
    pub token: String,
    /// Target topic; empty means the relay's default.
    pub topic: String,
    /// Record encoding.
    pub format: WireFormat,
    /// Ask the relay to delete keys the stream does not contain.
    pub delete_missing: bool,
    /// Limit on establishing the TCP connection.
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("address", &self.address)
            .field("token", &"[REDACTED]")
            .field("topic", &self.topic)
            .field("format", &self.format)
            .field("delete_missing", &self.delete_missing)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl SyncConfig {
    /// Configuration for the relay at `address`, JSON format, default topic.
    pub fn new(address: &str, token: &str) -> Self {
        Self {
            address: address.to_string(),
            token: token.to_string(),
            topic: String::new(),
            format: WireFormat::Json,
            delete_missing: false,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set the target topic.
    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }

    /// Set the record encoding.
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable delete mode.
    pub fn with_delete(mut self, delete_missing: bool) -> Self {
        self.delete_missing = delete_missing;
        self
    }

    fn handshake(&self) -> SessionInit {
        SessionInit {
            token: self.token.clone(),
            topic: self.topic.clone(),
            format: self.format.as_str().to_string(),
            do_delete: self.delete_missing,
        }
    }
}

/// Entry point for syncing records to a relay.
#[derive(Debug, Clone)]
pub struct SyncClient {
    config: SyncConfig,
}

impl SyncClient {
    /// Create a client.
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Connect over TCP and send the handshake.
    pub async fn connect(&self) -> Result<Upload<TcpStream>, ClientError> {
        let address = &self.config.address;
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ClientError::Timeout(address.clone()))?
            .map_err(|source| ClientError::ConnectionFailed {
                address: address.clone(),
                source,
            })?;
        stream.set_nodelay(true).map_err(WireError::Io)?;

        tracing::debug!(%address, topic = %self.config.topic, "Connected to relay");
        self.start(stream).await
    }

    /// Send the handshake over an already established stream.
    pub async fn start<S>(&self, stream: S) -> Result<Upload<S>, ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut frames = FrameWriter::new(BufWriter::new(writer));
        frames.write_frame(&self.config.handshake()).await?;

        Ok(Upload {
            replies: FrameReader::new(reader),
            frames,
            format: self.config.format,
            sent: 0,
        })
    }

    /// Connect, send every record, and return the relay's verdict.
    pub async fn sync<I>(&self, records: I) -> Result<bool, ClientError>
    where
        I: IntoIterator<Item = KeyValue>,
    {
        let mut upload = self.connect().await?;
        for record in records {
            upload.send(record).await?;
        }
        upload.finish().await
    }
}

/// An open sync: records go out until [`finish`](Self::finish).
pub struct Upload<S> {
    replies: FrameReader<ReadHalf<S>>,
    frames: FrameWriter<BufWriter<WriteHalf<S>>>,
    format: WireFormat,
    sent: u64,
}

impl<S> std::fmt::Debug for Upload<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("format", &self.format)
            .field("sent", &self.sent)
            .finish_non_exhaustive()
    }
}

impl<S> Upload<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Queue one record. Records are buffered and flushed by `finish`.
    pub async fn send(&mut self, record: KeyValue) -> Result<(), ClientError> {
        match self.format {
            WireFormat::Json => {
                let key = String::from_utf8(record.key)
                    .map_err(|_| ClientError::NotUtf8 { field: "key" })?;
                let value = String::from_utf8(record.value)
                    .map_err(|_| ClientError::NotUtf8 { field: "value" })?;
                self.frames.feed_frame(&JsonRecord::new(key, value)).await?;
            }
            WireFormat::Binary => {
                self.frames
                    .feed_frame(&BinaryRecord::new(record.key, record.value))
                    .await?;
            }
        }
        self.sent += 1;
        Ok(())
    }

    /// Records sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Send the end-of-stream marker and wait for the relay's verdict.
    pub async fn finish(mut self) -> Result<bool, ClientError> {
        match self.format {
            WireFormat::Json => self.frames.feed_frame(&JsonRecord::end()).await?,
            WireFormat::Binary => self.frames.feed_frame(&BinaryRecord::end()).await?,
        }
        self.frames.flush().await?;

        match self.replies.read_frame::<SyncResult>().await {
            Ok(result) => {
                tracing::debug!(sent = self.sent, success = result.success, "Sync finished");
                Ok(result.success)
            }
            Err(WireError::Closed) => Err(ClientError::Rejected),
            Err(e) => Err(e.into()),
        }
    }
}
