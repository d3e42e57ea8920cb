//! # topicsync-relay
//!
//! Streaming key/value ingestion server.
//!
//! Clients connect over TCP, authenticate with a shared token, name a topic,
//! and stream key/value records. The relay hands the records to a sync engine
//! that makes the topic match the stream, optionally deleting keys the stream
//! did not mention, and replies with a single success flag.
//!
//! ## Architecture
//!
//! ```text
//! Client ──TCP──► Session ──► decoder ══ bounded queue ══► SyncEngine ──► TopicStore
//!                    │                                                  (memory/SQLite)
//!                    ├── TopicPolicy (allow-list)
//!                    ├── TopicLocks (one session per topic)
//!                    └── StatusBoard ──► HTTP /health /status /metrics
//! ```
//!
//! ## Protocol
//!
//! Concatenated JSON values, no length prefix:
//! - client: `{"token", "topic", "format", "doDelete"}`
//! - client: record envelopes, then `{"endOfTransfer": true}`
//! - server: `{"success": bool}`, only if the whole stream was read

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod http;
pub mod locks;
pub mod policy;
pub mod protocol;
pub mod server;
pub mod session;
pub mod status;
pub mod storage;
