//! # topicsync-client
//!
//! Client library for streaming key/value records to a topicsync relay.
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{SyncClient, SyncConfig};
//! use sync_types::{KeyValue, WireFormat};
//!
//! let config = SyncConfig::new("127.0.0.1:9084", "secret")
//!     .with_topic("orders")
//!     .with_format(WireFormat::Binary)
//!     .with_delete(true);
//! let client = SyncClient::new(config);
//!
//! let mut upload = client.connect().await?;
//! upload.send(KeyValue::new("a", "1")).await?;
//! upload.send(KeyValue::new("b", "2")).await?;
//! let success = upload.finish().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;

pub use client::{ClientError, SyncClient, SyncConfig, Upload};
