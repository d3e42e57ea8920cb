//! Topic storage for the built-in sync engine.
//!
//! A topic is a set of key/value records. Stores expose a digest index so the
//! engine can tell changed values from unchanged ones without reading them.

mod memory;
mod sqlite;

pub use memory::MemoryTopicStore;
pub use sqlite::SqliteTopicStore;

use crate::error::StorageError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// SHA-256 of a record value.
pub type ValueDigest = [u8; 32];

/// Digest a record value.
pub fn value_digest(value: &[u8]) -> ValueDigest {
    Sha256::digest(value).into()
}

/// Trait for topic storage backends.
#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Digest of every value currently in `topic`, keyed by record key.
    ///
    /// Returns an empty index for unknown topics.
    async fn load_index(&self, topic: &str) -> Result<HashMap<Vec<u8>, ValueDigest>, StorageError>;

    /// Insert or replace a record.
    async fn put(&self, topic: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Remove a record. Removing an absent key is not an error.
    async fn delete(&self, topic: &str, key: &[u8]) -> Result<(), StorageError>;

    /// Read one record value.
    async fn get(&self, topic: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Number of records in `topic`.
    async fn count(&self, topic: &str) -> Result<u64, StorageError>;
}
