//! In-memory topic store.

use super::{value_digest, TopicStore, ValueDigest};
use crate::error::StorageError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Topic store held in process memory. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryTopicStore {
    topics: RwLock<HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryTopicStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All records of `topic`, ordered by key.
    pub async fn contents(&self, topic: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .map(|records| {
                records
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl TopicStore for MemoryTopicStore {
    async fn load_index(&self, topic: &str) -> Result<HashMap<Vec<u8>, ValueDigest>, StorageError> {
        let topics = self.topics.read().await;
        Ok(topics
            .get(topic)
            .map(|records| {
                records
                    .iter()
                    .map(|(k, v)| (k.clone(), value_digest(v)))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put(&self, topic: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, topic: &str, key: &[u8]) -> Result<(), StorageError> {
        let mut topics = self.topics.write().await;
        if let Some(records) = topics.get_mut(topic) {
            records.remove(key);
        }
        Ok(())
    }

    async fn get(&self, topic: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let topics = self.topics.read().await;
        Ok(topics.get(topic).and_then(|records| records.get(key).cloned()))
    }

    async fn count(&self, topic: &str) -> Result<u64, StorageError> {
        let topics = self.topics.read().await;
        Ok(topics.get(topic).map(|r| r.len() as u64).unwrap_or(0))
    }
}
