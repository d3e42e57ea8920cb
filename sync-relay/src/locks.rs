//! Topic lock registry.
//!
//! At most one session may sync a given topic at a time. Acquiring is
//! non-blocking: a second session asking for a held topic is refused
//! immediately and the client is expected to retry later.

use dashmap::DashSet;
use std::sync::Arc;

/// Process-wide set of topics currently being synchronized.
///
/// Cheap to clone; clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct TopicLocks {
    held: Arc<DashSet<String>>,
}

impl TopicLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive ownership of `topic`.
    ///
    /// Returns `None` if another lease on the topic is alive. The topic is
    /// released when the returned lease is dropped.
    pub fn try_lock(&self, topic: &str) -> Option<TopicLease> {
        if self.held.insert(topic.to_string()) {
            tracing::debug!(topic, "Locked topic");
            Some(TopicLease {
                held: Arc::clone(&self.held),
                topic: topic.to_string(),
            })
        } else {
            None
        }
    }

    /// Whether some session currently holds `topic`.
    pub fn is_locked(&self, topic: &str) -> bool {
        self.held.contains(topic)
    }

    /// Number of topics currently held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Whether no topic is held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Names of all held topics, sorted.
    pub fn locked_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.held.iter().map(|t| t.key().clone()).collect();
        topics.sort();
        topics
    }
}

/// Exclusive hold on one topic. Dropping it unlocks the topic.
#[derive(Debug)]
pub struct TopicLease {
    held: Arc<DashSet<String>>,
    topic: String,
}

impl TopicLease {
    /// The locked topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for TopicLease {
    fn drop(&mut self) {
        self.held.remove(&self.topic);
        tracing::debug!(topic = %self.topic, "Unlocked topic");
    }
}
