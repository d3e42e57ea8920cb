//! Topic allow-list.
//!
//! Decides whether a client may sync a topic. The allow-list file is re-read
//! on every check so edits take effect without a restart. Any failure to read
//! it denies the request.

use crate::config::{ServerConfig, TopicsConfig};
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;

/// Answers "may this server sync topic T?".
#[derive(Debug, Clone, Default)]
pub struct TopicPolicy {
    allow_all: bool,
    default_topic: String,
    allowed_topics_file: Option<PathBuf>,
}

impl TopicPolicy {
    /// Build the policy from configuration.
    pub fn from_config(server: &ServerConfig, topics: &TopicsConfig) -> Self {
        Self {
            allow_all: topics.allow_all,
            default_topic: server.default_topic.clone(),
            allowed_topics_file: topics.allowed_topics_file.clone(),
        }
    }

    /// Accept every topic.
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            ..Self::default()
        }
    }

    /// Accept only `topic`.
    pub fn default_only(topic: impl Into<String>) -> Self {
        Self {
            default_topic: topic.into(),
            ..Self::default()
        }
    }

    /// Accept the topics listed in `path`.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            allowed_topics_file: Some(path.into()),
            ..Self::default()
        }
    }

    /// Whether `topic` may be synchronized.
    pub async fn is_allowed(&self, topic: &str) -> bool {
        if self.allow_all {
            return true;
        }

        match &self.allowed_topics_file {
            None => topic == self.default_topic,
            Some(path) => match listed_in(path, topic).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        "Failed to read allowed topics, not allowing: {}",
                        e
                    );
                    false
                }
            },
        }
    }
}

/// Scan an allow-list file for an exact line match.
///
/// Empty lines and lines starting with `#` never match.
async fn listed_in(path: &std::path::Path, topic: &str) -> std::io::Result<bool> {
    if topic.is_empty() {
        return Ok(false);
    }

    let file = tokio::fs::File::open(path).await?;
    let mut lines = tokio::io::BufReader::new(file).lines();

    while let Some(line) = lines.next_line().await? {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == topic {
            return Ok(true);
        }
    }

    Ok(false)
}
