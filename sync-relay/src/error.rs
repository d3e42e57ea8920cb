//! Error types for topicsync-relay.

use sync_types::WireError;

/// Main error type for the accept loop.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Topic store errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: std::path::PathBuf,
    },

    /// A stored row could not be interpreted.
    #[error("corrupt row in topic {topic:?}: {reason}")]
    CorruptRow {
        /// Topic the row belongs to.
        topic: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Reasons a session ends without sending a result.
///
/// Every variant closes the connection with no reply.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Handshake or record stream could not be decoded.
    #[error("{0}")]
    Wire(#[from] WireError),

    /// Token did not match.
    #[error("authentication failed: wrong token")]
    BadToken,

    /// Client named no topic and the server has no default.
    #[error("no topic specified and no default topic")]
    NoTopic,

    /// Topic is not on the allow-list.
    #[error("topic {topic:?} is not allowed")]
    TopicNotAllowed {
        /// Resolved topic name.
        topic: String,
    },

    /// Another session is syncing the topic.
    #[error("topic {topic:?} already locked")]
    TopicLocked {
        /// Resolved topic name.
        topic: String,
    },
}

impl ProtocolError {
    /// Whether this is an admission decision rather than a fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ProtocolError::BadToken
                | ProtocolError::NoTopic
                | ProtocolError::TopicNotAllowed { .. }
                | ProtocolError::TopicLocked { .. }
        )
    }
}

/// Sync engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The session ended before the record stream completed.
    #[error("sync abandoned by session teardown")]
    Abandoned,

    /// The topic store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The engine task panicked.
    #[error("sync task panicked: {0}")]
    Panicked(String),

    /// The engine task was cancelled by the runtime.
    #[error("sync task cancelled")]
    Cancelled,
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for session protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_not_faults() {
        assert!(ProtocolError::BadToken.is_rejection());
        assert!(ProtocolError::TopicLocked {
            topic: "orders".into()
        }
        .is_rejection());
        assert!(!ProtocolError::Wire(WireError::MissingField("key")).is_rejection());
        assert!(!ProtocolError::Wire(WireError::Closed).is_rejection());
    }

    #[test]
    fn error_display() {
        let err = ProtocolError::TopicLocked {
            topic: "orders".into(),
        };
        assert_eq!(err.to_string(), "topic \"orders\" already locked");
        assert_eq!(
            EngineError::Abandoned.to_string(),
            "sync abandoned by session teardown"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
        assert_send_sync::<EngineError>();
        assert_send_sync::<RelayError>();
    }
}
