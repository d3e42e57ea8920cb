//! Error types for the topicsync wire layer.

use thiserror::Error;

/// Errors that can occur while reading or writing protocol frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// Underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame was not valid JSON or did not match the expected shape
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Peer closed the stream between frames
    #[error("connection closed")]
    Closed,

    /// Peer closed the stream in the middle of a frame
    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    Truncated {
        /// Bytes of the incomplete frame that were received.
        buffered: usize,
    },

    /// A single frame exceeded the configured size limit
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// Maximum accepted frame size.
        limit: usize,
    },

    /// A data envelope lacked a required field
    #[error("record is missing its {0}")]
    MissingField(&'static str),

    /// Handshake named a wire format this server does not speak
    #[error("unknown wire format {0:?}")]
    UnknownFormat(String),
}

impl WireError {
    /// Whether the peer went away cleanly between frames.
    pub fn is_closed(&self) -> bool {
        matches!(self, WireError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::UnknownFormat("xml".into());
        assert_eq!(err.to_string(), "unknown wire format \"xml\"");

        let err = WireError::MissingField("value");
        assert_eq!(err.to_string(), "record is missing its value");
    }

    #[test]
    fn only_clean_close_is_closed() {
        assert!(WireError::Closed.is_closed());
        assert!(!WireError::Truncated { buffered: 3 }.is_closed());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
