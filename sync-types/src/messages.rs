//! Protocol messages for topicsync.
//!
//! Field names follow the camelCase JSON spelling existing clients send.

use serde::{Deserialize, Serialize};

/// Handshake sent by the client as the first frame of a connection.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInit {
    /// Shared secret; must match the server's configured token
    #[serde(default)]
    pub token: String,
    /// Target topic (empty = server default)
    #[serde(default)]
    pub topic: String,
    /// Wire format of the record envelopes that follow ("json" or "binary")
    #[serde(default)]
    pub format: String,
    /// Delete keys that exist in the topic but not in the stream
    #[serde(default)]
    pub do_delete: bool,
}

impl std::fmt::Debug for SessionInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInit")
            .field("token", &"[REDACTED]")
            .field("topic", &self.topic)
            .field("format", &self.format)
            .field("do_delete", &self.do_delete)
            .finish()
    }
}

/// Record envelope for the `json` wire format: text key and value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonRecord {
    /// Record key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Record value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Marks the end of the record stream
    #[serde(default)]
    pub end_of_transfer: bool,
}

impl JsonRecord {
    /// A data envelope.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: Some(value.into()),
            end_of_transfer: false,
        }
    }

    /// The terminating envelope.
    pub fn end() -> Self {
        Self {
            end_of_transfer: true,
            ..Self::default()
        }
    }
}

/// Record envelope for the `binary` wire format.
///
/// Key and value are arbitrary bytes carried as standard base64 strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryRecord {
    /// Record key
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<u8>>,
    /// Record value
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    /// Marks the end of the record stream
    #[serde(default)]
    pub end_of_transfer: bool,
}

impl BinaryRecord {
    /// A data envelope.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Some(key.into()),
            value: Some(value.into()),
            end_of_transfer: false,
        }
    }

    /// The terminating envelope.
    pub fn end() -> Self {
        Self {
            end_of_transfer: true,
            ..Self::default()
        }
    }
}

/// Final reply from the server, sent only when the whole stream was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Whether the topic now matches the streamed records
    pub success: bool,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
