//! The format-independent record shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{BinaryRecord, JsonRecord, WireError};

/// One logical record to upsert into a topic.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyValue {
    /// Record key (opaque bytes)
    pub key: Vec<u8>,
    /// Record value (opaque bytes)
    pub value: Vec<u8>,
}

impl KeyValue {
    /// Create a record from anything byte-like.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KeyValue({} => {} bytes)",
            String::from_utf8_lossy(&self.key),
            self.value.len()
        )
    }
}

/// Encoding of the record envelopes that follow the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// Key and value as JSON strings
    Json,
    /// Key and value as base64-encoded bytes
    Binary,
}

impl WireFormat {
    /// Tag used in [`crate::SessionInit::format`].
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::Binary => "binary",
        }
    }
}

impl FromStr for WireFormat {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(WireFormat::Json),
            "binary" => Ok(WireFormat::Binary),
            other => Err(WireError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record envelope as it appears on the wire.
///
/// Both wire formats carry the same logical shape and differ only in how key
/// and value are encoded, so readers can be written once against this trait.
pub trait Envelope: DeserializeOwned + Send {
    /// Whether this envelope terminates the stream.
    fn is_end(&self) -> bool;

    /// Convert a data envelope into a record.
    ///
    /// Fails if key or value is absent.
    fn into_record(self) -> Result<KeyValue, WireError>;
}

impl Envelope for JsonRecord {
    fn is_end(&self) -> bool {
        self.end_of_transfer
    }

    fn into_record(self) -> Result<KeyValue, WireError> {
        let key = self.key.ok_or(WireError::MissingField("key"))?;
        let value = self.value.ok_or(WireError::MissingField("value"))?;
        Ok(KeyValue::new(key, value))
    }
}

impl Envelope for BinaryRecord {
    fn is_end(&self) -> bool {
        self.end_of_transfer
    }

    fn into_record(self) -> Result<KeyValue, WireError> {
        let key = self.key.ok_or(WireError::MissingField("key"))?;
        let value = self.value.ok_or(WireError::MissingField("value"))?;
        Ok(KeyValue { key, value })
    }
}
