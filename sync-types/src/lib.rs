//! # sync-types
//!
//! Wire format types for the topicsync ingestion protocol.
//!
//! A client opens a connection, sends one [`SessionInit`] handshake, streams
//! record envelopes ([`JsonRecord`] or [`BinaryRecord`], depending on the
//! declared [`WireFormat`]) and ends with an envelope whose
//! `endOfTransfer` flag is set. If the whole stream was read, the server
//! answers with a single [`SyncResult`].
//!
//! Frames are concatenated JSON values with no length prefix; see
//! [`FrameReader`] and [`FrameWriter`].

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codec;
mod error;
mod messages;
mod record;

pub use codec::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES};
pub use error::WireError;
pub use messages::{BinaryRecord, JsonRecord, SessionInit, SyncResult};
pub use record::{Envelope, KeyValue, WireFormat};
