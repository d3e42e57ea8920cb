//! Record stream decoding.
//!
//! Reads envelopes from the connection after the handshake and feeds them to
//! the sync engine through the session's [`RecordSink`]. One generic routine
//! serves both wire formats.

use crate::engine::RecordSink;
use crate::error::ProtocolResult;
use crate::status::SessionStatus;
use sync_types::{BinaryRecord, Envelope, FrameReader, JsonRecord, WireFormat};
use tokio::io::AsyncRead;

/// Decode records in `format` until the end-of-stream envelope.
pub async fn decode_stream<R>(
    format: WireFormat,
    frames: &mut FrameReader<R>,
    sink: &RecordSink,
    status: &SessionStatus,
) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin,
{
    match format {
        WireFormat::Json => read_records::<JsonRecord, R>(frames, sink, status).await,
        WireFormat::Binary => read_records::<BinaryRecord, R>(frames, sink, status).await,
    }
}

/// Decode envelopes of type `E` until one carries the end flag.
///
/// Each data record is counted on `status` and then queued, waiting while the
/// queue is full. If the engine stops receiving early, the rest of the stream
/// is still read and counted so the engine's outcome can be reported. Returns
/// on the end flag or on the first decode error.
pub async fn read_records<E, R>(
    frames: &mut FrameReader<R>,
    sink: &RecordSink,
    status: &SessionStatus,
) -> ProtocolResult<()>
where
    E: Envelope,
    R: AsyncRead + Unpin,
{
    let mut engine_gone = false;
    loop {
        let envelope: E = frames.read_frame().await?;
        if envelope.is_end() {
            return Ok(());
        }

        let record = envelope.into_record()?;
        status.record_read();
        tracing::trace!(?record, "Decoded record");

        if !engine_gone && sink.send(record).await.is_err() {
            tracing::debug!("Sync engine stopped receiving, draining the rest of the stream");
            engine_gone = true;
        }
    }
}
