//! Frame codec for concatenated JSON values.
//!
//! The protocol has no length prefix: a frame ends where its JSON value ends.
//! The reader buffers bytes until one complete value can be parsed, hands it
//! out, and keeps whatever follows for the next call.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::WireError;

/// Default cap on the size of a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Reads JSON frames from a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_frame: usize,
    scan: Scan,
}

/// Progress of the structural scan over the first buffered frame.
///
/// Tracks nesting and string state so each byte is looked at once; the JSON
/// parser only runs once the frame's closing byte has arrived.
#[derive(Debug, Default)]
struct Scan {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Scan {
    /// Advance over newly buffered bytes. Returns the end offset of the frame
    /// once its top-level object, array or string closes.
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        while self.pos < buf.len() {
            let byte = buf[self.pos];
            self.pos += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(self.pos);
                    }
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.pos);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

fn is_json_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r')
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a stream with the default frame size limit.
    pub fn new(inner: R) -> Self {
        Self::with_max_frame(inner, DEFAULT_MAX_FRAME_BYTES)
    }

    /// Wrap a stream with an explicit frame size limit.
    pub fn with_max_frame(inner: R, max_frame: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
            max_frame,
            scan: Scan::default(),
        }
    }

    /// Read the next frame and decode it as `T`.
    ///
    /// # Errors
    ///
    /// - [`WireError::Closed`] if the stream ends cleanly between frames
    /// - [`WireError::Truncated`] if it ends inside a frame
    /// - [`WireError::Malformed`] if the frame is not a valid `T`
    /// - [`WireError::FrameTooLarge`] if the frame exceeds the size limit
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<T, WireError> {
        loop {
            if let Some(value) = self.try_decode()? {
                return Ok(value);
            }

            if self.buf.len() > self.max_frame {
                return Err(WireError::FrameTooLarge {
                    limit: self.max_frame,
                });
            }

            let start = self.buf.len();
            self.buf.resize(start + READ_CHUNK, 0);
            let n = match self.inner.read(&mut self.buf[start..]).await {
                Ok(n) => n,
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e.into());
                }
            };
            self.buf.truncate(start + n);

            if n == 0 {
                return Err(if self.buf.is_empty() {
                    WireError::Closed
                } else {
                    WireError::Truncated {
                        buffered: self.buf.len(),
                    }
                });
            }
        }
    }

    /// Attempt to parse one value from the buffered bytes.
    ///
    /// Returns `Ok(None)` when more input is needed.
    fn try_decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, WireError> {
        let Some(start) = self.buf.iter().position(|b| !is_json_whitespace(*b)) else {
            self.buf.clear();
            self.scan = Scan::default();
            return Ok(None);
        };

        if !matches!(self.buf[start], b'{' | b'[' | b'"') {
            // numbers and literals: short, and never a valid envelope
            return self.parse_prefix();
        }

        self.scan.pos = self.scan.pos.max(start);
        let Some(end) = self.scan.advance(&self.buf) else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&self.buf[start..end]);
        self.buf.drain(..end);
        self.scan = Scan::default();
        value.map(Some).map_err(WireError::Malformed)
    }

    fn parse_prefix<T: DeserializeOwned>(&mut self) -> Result<Option<T>, WireError> {
        let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<T>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                self.buf.drain(..consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(WireError::Malformed(e)),
            None => Ok(None),
        }
    }
}

/// Writes JSON frames to a byte stream.
///
/// Each frame is followed by a newline; readers do not require it.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a stream.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode and write one frame, then flush.
    pub async fn write_frame<T: Serialize>(&mut self, value: &T) -> Result<(), WireError> {
        self.feed_frame(value).await?;
        self.flush().await
    }

    /// Encode and write one frame without flushing.
    ///
    /// Useful over a buffered writer when sending many frames in a row.
    pub async fn feed_frame<T: Serialize>(&mut self, value: &T) -> Result<(), WireError> {
        let mut bytes = serde_json::to_vec(value)?;
        bytes.push(b'\n');
        self.inner.write_all(&bytes).await?;
        Ok(())
    }

    /// Flush frames written so far.
    pub async fn flush(&mut self) -> Result<(), WireError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<(), WireError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JsonRecord, SessionInit, SyncResult};

    #[tokio::test]
    async fn reads_concatenated_frames_without_delimiters() {
        let input: &[u8] = br#"{"token":"T","format":"json"}{"key":"a","value":"1"} {"endOfTransfer":true}"#;
        let mut reader = FrameReader::new(input);

        let init: SessionInit = reader.read_frame().await.unwrap();
        assert_eq!(init.token, "T");

        let rec: JsonRecord = reader.read_frame().await.unwrap();
        assert_eq!(rec, JsonRecord::new("a", "1"));

        let end: JsonRecord = reader.read_frame().await.unwrap();
        assert!(end.end_of_transfer);

        assert!(matches!(
            reader.read_frame::<JsonRecord>().await,
            Err(WireError::Closed)
        ));
    }

    #[tokio::test]
    async fn reassembles_frames_split_across_reads() {
        let (client, server) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            let mut client = client;
            for chunk in [&b"{\"key\":\"ab"[..], &b"c\",\"val"[..], &b"ue\":\"x\"}\n"[..]] {
                client.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let mut reader = FrameReader::new(server);
        let rec: JsonRecord = reader.read_frame().await.unwrap();
        assert_eq!(rec, JsonRecord::new("abc", "x"));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn eof_inside_frame_is_truncation() {
        let input: &[u8] = br#"{"key":"a","val"#;
        let mut reader = FrameReader::new(input);
        assert!(matches!(
            reader.read_frame::<JsonRecord>().await,
            Err(WireError::Truncated { buffered: 15 })
        ));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let input: &[u8] = b"{\"key\":\"a\"}not json";
        let mut reader = FrameReader::new(input);
        reader.read_frame::<JsonRecord>().await.unwrap();
        assert!(matches!(
            reader.read_frame::<JsonRecord>().await,
            Err(WireError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let big = format!(r#"{{"key":"{}","value":"x"}}"#, "k".repeat(64 * 1024));
        let mut reader = FrameReader::with_max_frame(big.as_bytes(), 1024);
        assert!(matches!(
            reader.read_frame::<JsonRecord>().await,
            Err(WireError::FrameTooLarge { limit: 1024 })
        ));
    }

    #[tokio::test]
    async fn large_frame_decodes_in_linear_time() {
        let value = "v".repeat(4 * 1024 * 1024);
        let frame = format!(r#"{{"key":"big","value":"{value}"}}{{"endOfTransfer":true}}"#);
        let (mut client, server) = tokio::io::duplex(8 * 1024);
        let writer = tokio::spawn(async move {
            client.write_all(frame.as_bytes()).await.unwrap();
        });

        let started = std::time::Instant::now();
        let mut reader = FrameReader::new(server);
        let rec: JsonRecord = reader.read_frame().await.unwrap();
        let end: JsonRecord = reader.read_frame().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(rec.value.as_deref().map(str::len), Some(value.len()));
        assert!(end.end_of_transfer);
        assert!(
            elapsed < std::time::Duration::from_secs(5),
            "4 MiB frame took {elapsed:?}"
        );
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn braces_inside_strings_do_not_end_a_frame() {
        let input: &[u8] = br#"{"key":"}{","value":"\"}]"} {"endOfTransfer":true}"#;
        let mut reader = FrameReader::new(input);

        let rec: JsonRecord = reader.read_frame().await.unwrap();
        assert_eq!(rec, JsonRecord::new("}{", "\"}]"));
        assert!(reader.read_frame::<JsonRecord>().await.unwrap().end_of_transfer);
    }

    #[tokio::test]
    async fn writer_output_is_readable() {
        let mut out = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut out);
            writer.write_frame(&SyncResult { success: true }).await.unwrap();
        }
        assert_eq!(out, b"{\"success\":true}\n");

        let mut reader = FrameReader::new(&out[..]);
        let res: SyncResult = reader.read_frame().await.unwrap();
        assert!(res.success);
    }

    #[tokio::test]
    async fn fed_frames_reach_a_buffered_stream_on_flush() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(tokio::io::BufWriter::new(client));
        writer.feed_frame(&JsonRecord::new("a", "1")).await.unwrap();
        writer.feed_frame(&JsonRecord::end()).await.unwrap();
        writer.flush().await.unwrap();

        let mut reader = FrameReader::new(server);
        assert_eq!(
            reader.read_frame::<JsonRecord>().await.unwrap(),
            JsonRecord::new("a", "1")
        );
        assert!(reader.read_frame::<JsonRecord>().await.unwrap().end_of_transfer);
    }
}
