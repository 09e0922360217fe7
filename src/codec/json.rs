//! Newline-delimited JSON codec.
//!
//! Each envelope is serialized compactly on a single line terminated by a
//! single `\n` (never `\r\n`). `serde_json` escapes embedded newlines inside
//! strings, so a line boundary is always an envelope boundary.
//!
//! Line framing is delegated to [`LinesCodec`] with a maximum length. A bad
//! line (too long, not UTF-8, not JSON) is logged and skipped; only I/O
//! failures surface as errors, so a [`FramedRead`](tokio_util::codec::FramedRead)
//! over this codec keeps running past a corrupt peer line.

use std::io::ErrorKind;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::config::DEFAULT_MAX_LINE_LENGTH;
use crate::error::{Result, RpcError};

/// JSON line codec for envelopes.
#[derive(Debug)]
pub struct JsonCodec {
    lines: LinesCodec,
    max_line_length: usize,
}

impl JsonCodec {
    /// Codec with the default line limit.
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Codec discarding inbound lines longer than `max_line_length` bytes.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        let max_line_length = max_line_length.max(1);
        Self {
            lines: LinesCodec::new_with_max_length(max_line_length),
            max_line_length,
        }
    }

    /// Inbound line limit in bytes.
    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Encode a value as one line, including the trailing `\n`.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    pub fn encode_line<T: Serialize>(value: &T) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(128);
        write_line(value, &mut buf)?;
        Ok(buf.freeze())
    }

    fn next_envelope(&mut self, src: &mut BytesMut, eof: bool) -> Result<Option<Value>> {
        loop {
            let line = if eof {
                self.lines.decode_eof(src)
            } else {
                self.lines.decode(src)
            };

            match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str(&line) {
                        Ok(envelope) => return Ok(Some(envelope)),
                        Err(e) => {
                            tracing::warn!(target: "panelwire::rpc", "skipping malformed line: {}", e)
                        }
                    }
                }
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    tracing::warn!(
                        target: "panelwire::rpc",
                        "discarding line longer than {} bytes",
                        self.max_line_length
                    );
                }
                Err(LinesCodecError::Io(e)) if e.kind() == ErrorKind::InvalidData => {
                    tracing::warn!(target: "panelwire::rpc", "skipping line that is not valid UTF-8");
                }
                Err(LinesCodecError::Io(e)) => return Err(RpcError::Io(e)),
            }
        }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonCodec {
    type Item = Value;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        self.next_envelope(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        self.next_envelope(src, true)
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec {
    type Error = RpcError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        write_line(&item, dst)
    }
}

fn write_line<T: Serialize>(value: &T, dst: &mut BytesMut) -> Result<()> {
    serde_json::to_writer((&mut *dst).writer(), value)?;
    dst.put_u8(b'\n');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(codec: &mut JsonCodec, input: &[u8]) -> Vec<Value> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(value) = codec.decode(&mut buf).unwrap() {
            out.push(value);
        }
        while let Some(value) = codec.decode_eof(&mut buf).unwrap() {
            out.push(value);
        }
        out
    }

    #[test]
    fn test_encode_is_single_line() {
        let value = json!({ "text": "line one\nline two", "n": [1, 2] });
        let line = JsonCodec::encode_line(&value).unwrap();

        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(line.last(), Some(&b'\n'));
    }

    #[test]
    fn test_encoder_appends_lines() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(json!({ "a": 1 }), &mut buf).unwrap();
        codec.encode(&json!("b"), &mut buf).unwrap();

        assert_eq!(&buf[..], b"{\"a\":1}\n\"b\"\n");
    }

    #[test]
    fn test_decode_tolerates_crlf_and_blank_lines() {
        let mut codec = JsonCodec::new();
        let values = decode_all(&mut codec, b"{\"a\":1}\r\n\n  \n[2]\n");
        assert_eq!(values, vec![json!({ "a": 1 }), json!([2])]);
    }

    #[test]
    fn test_decode_waits_for_full_line() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&b"{\"a\":"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"1}\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(json!({ "a": 1 })));
    }

    #[test]
    fn test_invalid_json_is_skipped() {
        let mut codec = JsonCodec::new();
        let values = decode_all(&mut codec, b"not json\n{\"ok\":true}\n");
        assert_eq!(values, vec![json!({ "ok": true })]);
    }

    #[test]
    fn test_invalid_utf8_is_skipped() {
        let mut codec = JsonCodec::new();
        let values = decode_all(&mut codec, b"\xff\xfe bad\n{\"ok\":true}\n");
        assert_eq!(values, vec![json!({ "ok": true })]);
    }

    #[test]
    fn test_overlong_line_is_discarded() {
        let mut codec = JsonCodec::with_max_line_length(16);
        let mut input = vec![b'x'; 100];
        input.extend_from_slice(b"\n{\"ok\":true}\n");

        let values = decode_all(&mut codec, &input);
        assert_eq!(values, vec![json!({ "ok": true })]);
    }

    #[test]
    fn test_overlong_line_split_across_reads() {
        let mut codec = JsonCodec::with_max_line_length(16);
        let mut buf = BytesMut::from(&[b'x'; 40][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[b'y'; 40]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"zz\n[1]\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(json!([1])));
    }

    #[test]
    fn test_final_line_without_newline() {
        let mut codec = JsonCodec::new();
        let values = decode_all(&mut codec, b"[1]\n[2]");
        assert_eq!(values, vec![json!([1]), json!([2])]);
    }

    #[test]
    fn test_round_trip_preserves_strings_with_newlines() {
        let value = json!("a\nb");
        let line = JsonCodec::encode_line(&value).unwrap();
        let mut codec = JsonCodec::new();
        assert_eq!(decode_all(&mut codec, &line), vec![value]);
    }
}
