//! Incremental frame decoder.
//!
//! Accumulates raw socket bytes in a `bytes::BytesMut` and drains complete
//! frames from it. Parsing runs against an explicit cursor and commits its
//! read position only when a full frame decodes; on "need more bytes" no
//! input is consumed, so the caller can simply retry after the next read.
//!
//! Compress frames are inflated and their contents re-fed through a
//! persistent second-stage decoder owned by this one. The second stage keeps
//! its own buffer, so a frame split across two Compress payloads still
//! decodes, and a Compress frame nested inside another unwraps recursively.
//!
//! # Example
//!
//! ```
//! use lumberjack_server::protocol::{encode_window, FrameDecoder, Frame, VERSION_2};
//!
//! let mut decoder = FrameDecoder::new();
//! let bytes = encode_window(VERSION_2, 10);
//!
//! // Data arrives in chunks from the socket
//! assert!(decoder.push(&bytes[..3]).unwrap().is_empty());
//! let frames = decoder.push(&bytes[3..]).unwrap();
//! assert_eq!(frames[0].frame, Frame::Window { size: 10 });
//! ```

use std::io::Read;

use bytes::{Buf, Bytes, BytesMut};
use flate2::read::ZlibDecoder;

use super::frame::{Frame, VersionedFrame};
use super::wire_format::{is_valid_version, FrameType, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::error::{LumberjackError, Result};

/// Read cursor over buffered bytes.
///
/// Reads never touch the underlying buffer; the decoder commits `pos`
/// only after a full frame parses.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }
}

/// Incremental decoder turning a raw byte stream into typed frames.
pub struct FrameDecoder {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Maximum accepted value for any length-prefixed field.
    max_payload_size: u32,
    /// Second-stage decoder fed with inflated Compress payloads.
    inflated: Option<Box<FrameDecoder>>,
}

impl FrameDecoder {
    /// Create a decoder with default settings (64KB initial buffer, 1GB max field).
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a decoder with a custom bound on length-prefixed fields.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_payload_size,
            inflated: None,
        }
    }

    /// Push data into the decoder and extract all complete frames.
    ///
    /// Returns frames in strict wire order. Compress frames never appear in
    /// the result; their contents are inflated and re-framed in place.
    /// Partial trailing bytes, including a partial frame inside an inflated
    /// payload, are retained for the next push.
    ///
    /// # Errors
    ///
    /// All errors are fatal for the connection: unknown type byte, invalid
    /// version byte, oversized length field, undecodable JSON or UTF-8, and
    /// zlib inflation failure.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<VersionedFrame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(decoded) = self.try_decode_one()? {
            match decoded.frame {
                Frame::Compressed { decompressed } => {
                    let max = self.max_payload_size;
                    let nested = self
                        .inflated
                        .get_or_insert_with(|| Box::new(FrameDecoder::with_max_payload(max)));
                    frames.extend(nested.push(&decompressed)?);
                }
                _ => frames.push(decoded),
            }
        }

        Ok(frames)
    }

    /// Try to decode a single frame from the buffered bytes.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` and commits the consumed bytes
    /// - `Ok(None)` if more data is needed, consuming nothing
    /// - `Err(...)` on a protocol violation
    fn try_decode_one(&mut self) -> Result<Option<VersionedFrame>> {
        let mut cursor = Cursor::new(&self.buffer);

        let Some(version) = cursor.read_u8() else {
            return Ok(None);
        };
        if !is_valid_version(version) {
            return Err(LumberjackError::Protocol(format!(
                "Invalid version byte: 0x{version:02x}"
            )));
        }

        let Some(tag) = cursor.read_u8() else {
            return Ok(None);
        };
        let Some(frame_type) = FrameType::from_byte(tag) else {
            return Err(LumberjackError::UnknownFrameType(tag));
        };

        let frame = match frame_type {
            FrameType::Window => {
                let Some(size) = cursor.read_u32() else {
                    return Ok(None);
                };
                Frame::Window { size }
            }

            FrameType::Ack => {
                let Some(sequence) = cursor.read_u32() else {
                    return Ok(None);
                };
                Frame::Ack { sequence }
            }

            FrameType::Compress => {
                let Some(compressed_len) = cursor.read_u32() else {
                    return Ok(None);
                };
                self.check_length(compressed_len, "compressed payload")?;
                let Some(body) = cursor.read_bytes(compressed_len as usize) else {
                    return Ok(None);
                };
                let decompressed = inflate(body)?;
                Frame::Compressed {
                    decompressed: Bytes::from(decompressed),
                }
            }

            FrameType::Json => {
                let Some(sequence) = cursor.read_u32() else {
                    return Ok(None);
                };
                let Some(payload_len) = cursor.read_u32() else {
                    return Ok(None);
                };
                self.check_length(payload_len, "JSON payload")?;
                let Some(body) = cursor.read_bytes(payload_len as usize) else {
                    return Ok(None);
                };
                let payload = serde_json::from_slice(body)?;
                Frame::Json { sequence, payload }
            }

            FrameType::Data => {
                let Some(sequence) = cursor.read_u32() else {
                    return Ok(None);
                };
                let Some(pair_count) = cursor.read_u32() else {
                    return Ok(None);
                };
                // Each pair takes at least 8 bytes of length prefixes.
                if pair_count as u64 * 8 > self.max_payload_size as u64 {
                    return Err(LumberjackError::Protocol(format!(
                        "Data frame pair count {pair_count} exceeds maximum"
                    )));
                }

                // Cap the up-front allocation: the count comes straight off
                // the wire, so large batches grow as pairs actually parse.
                let mut fields = Vec::with_capacity(pair_count.min(1024) as usize);
                for _ in 0..pair_count {
                    let Some(key) = self.read_string(&mut cursor)? else {
                        return Ok(None);
                    };
                    let Some(value) = self.read_string(&mut cursor)? else {
                        return Ok(None);
                    };
                    fields.push((key, value));
                }
                Frame::Data { sequence, fields }
            }
        };

        // Full frame decoded; commit the read position.
        let consumed = cursor.pos;
        self.buffer.advance(consumed);

        Ok(Some(VersionedFrame { version, frame }))
    }

    /// Read one `(u32 len, utf8 bytes)` field of a Data frame.
    fn read_string(&self, cursor: &mut Cursor<'_>) -> Result<Option<String>> {
        let Some(len) = cursor.read_u32() else {
            return Ok(None);
        };
        self.check_length(len, "Data field")?;
        let Some(bytes) = cursor.read_bytes(len as usize) else {
            return Ok(None);
        };
        Ok(Some(String::from_utf8(bytes.to_vec())?))
    }

    fn check_length(&self, len: u32, what: &str) -> Result<()> {
        if len > self.max_payload_size {
            return Err(LumberjackError::Protocol(format!(
                "{what} length {len} exceeds maximum {}",
                self.max_payload_size
            )));
        }
        Ok(())
    }

    /// Number of buffered first-stage bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Check whether both decoder stages are drained.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.inflated.as_ref().map_or(true, |d| d.is_empty())
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Inflate a zlib stream; failure is fatal for the connection.
fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(LumberjackError::Decompress)?;
    Ok(out)
}
