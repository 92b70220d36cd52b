//! Wire format constants and frame encoding.
//!
//! Every frame begins with a 2-byte header:
//! ```text
//! ┌──────────┬──────────┐
//! │ Version  │ Type     │
//! │ 1 byte   │ 1 byte   │
//! │ '1'/'2'  │ A W C J D│
//! └──────────┴──────────┘
//! ```
//!
//! The body layout depends on the type tag. All multi-byte integers are
//! Big Endian:
//!
//! - Ack (`A`): `u32 sequence`
//! - Window (`W`): `u32 size`
//! - Compress (`C`): `u32 compressed_len` + `compressed_len` bytes (zlib stream)
//! - Json (`J`): `u32 sequence` + `u32 payload_len` + UTF-8 JSON bytes
//! - Data (`D`): `u32 sequence` + `u32 pair_count` + repeated
//!   `(u32 len, key bytes, u32 len, value bytes)` pairs

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Protocol version byte for V1 (`'1'`).
pub const VERSION_1: u8 = b'1';

/// Protocol version byte for V2 (`'2'`).
pub const VERSION_2: u8 = b'2';

/// Frame header size in bytes (version byte + type byte).
pub const FRAME_HEADER_SIZE: usize = 2;

/// Default maximum length accepted for any length-prefixed field (1 GB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_073_741_824;

/// Type tag for acknowledgment frames.
pub const TYPE_ACK: u8 = b'A';

/// Type tag for window-size frames.
pub const TYPE_WINDOW: u8 = b'W';

/// Type tag for compressed frames.
pub const TYPE_COMPRESS: u8 = b'C';

/// Type tag for JSON data frames.
pub const TYPE_JSON: u8 = b'J';

/// Type tag for key/value data frames.
pub const TYPE_DATA: u8 = b'D';

/// Check whether a version byte is one of the two supported versions.
#[inline]
pub fn is_valid_version(version: u8) -> bool {
    version == VERSION_1 || version == VERSION_2
}

/// Decoded frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// `A` - acknowledgment.
    Ack,
    /// `W` - window size announcement.
    Window,
    /// `C` - zlib-compressed batch of frames.
    Compress,
    /// `J` - JSON event.
    Json,
    /// `D` - key/value event.
    Data,
}

impl FrameType {
    /// Map a wire type byte to a frame type.
    ///
    /// Returns `None` for any byte outside `{A, W, C, J, D}`; the decoder
    /// treats that as a fatal protocol violation.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            TYPE_ACK => Some(FrameType::Ack),
            TYPE_WINDOW => Some(FrameType::Window),
            TYPE_COMPRESS => Some(FrameType::Compress),
            TYPE_JSON => Some(FrameType::Json),
            TYPE_DATA => Some(FrameType::Data),
            _ => None,
        }
    }

    /// Wire byte for this frame type.
    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            FrameType::Ack => TYPE_ACK,
            FrameType::Window => TYPE_WINDOW,
            FrameType::Compress => TYPE_COMPRESS,
            FrameType::Json => TYPE_JSON,
            FrameType::Data => TYPE_DATA,
        }
    }
}

/// Encode an Ack frame.
///
/// This is the only frame the server writes back to the peer.
///
/// # Example
///
/// ```
/// use lumberjack_server::protocol::{encode_ack, VERSION_2};
///
/// let bytes = encode_ack(VERSION_2, 12);
/// assert_eq!(bytes, [b'2', b'A', 0, 0, 0, 12]);
/// ```
pub fn encode_ack(version: u8, sequence: u32) -> [u8; 6] {
    let mut buf = [0u8; 6];
    buf[0] = version;
    buf[1] = TYPE_ACK;
    buf[2..6].copy_from_slice(&sequence.to_be_bytes());
    buf
}

/// Encode a Window frame.
pub fn encode_window(version: u8, size: u32) -> [u8; 6] {
    let mut buf = [0u8; 6];
    buf[0] = version;
    buf[1] = TYPE_WINDOW;
    buf[2..6].copy_from_slice(&size.to_be_bytes());
    buf
}

/// Encode a Json frame from pre-serialized payload bytes.
pub fn encode_json(version: u8, sequence: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + 8 + payload.len());
    buf.push(version);
    buf.push(TYPE_JSON);
    buf.extend_from_slice(&sequence.to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Encode a Data frame; pairs are written in slice order.
pub fn encode_data(version: u8, sequence: u32, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(version);
    buf.push(TYPE_DATA);
    buf.extend_from_slice(&sequence.to_be_bytes());
    buf.extend_from_slice(&(fields.len() as u32).to_be_bytes());
    for (key, value) in fields {
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        buf.extend_from_slice(value.as_bytes());
    }
    buf
}

/// Wrap already-encoded frames in a Compress frame (zlib deflate).
pub fn encode_compressed(version: u8, frames: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(frames)?;
    let compressed = encoder.finish()?;

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + 4 + compressed.len());
    buf.push(version);
    buf.push(TYPE_COMPRESS);
    buf.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    buf.extend_from_slice(&compressed);
    Ok(buf)
}
