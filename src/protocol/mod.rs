//! Protocol module - wire format, framing, and the incremental decoder.
//!
//! This module implements the binary Lumberjack protocol:
//! - 2-byte frame header (version byte + type byte) with per-type bodies
//! - Incremental decoder that retains partial reads and unwraps
//!   zlib-compressed batches
//! - Typed [`Frame`] values and the [`LumberjackMessage`] handed to consumers

mod decoder;
mod frame;
mod wire_format;

pub use decoder::FrameDecoder;
pub use frame::{Frame, LumberjackMessage, MessagePayload, VersionedFrame};
pub use wire_format::{
    encode_ack, encode_compressed, encode_data, encode_json, encode_window, is_valid_version,
    FrameType, DEFAULT_MAX_PAYLOAD_SIZE, FRAME_HEADER_SIZE, TYPE_ACK, TYPE_COMPRESS, TYPE_DATA,
    TYPE_JSON, TYPE_WINDOW, VERSION_1, VERSION_2,
};
