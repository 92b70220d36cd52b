//! Typed protocol frames and the message handed to consumers.

use bytes::Bytes;
use serde_json::Value;

/// A decoded Lumberjack frame.
///
/// `Compressed` never escapes [`FrameDecoder::push`](super::FrameDecoder::push):
/// the decoder inflates it and re-frames its contents into the nested frames
/// it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Acknowledgment of every event up to and including `sequence`.
    Ack {
        /// Highest acknowledged sequence number.
        sequence: u32,
    },
    /// The peer will send `size` events before expecting an ack.
    Window {
        /// New window size; replaces the previous one wholesale.
        size: u32,
    },
    /// A zlib-compressed batch of frames, already inflated.
    Compressed {
        /// Inflated bytes; zero or more complete or partial frames.
        decompressed: Bytes,
    },
    /// An event with a JSON payload.
    Json {
        /// Sender-assigned sequence number.
        sequence: u32,
        /// Parsed JSON value (object, array, or scalar).
        payload: Value,
    },
    /// An event with length-prefixed key/value pairs.
    Data {
        /// Sender-assigned sequence number.
        sequence: u32,
        /// Pairs in wire order; duplicates are preserved.
        fields: Vec<(String, String)>,
    },
}

impl Frame {
    /// Sequence number for event-bearing frames (`Json`/`Data`), if any.
    pub fn sequence(&self) -> Option<u32> {
        match self {
            Frame::Json { sequence, .. } | Frame::Data { sequence, .. } => Some(*sequence),
            Frame::Ack { .. } | Frame::Window { .. } | Frame::Compressed { .. } => None,
        }
    }
}

/// A frame together with the version byte it was framed with.
///
/// The decoder validates the shape of the version byte (`'1'` or `'2'`);
/// locking the version for the connection is the session's job.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedFrame {
    /// Version byte, `b'1'` or `b'2'`.
    pub version: u8,
    /// The decoded frame.
    pub frame: Frame,
}

/// Payload of a message delivered to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    /// Payload of a Json frame.
    Json(Value),
    /// Payload of a Data frame, in wire order.
    Fields(Vec<(String, String)>),
}

/// One event delivered to the external consumer.
///
/// Created from a `Json` or `Data` frame; consumed exactly once by the
/// dispatcher and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct LumberjackMessage {
    /// Sender-assigned sequence number.
    pub sequence: u32,
    /// Event payload.
    pub payload: MessagePayload,
}

impl LumberjackMessage {
    /// Build a message from an event-bearing frame.
    ///
    /// Returns `None` for `Ack`, `Window`, and `Compressed` frames, which
    /// carry no event.
    pub fn from_frame(frame: Frame) -> Option<Self> {
        match frame {
            Frame::Json { sequence, payload } => Some(Self {
                sequence,
                payload: MessagePayload::Json(payload),
            }),
            Frame::Data { sequence, fields } => Some(Self {
                sequence,
                payload: MessagePayload::Fields(fields),
            }),
            Frame::Ack { .. } | Frame::Window { .. } | Frame::Compressed { .. } => None,
        }
    }
}
