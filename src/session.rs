//! Per-connection session state: version lock and ack windowing.
//!
//! One [`Session`] exists per connection and lives for its whole lifetime.
//! It locks the protocol version on the first decoded frame, tracks the
//! acknowledgment window announced by the peer, and emits an Ack frame when
//! the last event of a window-sized batch completes. Acking only the batch
//! boundary is what paces the sending peer (flow control); an event that is
//! never acked will be redelivered by a well-behaved peer after reconnect.

use bytes::Bytes;

use crate::error::{LumberjackError, Result};
use crate::protocol::{encode_ack, is_valid_version};
use crate::writer::WriterHandle;

/// Per-connection protocol state machine.
///
/// Owned by its connection; in-flight completions share it behind a
/// `tokio::sync::Mutex`. Ack arithmetic assumes the consumer completes
/// messages in non-decreasing sequence order (see
/// [`MessageConsumer`](crate::consumer::MessageConsumer)).
pub struct Session {
    /// Version locked by the first frame, immutable thereafter.
    version: Option<u8>,
    /// Current window size; default 1 until the peer announces one.
    window_size: u32,
    /// Sequence number whose completion triggers the next ack.
    pending_ack_target: Option<u32>,
    /// Outbound channel for ack frames.
    writer: WriterHandle,
}

impl Session {
    /// Create a session writing acks through the given handle.
    pub fn new(writer: WriterHandle) -> Self {
        Self {
            version: None,
            window_size: 1,
            pending_ack_target: None,
            writer,
        }
    }

    /// Observe the version byte of a decoded frame.
    ///
    /// The first observation locks the version for the connection. A later
    /// differing version is a fatal protocol violation.
    pub fn version_read(&mut self, version: u8) -> Result<()> {
        if !is_valid_version(version) {
            return Err(LumberjackError::Protocol(format!(
                "Invalid version byte: 0x{version:02x}"
            )));
        }

        match self.version {
            None => {
                self.version = Some(version);
                Ok(())
            }
            Some(locked) if locked == version => Ok(()),
            Some(locked) => Err(LumberjackError::VersionMismatch {
                expected: locked as char,
                got: version as char,
            }),
        }
    }

    /// Observe a Window frame: replace the window size and discard any
    /// pending ack target so the next completion establishes a fresh batch.
    pub fn window_size_read(&mut self, size: u32) {
        self.window_size = size;
        self.pending_ack_target = None;
    }

    /// Record that the consumer accepted the message with this sequence
    /// number, emitting an Ack when it closes the current batch.
    ///
    /// The target is computed lazily from the first completion after a
    /// window change (`seq + window_size - 1`) and is not advanced on
    /// emission; only the next Window frame resets it.
    pub async fn notify_message_processed(&mut self, sequence: u32) -> Result<()> {
        if self.pending_ack_target.is_none() {
            self.pending_ack_target = Some(sequence.wrapping_add(self.window_size).wrapping_sub(1));
        }

        if self.pending_ack_target == Some(sequence) {
            let version = self.version.ok_or_else(|| {
                LumberjackError::Protocol("message completed before any frame was decoded".into())
            })?;
            let ack = encode_ack(version, sequence);
            tracing::debug!(sequence, "acking batch");
            self.writer.send(Bytes::copy_from_slice(&ack)).await?;
        }

        Ok(())
    }

    /// Version locked for this connection, if any frame has been seen.
    #[inline]
    pub fn version(&self) -> Option<u8> {
        self.version
    }

    /// Current window size.
    #[inline]
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Sequence number that will trigger the next ack, if established.
    #[inline]
    pub fn pending_ack_target(&self) -> Option<u32> {
        self.pending_ack_target
    }
}
