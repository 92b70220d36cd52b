//! Error types for lumberjack-server.

use thiserror::Error;

/// Main error type for all lumberjack operations.
#[derive(Debug, Error)]
pub enum LumberjackError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON payload could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A Data frame key or value was not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// TLS handshake or configuration error.
    #[error("TLS error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    /// Protocol error (bad version byte, oversized length, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame type byte is not one of `A`, `W`, `C`, `J`, `D`.
    #[error("Unknown frame type byte: 0x{0:02x}")]
    UnknownFrameType(u8),

    /// The protocol version changed mid-connection.
    #[error("Version mismatch: connection is version {expected}, frame is version {got}")]
    VersionMismatch {
        /// Version locked by the first frame.
        expected: char,
        /// Version carried by the offending frame.
        got: char,
    },

    /// A Compress frame body could not be inflated.
    #[error("Decompression error: {0}")]
    Decompress(std::io::Error),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - outbound ack queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using LumberjackError.
pub type Result<T> = std::result::Result<T, LumberjackError>;
