//! # lumberjack-server
//!
//! Server-side engine for the Lumberjack wire protocol: the binary,
//! streaming, windowed-acknowledgment protocol log-shipping agents use to
//! deliver event batches over a persistent TCP (optionally TLS) connection.
//!
//! ## Architecture
//!
//! - **Frame Decoder**: incremental parser turning raw bytes into typed
//!   frames, retaining partial reads and unwrapping zlib-compressed batches
//! - **Session**: per-connection version lock and window/ack state machine
//! - **Dispatcher**: hands messages to the consumer in decode order with
//!   fail-fast suspension after a failure
//! - **Server**: accept loop, optional TLS, per-connection pipeline, and
//!   graceful shutdown
//!
//! ## Example
//!
//! ```ignore
//! use lumberjack_server::{consumer_fn, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .bind("0.0.0.0", 5044)
//!         .consumer(consumer_fn(|message| async move {
//!             tracing::info!(sequence = message.sequence, "event received");
//!             true
//!         }))
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await
//! }
//! ```

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod writer;

mod server;

pub use consumer::{consumer_fn, BoxFuture, FnConsumer, MessageConsumer};
pub use error::{LumberjackError, Result};
pub use protocol::{Frame, FrameDecoder, LumberjackMessage, MessagePayload};
pub use server::{Server, ServerBuilder, DEFAULT_MAX_IN_FLIGHT_MESSAGES, DEFAULT_PORT};
pub use transport::TlsContext;
