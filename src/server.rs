//! Server builder and per-connection pipeline.
//!
//! The [`ServerBuilder`] provides a fluent API for configuring the listener
//! and the consumer. A started [`Server`] runs:
//! 1. One accept loop task
//! 2. Per connection: optional TLS handshake, then a read loop feeding the
//!    frame decoder
//! 3. Window/Ack side effects applied to the session in frame order, then
//!    Json/Data messages handed to the dispatcher
//!
//! Shutdown stops accepting first, then signals every connection and awaits
//! them, so no frame is decoded against a torn-down consumer.
//!
//! # Example
//!
//! ```ignore
//! use lumberjack_server::{consumer_fn, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .bind("0.0.0.0", 5044)
//!         .consumer(consumer_fn(|message| async move {
//!             println!("seq {}", message.sequence);
//!             true
//!         }))
//!         .start()
//!         .await?;
//!
//!     server.shutdown().await
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::consumer::MessageConsumer;
use crate::dispatcher::ConnectionDispatcher;
use crate::error::{LumberjackError, Result};
use crate::protocol::{Frame, FrameDecoder, LumberjackMessage, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::session::Session;
use crate::transport::{MaybeTlsStream, TlsContext};
use crate::writer::{spawn_writer_task, WriterConfig};

/// Default Lumberjack listen port.
pub const DEFAULT_PORT: u16 = 5044;

/// Default bound on messages in flight at the consumer, server-wide.
pub const DEFAULT_MAX_IN_FLIGHT_MESSAGES: usize = 256;

/// Builder for configuring and starting a Lumberjack server.
pub struct ServerBuilder {
    host: String,
    port: u16,
    tls: Option<TlsContext>,
    consumer: Option<Arc<dyn MessageConsumer>>,
    max_in_flight_messages: usize,
    max_payload_size: u32,
    writer_config: WriterConfig,
}

impl ServerBuilder {
    /// Create a builder with defaults (`127.0.0.1:5044`, no TLS).
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            tls: None,
            consumer: None,
            max_in_flight_messages: DEFAULT_MAX_IN_FLIGHT_MESSAGES,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            writer_config: WriterConfig::default(),
        }
    }

    /// Set the listen host and port. Port 0 picks an ephemeral port.
    pub fn bind(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.port = port;
        self
    }

    /// Terminate TLS on accepted connections with the given context.
    pub fn tls(mut self, tls: TlsContext) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the consumer that receives every decoded message.
    pub fn consumer<C: MessageConsumer>(mut self, consumer: C) -> Self {
        self.consumer = Some(Arc::new(consumer));
        self
    }

    /// Set the server-wide bound on messages in flight at the consumer.
    ///
    /// Default: 256
    pub fn max_in_flight_messages(mut self, limit: usize) -> Self {
        self.max_in_flight_messages = limit;
        self
    }

    /// Bound accepted length-prefixed fields (compressed payloads, JSON
    /// bodies, Data keys and values).
    ///
    /// Default: 1 GB
    pub fn max_payload_size(mut self, limit: u32) -> Self {
        self.max_payload_size = limit;
        self
    }

    /// Set the maximum pending outbound frames per connection.
    ///
    /// Default: 1024
    pub fn max_pending_acks(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_frames = limit;
        self
    }

    /// Set the timeout when the outbound ack queue is full.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Bind the listener and start accepting connections.
    pub async fn start(self) -> Result<Server> {
        let consumer = self
            .consumer
            .ok_or_else(|| LumberjackError::Protocol("no consumer configured".into()))?;

        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, tls = self.tls.is_some(), "listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(self.max_in_flight_messages));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.tls,
            consumer,
            permits,
            self.max_payload_size,
            self.writer_config,
            shutdown_rx,
        ));

        Ok(Server {
            local_addr,
            shutdown_tx,
            accept_task,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Lumberjack server.
pub struct Server {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Gracefully shut down: stop accepting, close all connections, and
    /// await their completion.
    ///
    /// Consumer completions still in flight when the signal lands may not
    /// be acked before their connection closes; the peer redelivers those
    /// events on reconnect.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.accept_task.await {
            tracing::error!(error = %e, "accept task failed during shutdown");
        }
        Ok(())
    }
}

/// Accept loop: spawns one task per connection, drains them on shutdown.
async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsContext>,
    consumer: Arc<dyn MessageConsumer>,
    permits: Arc<Semaphore>,
    max_payload_size: u32,
    writer_config: WriterConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "accepted connection");
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        tls.clone(),
                        consumer.clone(),
                        permits.clone(),
                        max_payload_size,
                        writer_config.clone(),
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
        }
    }

    // Stop accepting before draining connections.
    drop(listener);
    while connections.join_next().await.is_some() {}
    tracing::debug!("all connections drained");
}

/// Assemble and run the pipeline for one accepted connection.
#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsContext>,
    consumer: Arc<dyn MessageConsumer>,
    permits: Arc<Semaphore>,
    max_payload_size: u32,
    writer_config: WriterConfig,
    shutdown_rx: watch::Receiver<bool>,
) {
    let stream = match tls {
        Some(ctx) => match ctx.accept(stream).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "TLS handshake failed");
                return;
            }
        },
        None => MaybeTlsStream::Plain(stream),
    };

    let (reader, write_half) = tokio::io::split(stream);
    let (writer, _writer_task) = spawn_writer_task(write_half, writer_config);

    let session = Arc::new(Mutex::new(Session::new(writer)));
    let (close_tx, close_rx) = mpsc::channel(1);
    let dispatcher = ConnectionDispatcher::new(consumer, session.clone(), permits, close_tx);

    if let Err(e) = read_loop(
        reader,
        session,
        dispatcher,
        max_payload_size,
        close_rx,
        shutdown_rx,
    )
    .await
    {
        match e {
            // Expected on client disconnect.
            LumberjackError::Io(err) => tracing::debug!(%peer, error = %err, "connection closed"),
            other => tracing::warn!(%peer, error = %other, "closing connection"),
        }
    } else {
        tracing::debug!(%peer, "connection finished");
    }
}

/// Read loop: raw bytes in, session side effects and dispatched messages out.
///
/// Frames are applied strictly in decode order: Window/Ack frames mutate the
/// session before any later message is dispatched.
async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    session: Arc<Mutex<Session>>,
    dispatcher: ConnectionDispatcher,
    max_payload_size: u32,
    mut close_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let mut decoder = FrameDecoder::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = tokio::select! {
            _ = shutdown_rx.changed() => return Ok(()),
            _ = close_rx.recv() => return Ok(()),
            read = reader.read(&mut buf) => match read {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(LumberjackError::Io(e)),
            },
        };

        for decoded in decoder.push(&buf[..n])? {
            session.lock().await.version_read(decoded.version)?;

            match decoded.frame {
                Frame::Window { size } => session.lock().await.window_size_read(size),
                Frame::Ack { sequence } => {
                    // Acks flow server to client; an inbound one carries no
                    // meaning here.
                    tracing::debug!(sequence, "ignoring inbound ack frame");
                }
                Frame::Compressed { .. } => {
                    // push() expands compressed frames before returning.
                    tracing::warn!("unexpanded compressed frame reached the read loop");
                }
                frame => {
                    if let Some(message) = LumberjackMessage::from_frame(frame) {
                        dispatcher.dispatch(message).await?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::consumer_fn;

    #[test]
    fn test_builder_defaults() {
        let builder = ServerBuilder::new();
        assert_eq!(builder.host, "127.0.0.1");
        assert_eq!(builder.port, DEFAULT_PORT);
        assert!(builder.tls.is_none());
        assert_eq!(builder.max_in_flight_messages, DEFAULT_MAX_IN_FLIGHT_MESSAGES);
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Server::builder()
            .bind("0.0.0.0", 6000)
            .max_in_flight_messages(512)
            .max_payload_size(1024)
            .max_pending_acks(64)
            .backpressure_timeout(std::time::Duration::from_secs(10));

        assert_eq!(builder.host, "0.0.0.0");
        assert_eq!(builder.port, 6000);
        assert_eq!(builder.max_in_flight_messages, 512);
        assert_eq!(builder.max_payload_size, 1024);
        assert_eq!(builder.writer_config.max_pending_frames, 64);
        assert_eq!(
            builder.writer_config.backpressure_timeout,
            std::time::Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn test_start_without_consumer_fails() {
        let result = Server::builder().bind("127.0.0.1", 0).start().await;
        assert!(matches!(result, Err(LumberjackError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let server = Server::builder()
            .bind("127.0.0.1", 0)
            .consumer(consumer_fn(|_| async { true }))
            .start()
            .await
            .unwrap();

        assert_ne!(server.local_addr().port(), 0);
        server.shutdown().await.unwrap();
    }
}
