//! Per-connection dispatch of decoded messages to the consumer.
//!
//! Messages are handed over in decode order, but the dispatcher never waits
//! for one completion before starting the next, so several messages from
//! the same connection can be in flight at the consumer. Each in-flight
//! message holds a permit from a server-wide semaphore, bounding consumer
//! work so one slow consumer cannot starve decoding on other connections.
//!
//! The first `false` completion poisons the connection: the close signal
//! fires, and every message still queued or decoded afterwards is silently
//! dropped without reaching the consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Semaphore};

use crate::consumer::MessageConsumer;
use crate::error::{LumberjackError, Result};
use crate::protocol::LumberjackMessage;
use crate::session::Session;

/// Dispatches one connection's messages to the shared consumer.
pub struct ConnectionDispatcher {
    /// The external consumer, shared across the server's connections.
    consumer: Arc<dyn MessageConsumer>,
    /// Session fed by completion continuations.
    session: Arc<Mutex<Session>>,
    /// Server-wide bound on in-flight consumer work.
    permits: Arc<Semaphore>,
    /// Set on the first failed completion; never cleared.
    poisoned: Arc<AtomicBool>,
    /// Asks the connection's read loop to close.
    close_tx: mpsc::Sender<()>,
}

impl ConnectionDispatcher {
    /// Create a dispatcher for one connection.
    pub fn new(
        consumer: Arc<dyn MessageConsumer>,
        session: Arc<Mutex<Session>>,
        permits: Arc<Semaphore>,
        close_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            consumer,
            session,
            permits,
            poisoned: Arc::new(AtomicBool::new(false)),
            close_tx,
        }
    }

    /// Hand one decoded message to the consumer.
    ///
    /// Returns once the message is in flight; completion is wired back to
    /// the session asynchronously. On a poisoned connection the message is
    /// dropped silently.
    pub async fn dispatch(&self, message: LumberjackMessage) -> Result<()> {
        if self.poisoned.load(Ordering::Acquire) {
            tracing::debug!(
                sequence = message.sequence,
                "dropping message on poisoned connection"
            );
            return Ok(());
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LumberjackError::ConnectionClosed)?;

        let consumer = self.consumer.clone();
        let session = self.session.clone();
        let poisoned = self.poisoned.clone();
        let close_tx = self.close_tx.clone();
        let sequence = message.sequence;

        tokio::spawn(async move {
            // Permit is held for the whole consumer invocation.
            let _permit = permit;

            // The connection may have been poisoned while this message
            // waited for a permit.
            if poisoned.load(Ordering::Acquire) {
                tracing::debug!(sequence, "dropping message on poisoned connection");
                return;
            }

            if consumer.on_message_received(message).await {
                if let Err(e) = session.lock().await.notify_message_processed(sequence).await {
                    tracing::warn!(sequence, error = %e, "ack emission failed, closing connection");
                    poisoned.store(true, Ordering::Release);
                    let _ = close_tx.try_send(());
                }
            } else {
                tracing::warn!(sequence, "consumer rejected message, closing connection");
                poisoned.store(true, Ordering::Release);
                let _ = close_tx.try_send(());
            }
        });

        Ok(())
    }

    /// Whether a failed completion has poisoned this connection.
    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }
}
