//! Consumer contract: where decoded messages leave the protocol engine.
//!
//! The engine does not know what happens to an event once it is decoded;
//! it only needs a single answer per message: accepted or not. Accepted
//! messages feed the ack window; a rejection poisons the connection
//! (fail-fast, no retry - the peer redelivers unacked events on reconnect).
//!
//! # Ordering contract
//!
//! Multiple messages from one connection may be in flight concurrently.
//! The ack arithmetic is only meaningful if completions arrive in
//! non-decreasing sequence order per connection; a consumer that completes
//! out of order may ack a batch whose earlier events it has not durably
//! accepted.
//!
//! # Example
//!
//! ```
//! use lumberjack_server::consumer_fn;
//!
//! let consumer = consumer_fn(|message| async move {
//!     println!("seq {}: {:?}", message.sequence, message.payload);
//!     true
//! });
//! # let _ = consumer;
//! ```

use std::future::Future;
use std::pin::Pin;

use crate::protocol::LumberjackMessage;

/// Boxed future resolving to the consumer's success indicator.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// External consumer of decoded messages.
///
/// `on_message_received` is invoked once per message, in decode order. The
/// returned future resolves exactly once with `true` (message durably
/// accepted, counts toward the ack window) or `false` (connection is
/// closed and all queued messages for it are dropped).
pub trait MessageConsumer: Send + Sync + 'static {
    /// Receive one message; resolve to the success indicator.
    fn on_message_received(&self, message: LumberjackMessage) -> BoxFuture<'static, bool>;
}

/// Consumer built from an async closure. See [`consumer_fn`].
pub struct FnConsumer<F> {
    f: F,
}

impl<F, Fut> MessageConsumer for FnConsumer<F>
where
    F: Fn(LumberjackMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn on_message_received(&self, message: LumberjackMessage) -> BoxFuture<'static, bool> {
        Box::pin((self.f)(message))
    }
}

/// Wrap an async closure `Fn(LumberjackMessage) -> Future<Output = bool>`
/// as a [`MessageConsumer`].
pub fn consumer_fn<F, Fut>(f: F) -> FnConsumer<F>
where
    F: Fn(LumberjackMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    FnConsumer { f }
}
