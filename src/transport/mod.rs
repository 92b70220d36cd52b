//! Transport module - TCP acceptance with optional TLS termination.

mod stream;

pub use stream::{MaybeTlsStream, TlsContext};
