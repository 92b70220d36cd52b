//! TCP stream with optional server-side TLS termination.
//!
//! [`TlsContext`] wraps a `tokio_rustls::TlsAcceptor`; certificate
//! management (rotation, client auth policy) is the caller's concern - the
//! context is consumed as a parameter. [`MaybeTlsStream`] lets the rest of
//! the pipeline stay generic over plain and TLS connections.

use std::io::BufReader;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::error::{LumberjackError, Result};

/// Server-side TLS context for accepted connections.
#[derive(Clone)]
pub struct TlsContext {
    acceptor: TlsAcceptor,
}

impl TlsContext {
    /// Build a context from a prepared rustls server configuration.
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            acceptor: TlsAcceptor::from(config),
        }
    }

    /// Build a context from PEM-encoded certificate chain and private key
    /// files. No client certificate is requested.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let mut cert_reader = BufReader::new(std::fs::File::open(cert_path)?);
        let certs = rustls_pemfile::certs(&mut cert_reader).collect::<std::io::Result<Vec<_>>>()?;

        let mut key_reader = BufReader::new(std::fs::File::open(key_path)?);
        let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or_else(|| {
            LumberjackError::Protocol(format!("no private key found in {}", key_path.display()))
        })?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(Self::new(Arc::new(config)))
    }

    /// Run the server-side handshake on an accepted TCP stream.
    pub async fn accept(&self, stream: TcpStream) -> Result<MaybeTlsStream> {
        let tls = self.acceptor.accept(stream).await?;
        Ok(MaybeTlsStream::Tls(Box::new(tls)))
    }
}

/// An accepted connection, TLS-terminated or plain.
pub enum MaybeTlsStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
