//! Transport abstraction for stream-oriented connections.
//!
//! Abstracts over reliable byte-stream transports (TCP and its simulated
//! equivalents). Production uses tokio's TCP, tests use Turmoil (simulated
//! TCP), so the same lifecycle code runs in both.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Factory for listening endpoints and outbound connections.
///
/// Binding is separate from accepting so the lifecycle manager can open and
/// close its listening endpoint repeatedly over one transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Bidirectional byte stream to one peer.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Listening endpoint producing [`Self::Stream`]s.
    type Listener: Listener<Stream = Self::Stream>;

    /// Open a listening endpoint at `addr`.
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener>;

    /// Connect to a remote endpoint.
    ///
    /// Resolves once the stream is established; no protocol handshake has
    /// happened yet.
    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;
}

/// An open listening endpoint.
#[async_trait]
pub trait Listener: Send + 'static {
    /// Stream type handed out for each accepted connection.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept the next incoming connection.
    ///
    /// Blocks until a peer connects and returns its stream and address.
    async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Address the endpoint is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}
