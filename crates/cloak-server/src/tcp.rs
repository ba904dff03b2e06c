//! TCP transport.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use cloak_core::transport::{Listener, Transport};
use tokio::net::{TcpListener, TcpStream};

/// Production transport over tokio TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

/// Bound TCP listening endpoint.
#[derive(Debug)]
pub struct TcpEndpoint {
    listener: TcpListener,
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpEndpoint;

    async fn bind(&self, addr: &str) -> io::Result<TcpEndpoint> {
        let listener = TcpListener::bind(addr).await?;
        Ok(TcpEndpoint { listener })
    }

    async fn connect(&self, addr: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[async_trait]
impl Listener for TcpEndpoint {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
