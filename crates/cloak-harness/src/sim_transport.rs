//! Simulated transport using turmoil.
//!
//! Runs the same node code as production over turmoil's simulated TCP, so
//! latency, held links and restarts are deterministic under a fixed seed.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use cloak_core::transport::{Listener, Transport};
use turmoil::net::{TcpListener, TcpStream};

/// Transport over turmoil's simulated network.
///
/// Must be used inside a turmoil host or client.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTransport;

/// Bound simulated listening endpoint.
pub struct SimEndpoint {
    listener: TcpListener,
}

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;
    type Listener = SimEndpoint;

    async fn bind(&self, addr: &str) -> io::Result<SimEndpoint> {
        let listener = TcpListener::bind(addr).await?;
        Ok(SimEndpoint { listener })
    }

    async fn connect(&self, addr: &str) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

#[async_trait]
impl Listener for SimEndpoint {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
