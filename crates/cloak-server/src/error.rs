//! Runtime error types.

use std::{net::SocketAddr, time::Duration};

use cloak_core::NetworkError;
use thiserror::Error;

/// Errors from the node runtime.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Error from the network state machine
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Socket or listener I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer sent an unacceptable hello
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Peer did not complete the handshake in time
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// `start_incoming` called while already listening
    #[error("already listening on {0}")]
    AlreadyListening(SocketAddr),

    /// The connection was closed by `stop_incoming` before it was identified
    #[error("node stopped")]
    Stopped,
}
