//! Error types for the transport core.

use cloak_proto::ProtocolError;
use thiserror::Error;

use crate::types::{ConnectionId, NodeId};

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors reported by [`crate::Network`].
///
/// Framing violations and failed signature checks are not errors: they are
/// recorded in the log and surfaced as [`crate::NetworkEvent::InputError`].
#[derive(Debug, Error)]
pub enum NetworkError {
    /// No identified connection for this node.
    #[error("no connection for {0}")]
    NodeUnknown(NodeId),

    /// Socket write failed; the connection is left for the lifecycle
    /// manager to reap.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound frame violates the configured limits.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection handle is not (or no longer) managed.
    #[error("unknown connection {0}")]
    ConnectionUnknown(ConnectionId),

    /// Bytes arrived on a connection that has not completed its handshake.
    #[error("{0} has not been identified")]
    NotIdentified(ConnectionId),

    /// Another live connection already speaks for this node.
    #[error("{0} is already connected")]
    NodeAlreadyConnected(NodeId),

    /// A segment buffer could not be allocated. Unrecoverable.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(ProtocolError),

    /// Encoding or decoding an exported log failed.
    #[error("log export failed: {0}")]
    Export(String),
}

impl NetworkError {
    /// Whether the caller should treat this error as unrecoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}
