//! Connection registry.
//!
//! Owns every managed connection together with its socket handle (a
//! [`PeerWriter`]) and its frame decoder. Identified connections are also
//! indexed by [`NodeId`]; the primary table is keyed by [`ConnectionId`], so
//! both directions of the mapping are available.
//!
//! # Lifecycle
//!
//! ```text
//! ┌──────────────────┐  identify(node)  ┌──────────────────┐
//! │ PendingHandshake │─────────────────>│ Identified(node) │
//! └──────────────────┘                  └──────────────────┘
//!          │                                     │
//!          │ remove / drain                      │ remove / drain
//!          ↓                                     ↓
//!      (dropped, writer closed)             (dropped, writer closed)
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    io,
};

use bytes::Bytes;
use cloak_proto::{BufferState, DecoderLimits, FrameDecoder};

use crate::{
    error::{NetworkError, Result},
    types::{ConnectionId, NodeId},
};

/// Outbound half of a connection's socket.
///
/// Writes must not block: a runtime typically hands the bytes to a
/// per-connection writer task and reports a full or closed queue as an
/// error.
pub trait PeerWriter: Send {
    /// Write one encoded frame, returning the number of bytes accepted.
    fn write(&mut self, frame: Bytes) -> io::Result<usize>;

    /// Release the socket. Called exactly once, when the connection leaves
    /// the registry.
    fn close(&mut self);
}

/// Handshake status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted or dialed, `NodeId` not yet established
    PendingHandshake,
    /// Handshake complete; frames are decoded for this node
    Identified(NodeId),
}

/// One managed connection.
#[derive(Debug)]
pub struct Connection<W> {
    id: ConnectionId,
    state: ConnectionState,
    writer: W,
    decoder: FrameDecoder,
}

impl<W> Connection<W> {
    /// Connection handle.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Handshake status.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Remote node, once identified.
    pub fn node_id(&self) -> Option<NodeId> {
        match self.state {
            ConnectionState::Identified(node) => Some(node),
            ConnectionState::PendingHandshake => None,
        }
    }

    /// Phase of this connection's frame decoder.
    pub fn buffer_state(&self) -> BufferState {
        self.decoder.state()
    }

    /// Frame decoder.
    pub fn decoder_mut(&mut self) -> &mut FrameDecoder {
        &mut self.decoder
    }

    /// Socket writer.
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}

/// Table of live connections keyed by handle, with a `NodeId` index.
#[derive(Debug)]
pub struct ConnectionRegistry<W> {
    next_id: u64,
    connections: HashMap<ConnectionId, Connection<W>>,
    /// BTreeMap so broadcast order is deterministic
    by_node: BTreeMap<NodeId, ConnectionId>,
}

impl<W: PeerWriter> ConnectionRegistry<W> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { next_id: 0, connections: HashMap::new(), by_node: BTreeMap::new() }
    }

    /// Register a new connection in `PendingHandshake`.
    pub fn open(&mut self, writer: W, limits: DecoderLimits) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        self.connections.insert(
            id,
            Connection {
                id,
                state: ConnectionState::PendingHandshake,
                writer,
                decoder: FrameDecoder::new(limits),
            },
        );
        id
    }

    /// Bind a pending connection to `node`.
    pub fn identify(&mut self, id: ConnectionId, node: NodeId) -> Result<()> {
        if self.by_node.contains_key(&node) {
            return Err(NetworkError::NodeAlreadyConnected(node));
        }

        let connection = self.connections.get_mut(&id).ok_or(NetworkError::ConnectionUnknown(id))?;
        if let ConnectionState::Identified(existing) = connection.state {
            return Err(NetworkError::NodeAlreadyConnected(existing));
        }

        connection.state = ConnectionState::Identified(node);
        self.by_node.insert(node, id);
        Ok(())
    }

    /// Connection by handle.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection<W>> {
        self.connections.get(&id)
    }

    /// Mutable connection by handle.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<W>> {
        self.connections.get_mut(&id)
    }

    /// Handle of the connection identified as `node`.
    pub fn connection_for(&self, node: NodeId) -> Option<ConnectionId> {
        self.by_node.get(&node).copied()
    }

    /// Mutable connection identified as `node`.
    pub fn by_node_mut(&mut self, node: NodeId) -> Option<&mut Connection<W>> {
        let id = self.by_node.get(&node)?;
        self.connections.get_mut(id)
    }

    /// Remove a connection, closing its writer.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection<W>> {
        let mut connection = self.connections.remove(&id)?;
        if let Some(node) = connection.node_id() {
            self.by_node.remove(&node);
        }
        connection.writer.close();
        Some(connection)
    }

    /// Remove every connection, closing all writers.
    ///
    /// Returns the nodes that were identified, in `NodeId` order.
    pub fn drain(&mut self) -> Vec<NodeId> {
        let identified: Vec<NodeId> = self.by_node.keys().copied().collect();
        for (_, mut connection) in self.connections.drain() {
            connection.writer.close();
        }
        self.by_node.clear();
        identified
    }

    /// Identified nodes in `NodeId` order.
    pub fn identified(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.by_node.keys().copied()
    }

    /// Number of connections still in the handshake.
    pub fn pending_count(&self) -> usize {
        self.connections.len() - self.by_node.len()
    }

    /// Number of managed connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is managed.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<W: PeerWriter> Default for ConnectionRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}
