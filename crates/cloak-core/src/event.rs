//! Notifications raised to the owning node.

use crate::types::NodeId;

/// Event produced by the network state machine.
///
/// `ReadyRead` fires once per verified frame and `InputError` once per
/// framing violation or failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A message from this node can now be taken with `read`.
    ReadyRead(NodeId),
    /// A framing or verification failure occurred on this node's connection.
    InputError(NodeId),
    /// A connection finished its handshake and is addressable.
    Connected(NodeId),
    /// An identified connection was closed.
    Disconnected(NodeId),
    /// Buffering input from this node failed to allocate. The connection is
    /// dropped and the process should be treated as unrecoverable.
    Fatal(NodeId),
}

impl NetworkEvent {
    /// Node the event concerns.
    pub fn node_id(&self) -> NodeId {
        match *self {
            Self::ReadyRead(id)
            | Self::InputError(id)
            | Self::Connected(id)
            | Self::Disconnected(id)
            | Self::Fatal(id) => id,
        }
    }
}
