//! Reference model of a mesh of accountable network nodes.
//!
//! The model tracks whole messages, never bytes: each directed link is a
//! queue of pending frames plus a count of bytes the receiver has already
//! consumed. Frame sizes follow the wire format, so partial deliveries
//! complete frames at exactly the points the real decoder would.
//!
//! Comparing [`ModelWorld`] with [`crate::Mesh`] over random operation
//! sequences checks log order, ready-queue delivery and connection handling
//! end to end.

use std::collections::{BTreeMap, VecDeque};

use arbitrary::Arbitrary;
use cloak_core::{Direction, NetworkEvent, NodeId};

/// Node index in a world; `NodeId` is index + 1.
pub type ModelNodeId = u8;

/// Signature length used by `Ed25519Authenticator`.
pub const SIGNATURE_SIZE: usize = 64;

/// Encoded size of a frame carrying `payload_len` bytes.
pub fn frame_size(payload_len: usize) -> usize {
    4 + payload_len + 4 + SIGNATURE_SIZE
}

/// `NodeId` of the node at `index`.
pub fn node_id(index: ModelNodeId) -> NodeId {
    NodeId(u32::from(index) + 1)
}

/// Small deterministic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub struct SmallMessage {
    /// First byte; later bytes count up from here
    pub seed: u8,
    /// Selects one of a few sizes, including empty
    pub size_class: u8,
}

impl SmallMessage {
    /// Message bytes.
    pub fn to_bytes(self) -> Vec<u8> {
        let len = match self.size_class % 4 {
            0 => 0,
            1 => 1,
            2 => 16,
            _ => 200,
        };
        (0..len).map(|i| self.seed.wrapping_add(i as u8)).collect()
    }
}

/// One step applied to both the model and the real mesh.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// `from` signs and sends to `to`
    Send {
        /// Sender
        from: ModelNodeId,
        /// Recipient
        to: ModelNodeId,
        /// Payload
        message: SmallMessage,
    },
    /// `from` sends to every peer it is connected to
    Broadcast {
        /// Sender
        from: ModelNodeId,
        /// Payload
        message: SmallMessage,
    },
    /// A frame with a bogus signature appears on the link `from` → `to`
    Forge {
        /// Claimed sender (the connection it arrives on)
        from: ModelNodeId,
        /// Recipient
        to: ModelNodeId,
        /// Payload
        message: SmallMessage,
    },
    /// Up to `bytes` pending bytes on `from` → `to` reach `to`
    Deliver {
        /// Sending end of the link
        from: ModelNodeId,
        /// Receiving end of the link
        to: ModelNodeId,
        /// Maximum bytes delivered in this step
        bytes: u16,
    },
    /// `node` reads the oldest message from `from`
    Read {
        /// Reader
        node: ModelNodeId,
        /// Peer to read from
        from: ModelNodeId,
    },
    /// `node` clears its log and undelivered messages
    ClearLog {
        /// Node whose log is cleared
        node: ModelNodeId,
    },
    /// The connection between `a` and `b` drops; bytes in flight are lost
    Disconnect {
        /// One end
        a: ModelNodeId,
        /// Other end
        b: ModelNodeId,
    },
    /// A fresh connection between `a` and `b` is identified on both ends
    Connect {
        /// One end
        a: ModelNodeId,
        /// Other end
        b: ModelNodeId,
    },
}

impl Operation {
    /// Map every node index into `0..nodes`.
    pub fn clamped(self, nodes: u8) -> Self {
        let n = nodes.max(1);
        match self {
            Self::Send { from, to, message } => Self::Send { from: from % n, to: to % n, message },
            Self::Broadcast { from, message } => Self::Broadcast { from: from % n, message },
            Self::Forge { from, to, message } => Self::Forge { from: from % n, to: to % n, message },
            Self::Deliver { from, to, bytes } => Self::Deliver { from: from % n, to: to % n, bytes },
            Self::Read { node, from } => Self::Read { node: node % n, from: from % n },
            Self::ClearLog { node } => Self::ClearLog { node: node % n },
            Self::Disconnect { a, b } => Self::Disconnect { a: a % n, b: b % n },
            Self::Connect { a, b } => Self::Connect { a: a % n, b: b % n },
        }
    }
}

/// Observable outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Nothing to report
    Ok,
    /// Bytes handed to the socket by a send
    Sent(usize),
    /// Successful sends of a broadcast
    Broadcast(usize),
    /// Notifications raised by a delivery
    Events(Vec<NetworkEvent>),
    /// Result of a read
    Read(Option<Vec<u8>>),
    /// Operation rejected
    Error(OperationError),
}

impl OperationResult {
    /// Whether the operation was accepted.
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Error(_))
    }
}

/// Why an operation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// No identified connection between the two nodes
    NodeUnknown,
    /// The two nodes are already connected (or are the same node)
    AlreadyConnected,
    /// The network reported an unexpected error
    Unexpected,
}

/// Log entry as the model sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    /// Send or receive
    pub direction: Direction,
    /// Peer index
    pub peer: ModelNodeId,
    /// Payload bytes
    pub payload: Vec<u8>,
    /// Signature verified (always true for sends)
    pub valid: bool,
}

#[derive(Debug, Default)]
struct ModelNode {
    log: Vec<ModelEntry>,
    ready: VecDeque<usize>,
}

#[derive(Debug, Default)]
struct ModelLink {
    /// (payload, signature valid)
    frames: VecDeque<(Vec<u8>, bool)>,
    /// Bytes of the front frame already consumed
    consumed: usize,
}

/// Reference implementation: a full mesh of nodes.
#[derive(Debug)]
pub struct ModelWorld {
    nodes: Vec<ModelNode>,
    /// Directed links keyed by (sender, receiver); present while connected
    links: BTreeMap<(ModelNodeId, ModelNodeId), ModelLink>,
}

impl ModelWorld {
    /// `count` nodes, every pair connected.
    pub fn new(count: u8) -> Self {
        let nodes = (0..count).map(|_| ModelNode::default()).collect();
        let mut links = BTreeMap::new();
        for a in 0..count {
            for b in (0..count).filter(|&b| b != a) {
                links.insert((a, b), ModelLink::default());
            }
        }
        Self { nodes, links }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the world has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `a` holds an identified connection to `b`.
    pub fn is_connected(&self, a: ModelNodeId, b: ModelNodeId) -> bool {
        self.links.contains_key(&(a, b))
    }

    /// Log of `node`, oldest first.
    pub fn log(&self, node: ModelNodeId) -> &[ModelEntry] {
        self.nodes.get(usize::from(node)).map_or(&[], |n| n.log.as_slice())
    }

    /// Messages waiting for `node` to read.
    pub fn pending_reads(&self, node: ModelNodeId) -> usize {
        self.nodes.get(usize::from(node)).map_or(0, |n| n.ready.len())
    }

    /// Apply one operation. Indices must already be clamped.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match *op {
            Operation::Send { from, to, message } => self.send(from, to, message.to_bytes()),
            Operation::Broadcast { from, message } => {
                let payload = message.to_bytes();
                let peers: Vec<ModelNodeId> =
                    self.links.keys().filter(|(a, _)| *a == from).map(|(_, b)| *b).collect();
                let delivered = peers
                    .into_iter()
                    .filter(|&to| self.send(from, to, payload.clone()).is_ok())
                    .count();
                OperationResult::Broadcast(delivered)
            },
            Operation::Forge { from, to, message } => match self.links.get_mut(&(from, to)) {
                Some(link) => {
                    link.frames.push_back((message.to_bytes(), false));
                    OperationResult::Ok
                },
                None => OperationResult::Error(OperationError::NodeUnknown),
            },
            Operation::Deliver { from, to, bytes } => self.deliver(from, to, usize::from(bytes)),
            Operation::Read { node, from } => {
                let Some(state) = self.nodes.get_mut(usize::from(node)) else {
                    return OperationResult::Error(OperationError::NodeUnknown);
                };
                let log = &state.log;
                let position = state.ready.iter().position(|&index| log[index].peer == from);
                let payload = position
                    .and_then(|p| state.ready.remove(p))
                    .map(|index| state.log[index].payload.clone());
                OperationResult::Read(payload)
            },
            Operation::ClearLog { node } => {
                if let Some(state) = self.nodes.get_mut(usize::from(node)) {
                    state.log.clear();
                    state.ready.clear();
                }
                OperationResult::Ok
            },
            Operation::Disconnect { a, b } => {
                if self.links.remove(&(a, b)).is_none() {
                    return OperationResult::Error(OperationError::NodeUnknown);
                }
                self.links.remove(&(b, a));
                OperationResult::Ok
            },
            Operation::Connect { a, b } => {
                if a == b || self.links.contains_key(&(a, b)) {
                    return OperationResult::Error(OperationError::AlreadyConnected);
                }
                self.links.insert((a, b), ModelLink::default());
                self.links.insert((b, a), ModelLink::default());
                OperationResult::Ok
            },
        }
    }

    fn send(&mut self, from: ModelNodeId, to: ModelNodeId, payload: Vec<u8>) -> OperationResult {
        let Some(link) = self.links.get_mut(&(from, to)) else {
            return OperationResult::Error(OperationError::NodeUnknown);
        };
        let size = frame_size(payload.len());
        link.frames.push_back((payload.clone(), true));

        self.nodes[usize::from(from)].log.push(ModelEntry {
            direction: Direction::Send,
            peer: to,
            payload,
            valid: true,
        });
        OperationResult::Sent(size)
    }

    fn deliver(&mut self, from: ModelNodeId, to: ModelNodeId, mut budget: usize) -> OperationResult {
        let Some(link) = self.links.get_mut(&(from, to)) else {
            return OperationResult::Error(OperationError::NodeUnknown);
        };

        let mut completed = Vec::new();
        while budget > 0 {
            let Some((payload, _)) = link.frames.front() else { break };
            let remaining = frame_size(payload.len()) - link.consumed;
            if budget < remaining {
                link.consumed += budget;
                break;
            }
            budget -= remaining;
            link.consumed = 0;
            completed.extend(link.frames.pop_front());
        }

        let receiver = &mut self.nodes[usize::from(to)];
        let events = completed
            .into_iter()
            .map(|(payload, valid)| {
                receiver.log.push(ModelEntry { direction: Direction::Recv, peer: from, payload, valid });
                if valid {
                    receiver.ready.push_back(receiver.log.len() - 1);
                    NetworkEvent::ReadyRead(node_id(from))
                } else {
                    NetworkEvent::InputError(node_id(from))
                }
            })
            .collect();

        OperationResult::Events(events)
    }
}
