//! In-memory mesh of real networks.
//!
//! Every node is a real [`Network`] with Ed25519 keys; every connection is a
//! byte pipe that only moves when an [`Operation::Deliver`] says so. This is
//! the "real" side of the model-based tests: it exercises the decoder,
//! signatures, log and ready queue exactly as a runtime would, minus sockets.

use std::{
    collections::BTreeMap,
    io,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use cloak_core::{
    ConnectionId, Ed25519Authenticator, Network, NetworkConfig, NetworkError, PeerWriter,
};
use cloak_proto::Frame;

use crate::{
    keys::keyring,
    model::{
        ModelEntry, ModelNodeId, Operation, OperationError, OperationResult, SIGNATURE_SIZE,
        node_id,
    },
};

/// One direction of a connection: bytes written but not yet delivered.
#[derive(Debug, Clone, Default)]
pub struct Pipe {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Pipe {
    fn push(&self, data: &[u8]) {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(data);
    }

    /// Remove and return up to `max` bytes from the front.
    fn take(&self, max: usize) -> Vec<u8> {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        let n = max.min(bytes.len());
        bytes.drain(..n).collect()
    }

    /// Bytes waiting in the pipe.
    pub fn len(&self) -> usize {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the pipe is drained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PeerWriter for Pipe {
    fn write(&mut self, frame: Bytes) -> io::Result<usize> {
        self.push(&frame);
        Ok(frame.len())
    }

    fn close(&mut self) {}
}

/// Full mesh of real networks connected by [`Pipe`]s.
pub struct Mesh {
    nodes: Vec<Network<Ed25519Authenticator, Pipe>>,
    /// Node `a`'s connection to `b`, keyed (a, b)
    conns: BTreeMap<(ModelNodeId, ModelNodeId), ConnectionId>,
    /// Bytes `a` wrote towards `b`, keyed (a, b)
    wires: BTreeMap<(ModelNodeId, ModelNodeId), Pipe>,
}

impl Mesh {
    /// `count` nodes with keys derived from `seed`, every pair connected.
    pub fn new(count: u8, seed: u64) -> Self {
        let nodes = keyring(seed, u32::from(count))
            .into_iter()
            .map(|authenticator| Network::new(authenticator, NetworkConfig::default()))
            .collect();

        let mut mesh = Self { nodes, conns: BTreeMap::new(), wires: BTreeMap::new() };
        for a in 0..count {
            for b in (a + 1)..count {
                let connected = mesh.connect(a, b);
                debug_assert!(connected.is_ok(), "fresh mesh failed to connect {a} and {b}");
            }
        }
        mesh
    }

    /// Network of `node`.
    pub fn node(&self, node: ModelNodeId) -> Option<&Network<Ed25519Authenticator, Pipe>> {
        self.nodes.get(usize::from(node))
    }

    /// Log of `node` in model terms.
    pub fn log(&self, node: ModelNodeId) -> Vec<ModelEntry> {
        let Some(network) = self.node(node) else { return Vec::new() };
        network
            .log()
            .iter()
            .map(|entry| ModelEntry {
                direction: entry.direction,
                peer: u8::try_from(entry.node_id.get().saturating_sub(1)).unwrap_or(u8::MAX),
                payload: entry.payload.to_vec(),
                valid: entry.valid,
            })
            .collect()
    }

    /// Messages waiting for `node` to read.
    pub fn pending_reads(&self, node: ModelNodeId) -> usize {
        self.node(node).map_or(0, Network::pending_reads)
    }

    /// Apply one operation. Indices must already be clamped.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        tracing::trace!(?op, "mesh apply");
        match *op {
            Operation::Send { from, to, message } => {
                match self.nodes[usize::from(from)].send(node_id(to), &message.to_bytes()) {
                    Ok(written) => OperationResult::Sent(written),
                    Err(e) => OperationResult::Error(classify(&e)),
                }
            },
            Operation::Broadcast { from, message } => {
                OperationResult::Broadcast(self.nodes[usize::from(from)].broadcast(&message.to_bytes()))
            },
            Operation::Forge { from, to, message } => {
                let Some(wire) = self.wires.get(&(from, to)) else {
                    return OperationResult::Error(OperationError::NodeUnknown);
                };
                let frame = Frame::new(message.to_bytes(), vec![0u8; SIGNATURE_SIZE]);
                match frame.to_bytes(&self.nodes[usize::from(from)].config().limits) {
                    Ok(bytes) => {
                        wire.push(&bytes);
                        OperationResult::Ok
                    },
                    Err(_) => OperationResult::Error(OperationError::Unexpected),
                }
            },
            Operation::Deliver { from, to, bytes } => {
                let (Some(&conn), Some(wire)) =
                    (self.conns.get(&(to, from)), self.wires.get(&(from, to)))
                else {
                    return OperationResult::Error(OperationError::NodeUnknown);
                };
                let chunk = wire.take(usize::from(bytes));
                match self.nodes[usize::from(to)].receive(conn, &chunk) {
                    Ok(events) => OperationResult::Events(events),
                    Err(e) => OperationResult::Error(classify(&e)),
                }
            },
            Operation::Read { node, from } => {
                let payload = self.nodes[usize::from(node)].read(node_id(from));
                OperationResult::Read(payload.map(|bytes| bytes.to_vec()))
            },
            Operation::ClearLog { node } => {
                self.nodes[usize::from(node)].clear_log();
                OperationResult::Ok
            },
            Operation::Disconnect { a, b } => self.disconnect(a, b),
            Operation::Connect { a, b } => self.connect(a, b),
        }
    }

    fn connect(&mut self, a: ModelNodeId, b: ModelNodeId) -> OperationResult {
        if a == b || self.conns.contains_key(&(a, b)) {
            return OperationResult::Error(OperationError::AlreadyConnected);
        }

        for (local, remote) in [(a, b), (b, a)] {
            let wire = Pipe::default();
            let network = &mut self.nodes[usize::from(local)];
            let conn = network.open_connection(wire.clone());
            if network.identify(conn, node_id(remote)).is_err() {
                return OperationResult::Error(OperationError::Unexpected);
            }
            self.conns.insert((local, remote), conn);
            self.wires.insert((local, remote), wire);
        }
        OperationResult::Ok
    }

    fn disconnect(&mut self, a: ModelNodeId, b: ModelNodeId) -> OperationResult {
        let Some(conn) = self.conns.remove(&(a, b)) else {
            return OperationResult::Error(OperationError::NodeUnknown);
        };
        self.nodes[usize::from(a)].close_connection(conn);
        if let Some(conn) = self.conns.remove(&(b, a)) {
            self.nodes[usize::from(b)].close_connection(conn);
        }
        self.wires.remove(&(a, b));
        self.wires.remove(&(b, a));
        OperationResult::Ok
    }
}

fn classify(error: &NetworkError) -> OperationError {
    match error {
        NetworkError::NodeUnknown(_) => OperationError::NodeUnknown,
        NetworkError::NodeAlreadyConnected(_) => OperationError::AlreadyConnected,
        _ => OperationError::Unexpected,
    }
}
