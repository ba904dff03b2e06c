//! Network state machine.
//!
//! The only surface the owning protocol node uses: [`Network::send`],
//! [`Network::broadcast`], [`Network::read`], [`Network::clear_log`] and
//! [`Network::log`]. Runtimes drive the receive side through
//! [`Network::receive`] and the connection lifecycle through
//! [`Network::open_connection`], [`Network::identify`],
//! [`Network::close_connection`] and [`Network::close_all`].
//!
//! # Data flow
//!
//! ```text
//! inbound:  bytes ─> FrameDecoder ─> verify ─> log.append ─┬─> ReadyQueue ─> read()
//!                                                         └─ (invalid: log only)
//! outbound: send() ─> sign ─> encode ─> PeerWriter ─> log.append
//! ```
//!
//! All methods are synchronous and touch only in-memory state plus a
//! non-blocking writer, so a single owner (or a mutex around this struct)
//! yields one consistent global order for the log and the queue.

use bytes::Bytes;
use cloak_proto::{Decoded, DecoderLimits, Frame};

use crate::{
    audit::{AccountabilityLog, LogEntry, LogSnapshot, LogStats},
    crypto::Authenticator,
    error::{NetworkError, Result},
    event::NetworkEvent,
    queue::ReadyQueue,
    registry::{ConnectionRegistry, ConnectionState, PeerWriter},
    types::{ConnectionId, NodeId},
};

/// Network configuration
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    /// Frame size limits, applied to inbound prefixes and outbound frames
    pub limits: DecoderLimits,
}

/// Accountable transport state: connections, log, and ready queue.
#[derive(Debug)]
pub struct Network<A, W> {
    authenticator: A,
    config: NetworkConfig,
    /// Session nonce bound into every signature
    nonce: i32,
    registry: ConnectionRegistry<W>,
    log: AccountabilityLog,
    ready: ReadyQueue,
}

impl<A: Authenticator, W: PeerWriter> Network<A, W> {
    /// Create a network with no connections and an empty log.
    pub fn new(authenticator: A, config: NetworkConfig) -> Self {
        Self {
            authenticator,
            config,
            nonce: 0,
            registry: ConnectionRegistry::new(),
            log: AccountabilityLog::new(),
            ready: ReadyQueue::new(),
        }
    }

    /// Set the session nonce used for signing and verification.
    pub fn set_nonce(&mut self, nonce: i32) {
        if nonce != self.nonce {
            tracing::debug!(old = self.nonce, new = nonce, "session nonce changed");
        }
        self.nonce = nonce;
    }

    /// Current session nonce.
    pub fn nonce(&self) -> i32 {
        self.nonce
    }

    /// Configuration in effect.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Connection table.
    pub fn registry(&self) -> &ConnectionRegistry<W> {
        &self.registry
    }

    /// Start managing a freshly accepted or dialed connection.
    pub fn open_connection(&mut self, writer: W) -> ConnectionId {
        let id = self.registry.open(writer, self.config.limits);
        tracing::debug!(conn = %id, "connection pending handshake");
        id
    }

    /// Record the handshake result for a pending connection.
    ///
    /// # Errors
    ///
    /// `NodeAlreadyConnected` if another live connection is identified as
    /// `node`; `ConnectionUnknown` if `conn` is not managed.
    pub fn identify(&mut self, conn: ConnectionId, node: NodeId) -> Result<Vec<NetworkEvent>> {
        self.registry.identify(conn, node)?;
        tracing::info!(conn = %conn, node_id = %node, "connection identified");
        Ok(vec![NetworkEvent::Connected(node)])
    }

    /// Stop managing one connection (disconnect detected or handshake
    /// failed). Its partial frame, if any, is discarded.
    pub fn close_connection(&mut self, conn: ConnectionId) -> Vec<NetworkEvent> {
        let Some(connection) = self.registry.remove(conn) else {
            return Vec::new();
        };

        match connection.node_id() {
            Some(node) => {
                tracing::info!(conn = %conn, node_id = %node, "connection closed");
                vec![NetworkEvent::Disconnected(node)]
            },
            None => {
                tracing::debug!(conn = %conn, "pending connection closed");
                Vec::new()
            },
        }
    }

    /// Close every connection, pending or identified.
    ///
    /// The log and the ready queue are left untouched.
    pub fn close_all(&mut self) -> Vec<NetworkEvent> {
        let closed = self.registry.drain();
        tracing::info!(identified = closed.len(), "all connections closed");
        closed.into_iter().map(NetworkEvent::Disconnected).collect()
    }

    /// Feed bytes that arrived on `conn`.
    ///
    /// Every completed frame is verified and appended to the log; valid ones
    /// are queued for [`Self::read`] and announced with `ReadyRead`. Framing
    /// violations and failed verifications produce `InputError`.
    ///
    /// # Errors
    ///
    /// `ConnectionUnknown` / `NotIdentified` for bytes on a connection that
    /// cannot carry frames, and the fatal `ResourceExhausted` if a segment
    /// buffer cannot be allocated. Frames completed before the allocation
    /// failure are still processed.
    pub fn receive(&mut self, conn: ConnectionId, data: &[u8]) -> Result<Vec<NetworkEvent>> {
        let connection =
            self.registry.get_mut(conn).ok_or(NetworkError::ConnectionUnknown(conn))?;
        let ConnectionState::Identified(node) = connection.state() else {
            return Err(NetworkError::NotIdentified(conn));
        };

        let mut decoded = Vec::new();
        let outcome = connection.decoder_mut().decode_into(data, &mut decoded);

        let mut events = Vec::with_capacity(decoded.len());
        for item in decoded {
            events.push(match item {
                Decoded::Frame(frame) => self.accept_frame(node, frame),
                Decoded::Violation(violation) => {
                    tracing::warn!(node_id = %node, error = %violation, "framing violation, message dropped");
                    NetworkEvent::InputError(node)
                },
            });
        }

        if let Err(e) = outcome {
            tracing::error!(node_id = %node, error = %e, "cannot buffer inbound frame");
            return Err(NetworkError::ResourceExhausted(e));
        }

        Ok(events)
    }

    fn accept_frame(&mut self, node: NodeId, frame: Frame) -> NetworkEvent {
        let valid =
            self.authenticator.verify(node, self.nonce, &frame.payload, &frame.signature);
        let len = frame.payload.len();
        let index = self.log.append(LogEntry::received(node, frame, valid));

        if valid {
            self.ready.push(index);
            tracing::debug!(node_id = %node, index, len, "frame received");
            NetworkEvent::ReadyRead(node)
        } else {
            tracing::warn!(node_id = %node, index, len, "signature verification failed");
            NetworkEvent::InputError(node)
        }
    }

    /// Sign and send `data` to `node`.
    ///
    /// Returns the number of bytes handed to the socket. The attempt is
    /// logged whether or not the write succeeds.
    ///
    /// # Errors
    ///
    /// `NodeUnknown` if `node` has no identified connection (nothing is
    /// logged), `Protocol` if the frame exceeds the configured limits
    /// (nothing is logged), `Io` if the write fails (logged with the error).
    pub fn send(&mut self, node: NodeId, data: &[u8]) -> Result<usize> {
        self.send_payload(node, Bytes::copy_from_slice(data))
    }

    /// Send `data` to every identified node.
    ///
    /// Individual failures are logged by each send and do not stop the
    /// broadcast. Returns the number of successful sends.
    pub fn broadcast(&mut self, data: &[u8]) -> usize {
        let payload = Bytes::copy_from_slice(data);
        let nodes: Vec<NodeId> = self.registry.identified().collect();

        let delivered = nodes
            .iter()
            .filter(|&&node| match self.send_payload(node, payload.clone()) {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!(node_id = %node, error = %e, "broadcast send failed");
                    false
                },
            })
            .count();

        tracing::debug!(peers = nodes.len(), delivered, "broadcast complete");
        delivered
    }

    fn send_payload(&mut self, node: NodeId, payload: Bytes) -> Result<usize> {
        if self.registry.connection_for(node).is_none() {
            return Err(NetworkError::NodeUnknown(node));
        }

        let signature = self.authenticator.sign(self.nonce, &payload);
        let frame = Frame::new(payload, signature);
        let wire = frame.to_bytes(&self.config.limits)?;

        let connection = self.registry.by_node_mut(node).ok_or(NetworkError::NodeUnknown(node))?;
        match connection.writer_mut().write(wire) {
            Ok(written) => {
                let index = self.log.append(LogEntry::sent(node, frame));
                tracing::debug!(node_id = %node, index, written, "frame sent");
                Ok(written)
            },
            Err(e) => {
                let index = self.log.append(LogEntry::send_failed(node, frame, &e));
                tracing::warn!(node_id = %node, index, error = %e, "frame write failed");
                Err(NetworkError::Io(e))
            },
        }
    }

    /// Take the oldest undelivered message from `node`.
    ///
    /// Returns `None` when nothing from `node` is waiting; callers wait for
    /// the next `ReadyRead(node)` instead of blocking.
    pub fn read(&mut self, node: NodeId) -> Option<Bytes> {
        let log = &self.log;
        let index = self
            .ready
            .take_first(|index| log.get(index).is_some_and(|entry| entry.node_id == node))?;
        self.log.get(index).map(|entry| entry.payload.clone())
    }

    /// Number of messages waiting across all nodes.
    pub fn pending_reads(&self) -> usize {
        self.ready.len()
    }

    /// Snapshot of the accountability log.
    pub fn log(&self) -> LogSnapshot {
        self.log.snapshot()
    }

    /// Number of log entries.
    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Counters over the current log.
    pub fn log_stats(&self) -> LogStats {
        self.log.stats()
    }

    /// Clear the log and, with it, every undelivered message.
    pub fn clear_log(&mut self) {
        tracing::debug!(entries = self.log.len(), undelivered = self.ready.len(), "log cleared");
        self.log.clear();
        self.ready.clear();
    }

    /// Identified nodes in `NodeId` order.
    pub fn identified_nodes(&self) -> Vec<NodeId> {
        self.registry.identified().collect()
    }

    /// Whether `node` has an identified connection.
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.registry.connection_for(node).is_some()
    }

    /// Handshake status of `conn`, if managed.
    pub fn connection_state(&self, conn: ConnectionId) -> Option<ConnectionState> {
        self.registry.get(conn).map(|connection| connection.state())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use cloak_proto::BufferState;

    use super::*;
    use crate::audit::Direction;

    /// Signs with the nonce and payload length; verifies by recomputing.
    #[derive(Debug, Default)]
    struct TestAuth;

    impl Authenticator for TestAuth {
        fn sign(&self, nonce: i32, payload: &[u8]) -> Vec<u8> {
            let mut sig = nonce.to_be_bytes().to_vec();
            sig.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            sig
        }

        fn verify(&self, _from: NodeId, nonce: i32, payload: &[u8], signature: &[u8]) -> bool {
            self.sign(nonce, payload) == signature
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Wire {
        frames: Arc<Mutex<Vec<Bytes>>>,
        broken: bool,
    }

    impl Wire {
        fn broken() -> Self {
            Self { broken: true, ..Self::default() }
        }

        fn sent(&self) -> Vec<Bytes> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl PeerWriter for Wire {
        fn write(&mut self, frame: Bytes) -> io::Result<usize> {
            if self.broken {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            let len = frame.len();
            self.frames.lock().unwrap().push(frame);
            Ok(len)
        }

        fn close(&mut self) {}
    }

    fn network() -> Network<TestAuth, Wire> {
        Network::new(TestAuth, NetworkConfig::default())
    }

    fn connect(net: &mut Network<TestAuth, Wire>, node: u32, wire: Wire) -> ConnectionId {
        let conn = net.open_connection(wire);
        net.identify(conn, NodeId(node)).unwrap();
        conn
    }

    fn signed_frame(nonce: i32, payload: &[u8]) -> Vec<u8> {
        Frame::new(payload.to_vec(), TestAuth.sign(nonce, payload))
            .to_bytes(&DecoderLimits::default())
            .unwrap()
            .to_vec()
    }

    #[test]
    fn send_to_unknown_node_logs_nothing() {
        let mut net = network();
        let result = net.send(NodeId(9), b"hello");

        assert!(matches!(result, Err(NetworkError::NodeUnknown(NodeId(9)))));
        assert_eq!(net.log_len(), 0);
    }

    #[test]
    fn send_frames_signs_and_logs() {
        let mut net = network();
        net.set_nonce(42);
        let wire = Wire::default();
        connect(&mut net, 1, wire.clone());

        let written = net.send(NodeId(1), b"hello").unwrap();

        let frames = wire.sent();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], Bytes::from(signed_frame(42, b"hello")));
        assert_eq!(written, frames[0].len());

        let log = net.log();
        assert_eq!(log.len(), 1);
        let entry = &log.as_slice()[0];
        assert_eq!(entry.direction, Direction::Send);
        assert_eq!(entry.node_id, NodeId(1));
        assert_eq!(entry.payload, Bytes::from_static(b"hello"));
        assert_eq!(entry.signature, Bytes::from(TestAuth.sign(42, b"hello")));
        assert!(entry.valid);
        assert_eq!(entry.write_error, None);
    }

    #[test]
    fn failed_write_is_logged_and_reported() {
        let mut net = network();
        connect(&mut net, 1, Wire::broken());

        let result = net.send(NodeId(1), b"lost");
        assert!(matches!(result, Err(NetworkError::Io(_))));

        let log = net.log();
        assert_eq!(log.len(), 1);
        assert!(log.as_slice()[0].is_failed_send());
        // The connection stays until the lifecycle manager reaps it
        assert!(net.is_connected(NodeId(1)));
    }

    #[test]
    fn oversized_send_is_rejected_before_writing() {
        let mut net = Network::new(
            TestAuth,
            NetworkConfig { limits: DecoderLimits::new(4, 64) },
        );
        let wire = Wire::default();
        connect(&mut net, 1, wire.clone());

        let result = net.send(NodeId(1), b"too long");
        assert!(matches!(result, Err(NetworkError::Protocol(_))));
        assert!(wire.sent().is_empty());
        assert_eq!(net.log_len(), 0);
    }

    #[test]
    fn broadcast_counts_successes_and_logs_every_attempt() {
        let mut net = network();
        connect(&mut net, 1, Wire::default());
        connect(&mut net, 2, Wire::broken());
        connect(&mut net, 3, Wire::default());
        // Pending connections are not broadcast targets
        net.open_connection(Wire::default());

        let delivered = net.broadcast(b"to all");

        assert_eq!(delivered, 2);
        let log = net.log();
        assert_eq!(log.len(), 3);
        let nodes: Vec<_> = log.iter().map(|e| e.node_id).collect();
        assert_eq!(nodes, vec![NodeId(1), NodeId(2), NodeId(3)]);
        assert_eq!(log.iter().filter(|e| e.is_failed_send()).count(), 1);
    }

    #[test]
    fn receive_valid_frame_then_read() {
        let mut net = network();
        let conn = connect(&mut net, 5, Wire::default());

        let events = net.receive(conn, &signed_frame(0, b"payload")).unwrap();
        assert_eq!(events, vec![NetworkEvent::ReadyRead(NodeId(5))]);

        assert_eq!(net.read(NodeId(5)), Some(Bytes::from_static(b"payload")));
        assert_eq!(net.read(NodeId(5)), None);

        let log = net.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log.as_slice()[0].direction, Direction::Recv);
        assert!(log.as_slice()[0].valid);
    }

    #[test]
    fn forged_frame_is_logged_but_never_readable() {
        let mut net = network();
        let conn = connect(&mut net, 5, Wire::default());

        let forged = Frame::new(&b"forged"[..], &b"bogus"[..])
            .to_bytes(&DecoderLimits::default())
            .unwrap();
        let events = net.receive(conn, &forged).unwrap();

        assert_eq!(events, vec![NetworkEvent::InputError(NodeId(5))]);
        assert_eq!(net.read(NodeId(5)), None);
        assert_eq!(net.pending_reads(), 0);

        let log = net.log();
        assert_eq!(log.len(), 1);
        assert!(!log.as_slice()[0].valid);
    }

    #[test]
    fn frame_signed_under_other_nonce_is_invalid() {
        let mut net = network();
        net.set_nonce(2);
        let conn = connect(&mut net, 5, Wire::default());

        let events = net.receive(conn, &signed_frame(1, b"replayed")).unwrap();
        assert_eq!(events, vec![NetworkEvent::InputError(NodeId(5))]);
        assert_eq!(net.log_stats().received_invalid, 1);
    }

    #[test]
    fn framing_violation_logs_nothing_and_resets() {
        let mut net = Network::new(
            TestAuth,
            NetworkConfig { limits: DecoderLimits::new(16, 16) },
        );
        let conn = connect(&mut net, 5, Wire::default());

        let events = net.receive(conn, &1000u32.to_be_bytes()).unwrap();
        assert_eq!(events, vec![NetworkEvent::InputError(NodeId(5))]);
        assert_eq!(net.log_len(), 0);
        let buffer = net.registry().get(conn).map(|c| c.buffer_state());
        assert_eq!(buffer, Some(BufferState::Idle));

        // The next well-formed frame is accepted
        let events = net.receive(conn, &signed_frame(0, b"ok")).unwrap();
        assert_eq!(events, vec![NetworkEvent::ReadyRead(NodeId(5))]);
    }

    #[test]
    fn bytes_before_identification_are_rejected() {
        let mut net = network();
        let conn = net.open_connection(Wire::default());

        let result = net.receive(conn, b"early");
        assert!(matches!(result, Err(NetworkError::NotIdentified(_))));

        let result = net.receive(ConnectionId(99), b"nobody");
        assert!(matches!(result, Err(NetworkError::ConnectionUnknown(ConnectionId(99)))));
    }

    #[test]
    fn read_is_fifo_across_nodes() {
        let mut net = network();
        let a = connect(&mut net, 1, Wire::default());
        let b = connect(&mut net, 2, Wire::default());

        net.receive(a, &signed_frame(0, b"a1")).unwrap();
        net.receive(b, &signed_frame(0, b"b1")).unwrap();
        net.receive(a, &signed_frame(0, b"a2")).unwrap();

        // Polling B first does not disturb A's order
        assert_eq!(net.read(NodeId(2)), Some(Bytes::from_static(b"b1")));
        assert_eq!(net.read(NodeId(1)), Some(Bytes::from_static(b"a1")));
        assert_eq!(net.read(NodeId(1)), Some(Bytes::from_static(b"a2")));
        assert_eq!(net.read(NodeId(2)), None);
    }

    #[test]
    fn interleaved_partial_frames_complete_independently() {
        let mut net = network();
        let a = connect(&mut net, 1, Wire::default());
        let b = connect(&mut net, 2, Wire::default());
        let fa = signed_frame(0, b"from a");
        let fb = signed_frame(0, b"from b");

        assert!(net.receive(a, &fa[..5]).unwrap().is_empty());
        assert!(net.receive(b, &fb[..9]).unwrap().is_empty());
        assert_eq!(net.receive(b, &fb[9..]).unwrap(), vec![NetworkEvent::ReadyRead(NodeId(2))]);
        assert_eq!(net.receive(a, &fa[5..]).unwrap(), vec![NetworkEvent::ReadyRead(NodeId(1))]);

        // B completed first, so it is first in the log
        let nodes: Vec<_> = net.log().iter().map(|e| e.node_id).collect();
        assert_eq!(nodes, vec![NodeId(2), NodeId(1)]);
    }

    #[test]
    fn clear_log_drops_undelivered_messages() {
        let mut net = network();
        let conn = connect(&mut net, 1, Wire::default());
        net.receive(conn, &signed_frame(0, b"stale")).unwrap();

        net.clear_log();
        assert_eq!(net.log_len(), 0);
        assert_eq!(net.read(NodeId(1)), None);

        // Indices restart cleanly after a clear
        net.receive(conn, &signed_frame(0, b"fresh")).unwrap();
        assert_eq!(net.read(NodeId(1)), Some(Bytes::from_static(b"fresh")));
    }

    #[test]
    fn close_all_keeps_log_and_forgets_nodes() {
        let mut net = network();
        let conn = connect(&mut net, 1, Wire::default());
        connect(&mut net, 2, Wire::default());
        net.open_connection(Wire::default());
        net.send(NodeId(2), b"x").unwrap();
        net.receive(conn, &signed_frame(0, b"y")).unwrap();
        let before = net.log();

        let events = net.close_all();

        assert_eq!(
            events,
            vec![NetworkEvent::Disconnected(NodeId(1)), NetworkEvent::Disconnected(NodeId(2))]
        );
        assert_eq!(net.log(), before);
        assert!(matches!(net.send(NodeId(1), b"z"), Err(NetworkError::NodeUnknown(_))));
        assert!(net.registry().is_empty());
    }

    #[test]
    fn close_connection_reports_disconnect_once() {
        let mut net = network();
        let conn = connect(&mut net, 4, Wire::default());
        let pending = net.open_connection(Wire::default());

        assert_eq!(net.close_connection(conn), vec![NetworkEvent::Disconnected(NodeId(4))]);
        assert!(net.close_connection(conn).is_empty());
        assert!(net.close_connection(pending).is_empty());
        assert!(!net.is_connected(NodeId(4)));
    }

    #[test]
    fn node_can_reconnect_after_close() {
        let mut net = network();
        let first = connect(&mut net, 4, Wire::default());
        net.close_connection(first);

        let second = net.open_connection(Wire::default());
        assert_eq!(net.identify(second, NodeId(4)).unwrap(), vec![NetworkEvent::Connected(NodeId(4))]);
        assert_eq!(net.connection_state(second), Some(ConnectionState::Identified(NodeId(4))));
    }
}
