//! Lifecycle manager and public node surface.
//!
//! A [`Node`] owns the shared [`Network`] state behind a mutex and drives it
//! from tokio tasks:
//!
//! ```text
//!                 ┌──────────────┐
//!  start_incoming │ accept task  │──┐
//!                 └──────────────┘  │ adopt(stream)
//!  connect(addr) ───────────────────┤
//!                                   ↓
//!                 ┌───────────────────────────────────┐
//!                 │ connection task (one per stream)  │
//!                 │  hello → identify → read/write    │
//!                 └───────────────────────────────────┘
//!                        │ receive()       ↑ PeerHandle queue
//!                        ↓                 │
//!                 ┌───────────────────────────────────┐
//!                 │ Mutex<Network>  (log, queue, reg) │<── send / broadcast / read
//!                 └───────────────────────────────────┘
//!                        │ NetworkEvent
//!                        ↓
//!                 mpsc::Receiver returned by Node::new
//! ```
//!
//! The mutex is never held across an `.await`, so every mutation of the log
//! and ready queue happens in one global order.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use cloak_core::{
    Authenticator, ConnectionId, LogSnapshot, Network, NetworkError, NetworkEvent, NodeId,
    transport::{Listener, Transport},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    config::NodeConfig,
    error::NodeError,
    handshake::{self, Hello},
    peer::{PeerChannels, PeerHandle},
};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type Identified = oneshot::Sender<Result<NodeId, NodeError>>;

/// A participant in the accountable network.
///
/// Cheap to clone; clones share the same connections and log.
pub struct Node<T: Transport, A> {
    shared: Arc<Shared<T, A>>,
}

impl<T: Transport, A> Clone for Node<T, A> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

struct Shared<T: Transport, A> {
    transport: T,
    config: NodeConfig,
    network: Mutex<Network<A, PeerHandle>>,
    events: mpsc::Sender<NetworkEvent>,
    listener: Mutex<Option<ListenerTask>>,
}

struct ListenerTask {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl<T, A> Node<T, A>
where
    T: Transport,
    A: Authenticator + 'static,
{
    /// Create a stopped node.
    ///
    /// Returns the node and the receiver for its notifications
    /// (`ReadyRead`, `InputError`, `Connected`, `Disconnected`).
    pub fn new(
        transport: T,
        authenticator: A,
        config: NodeConfig,
    ) -> (Self, mpsc::Receiver<NetworkEvent>) {
        let (events, rx) = mpsc::channel(config.event_capacity.max(1));
        let network = Network::new(authenticator, config.network.clone());

        let shared = Shared {
            transport,
            config,
            network: Mutex::new(network),
            events,
            listener: Mutex::new(None),
        };
        (Self { shared: Arc::new(shared) }, rx)
    }

    /// Our identity.
    pub fn node_id(&self) -> NodeId {
        self.shared.config.node_id
    }

    /// Open the listening endpoint and start accepting connections.
    ///
    /// Returns the bound address (useful when listening on port 0).
    ///
    /// # Errors
    ///
    /// `AlreadyListening` if the endpoint is open, `Io` if binding fails.
    pub async fn start_incoming(&self) -> Result<SocketAddr, NodeError> {
        if let Some(addr) = self.local_addr() {
            return Err(NodeError::AlreadyListening(addr));
        }

        let listener = self.shared.transport.bind(&self.shared.config.listen_addr).await?;
        let addr = listener.local_addr()?;

        {
            let mut slot = self.shared.listener_slot();
            if let Some(existing) = slot.as_ref() {
                return Err(NodeError::AlreadyListening(existing.addr));
            }
            let task = tokio::spawn(accept_loop(Arc::clone(&self.shared), listener));
            *slot = Some(ListenerTask { addr, task });
        }

        tracing::info!(node_id = %self.node_id(), %addr, "listening");
        Ok(addr)
    }

    /// Close the listening endpoint and every managed connection.
    ///
    /// Partial frames are discarded. The accountability log and messages
    /// already waiting for [`Self::read`] are kept. `Disconnected` events are
    /// dropped rather than awaited if the event channel is full.
    pub async fn stop_incoming(&self) {
        let listener = self.shared.listener_slot().take();
        if let Some(ListenerTask { addr, task }) = listener {
            task.abort();
            // A completed accept still adopts its stream before cancellation
            let _ = task.await;
            tracing::info!(node_id = %self.node_id(), %addr, "stopped listening");
        }

        let events = self.shared.network().close_all();
        self.shared.emit_now(events);
    }

    /// Whether the listening endpoint is open.
    pub fn is_listening(&self) -> bool {
        self.shared.listener_slot().is_some()
    }

    /// Address of the listening endpoint, if open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.listener_slot().as_ref().map(|listener| listener.addr)
    }

    /// Dial `addr` and wait until the connection is identified.
    ///
    /// # Errors
    ///
    /// `Io` if the dial fails, the handshake errors if the peer is not
    /// acceptable, `Network(NodeAlreadyConnected)` if we already hold a
    /// connection to that node, and `Stopped` if `stop_incoming` tears the
    /// connection down first.
    pub async fn connect(&self, addr: &str) -> Result<NodeId, NodeError> {
        let stream = self.shared.transport.connect(addr).await?;
        let (identified, rx) = oneshot::channel();
        Shared::adopt(&self.shared, stream, Some(identified));

        rx.await.map_err(|_| NodeError::Stopped)?
    }

    /// Sign and send `data` to `node`. See [`Network::send`].
    pub fn send(&self, node: NodeId, data: &[u8]) -> Result<usize, NetworkError> {
        self.shared.network().send(node, data)
    }

    /// Send `data` to every identified node. See [`Network::broadcast`].
    pub fn broadcast(&self, data: &[u8]) -> usize {
        self.shared.network().broadcast(data)
    }

    /// Take the oldest undelivered message from `node`.
    pub fn read(&self, node: NodeId) -> Option<Bytes> {
        self.shared.network().read(node)
    }

    /// Clear the accountability log and every undelivered message.
    pub fn clear_log(&self) {
        self.shared.network().clear_log();
    }

    /// Snapshot of the accountability log.
    pub fn log(&self) -> LogSnapshot {
        self.shared.network().log()
    }

    /// Set the session nonce for signing, verification and new handshakes.
    pub fn set_nonce(&self, nonce: i32) {
        self.shared.network().set_nonce(nonce);
    }

    /// Identified nodes in `NodeId` order.
    pub fn identified_nodes(&self) -> Vec<NodeId> {
        self.shared.network().identified_nodes()
    }

    /// Number of managed connections, pending handshakes included.
    pub fn connection_count(&self) -> usize {
        self.shared.network().registry().len()
    }
}

impl<T: Transport, A: Authenticator + 'static> Shared<T, A> {
    fn network(&self) -> MutexGuard<'_, Network<A, PeerHandle>> {
        self.network.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener_slot(&self) -> MutexGuard<'_, Option<ListenerTask>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn emit(&self, events: Vec<NetworkEvent>) {
        for event in events {
            if self.events.send(event).await.is_err() {
                tracing::debug!(?event, "event receiver dropped");
                return;
            }
        }
    }

    fn emit_now(&self, events: Vec<NetworkEvent>) {
        for event in events {
            match self.events.try_send(event) {
                Ok(()) => {},
                Err(mpsc::error::TrySendError::Full(event)) => {
                    tracing::warn!(?event, "event channel full, event dropped");
                },
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }

    /// Register a fresh stream and spawn its connection task.
    fn adopt(shared: &Arc<Self>, stream: T::Stream, identified: Option<Identified>) {
        let (handle, channels) = PeerHandle::channel(shared.config.write_queue_depth);
        let conn = shared.network().open_connection(handle);
        tokio::spawn(run_connection(Arc::clone(shared), conn, stream, channels, identified));
    }
}

async fn accept_loop<T, A>(shared: Arc<Shared<T, A>>, mut listener: T::Listener)
where
    T: Transport,
    A: Authenticator + 'static,
{
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "connection accepted");
                Shared::adopt(&shared, stream, None);
            },
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            },
        }
    }
}

async fn run_connection<T, A>(
    shared: Arc<Shared<T, A>>,
    conn: ConnectionId,
    mut stream: T::Stream,
    channels: PeerChannels,
    identified: Option<Identified>,
) where
    T: Transport,
    A: Authenticator + 'static,
{
    let PeerChannels { mut outbound, mut shutdown } = channels;

    let ours = Hello { node_id: shared.config.node_id, nonce: shared.network().nonce() };
    let handshake = tokio::select! {
        result = handshake::exchange(&mut stream, ours, shared.config.handshake_timeout) => result,
        _ = &mut shutdown => Err(NodeError::Stopped),
    };

    let identify = handshake.and_then(|node| {
        let events = shared.network().identify(conn, node)?;
        Ok((node, events))
    });

    let node = match identify {
        Ok((node, events)) => {
            if let Some(tx) = identified {
                let _ = tx.send(Ok(node));
            }
            shared.emit(events).await;
            node
        },
        Err(e) => {
            tracing::warn!(conn = %conn, error = %e, "handshake failed");
            shared.network().close_connection(conn);
            if let Some(tx) = identified {
                let _ = tx.send(Err(e));
            }
            return;
        },
    };

    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = vec![0u8; shared.config.read_buffer_size.max(1)];

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                // Already removed by close_all / close_connection
                return;
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(node_id = %node, "peer closed stream");
                    break;
                },
                Ok(n) => {
                    let received = shared.network().receive(conn, &buf[..n]);
                    match received {
                        Ok(events) => shared.emit(events).await,
                        Err(e) if e.is_fatal() => {
                            tracing::error!(node_id = %node, error = %e, "unrecoverable, dropping connection");
                            shared.emit(vec![NetworkEvent::Fatal(node)]).await;
                            break;
                        },
                        Err(e) => {
                            tracing::warn!(node_id = %node, error = %e, "dropping connection");
                            break;
                        },
                    }
                },
                Err(e) => {
                    tracing::warn!(node_id = %node, error = %e, "read failed");
                    break;
                },
            },
            Some(frame) = outbound.recv() => {
                if let Err(e) = writer.write_all(&frame).await {
                    tracing::warn!(node_id = %node, error = %e, "write failed");
                    break;
                }
            },
        }
    }

    let events = shared.network().close_connection(conn);
    shared.emit(events).await;
}
