//! Node configuration.

use std::time::Duration;

use cloak_core::{NetworkConfig, NodeId};

/// Runtime configuration for a [`crate::Node`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Our identity, announced in every handshake
    pub node_id: NodeId,
    /// Address the listening endpoint binds to
    pub listen_addr: String,
    /// Time allowed for a new connection to identify itself
    pub handshake_timeout: Duration,
    /// Capacity of the notification channel
    pub event_capacity: usize,
    /// Frames queued per connection before sends fail with `WouldBlock`
    pub write_queue_depth: usize,
    /// Size of each connection's read buffer
    pub read_buffer_size: usize,
    /// Framing limits
    pub network: NetworkConfig,
}

impl NodeConfig {
    /// Default configuration for `node_id` listening on `listen_addr`.
    pub fn new(node_id: NodeId, listen_addr: impl Into<String>) -> Self {
        Self { node_id, listen_addr: listen_addr.into(), ..Self::default() }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId(0),
            listen_addr: "0.0.0.0:7000".to_string(),
            handshake_timeout: Duration::from_secs(30),
            event_capacity: 1024,
            write_queue_depth: 256,
            read_buffer_size: 64 * 1024,
            network: NetworkConfig::default(),
        }
    }
}
