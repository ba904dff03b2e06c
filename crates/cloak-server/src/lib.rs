//! Cloak node runtime.
//!
//! Drives the Sans-IO [`cloak_core::Network`] over real (or simulated)
//! streams. One task per connection reads bytes into the shared network
//! state and drains that connection's outbound queue; a listener task
//! accepts new connections while the node is listening.
//!
//! # Components
//!
//! - [`Node`]: lifecycle manager and public send/broadcast/read surface
//! - [`handshake`]: `NodeId`/nonce exchange run on every new connection
//! - [`TcpTransport`]: tokio TCP implementation of the transport traits
//! - [`NodeConfig`]: runtime configuration

pub mod config;
pub mod error;
pub mod handshake;
pub mod node;
pub mod peer;
pub mod tcp;

pub use config::NodeConfig;
pub use error::NodeError;
pub use node::Node;
pub use peer::PeerHandle;
pub use tcp::{TcpEndpoint, TcpTransport};
