//! Cloak accountable transport core
//!
//! Turns raw, independently unreliable byte streams between protocol
//! participants into whole, signed, logged application messages, while
//! recording every send and receive attempt (forged or malformed ones
//! included) for later audit.
//!
//! # Architecture
//!
//! Everything in this crate is a synchronous state machine with no I/O of
//! its own. The runtime feeds it arrivals ([`Network::receive`]) and hands it
//! a non-blocking [`PeerWriter`] per connection; the state machine answers
//! with [`NetworkEvent`]s for the owning node to act on. This keeps the
//! ordering guarantees (per-connection arrival order, one global log order)
//! independent of how connections are scheduled.
//!
//! # Components
//!
//! - [`registry`]: live connections, `NodeId` ↔ connection mapping
//! - [`audit`]: append-only accountability log
//! - [`queue`]: FIFO of verified messages awaiting `read`
//! - [`network`]: send / broadcast / read / receive contract
//! - [`crypto`]: signing capability and its Ed25519 implementation
//! - [`transport`]: async stream abstraction used by runtimes
//! - [`error`]: error types

pub mod audit;
pub mod crypto;
pub mod error;
pub mod event;
pub mod network;
pub mod queue;
pub mod registry;
pub mod transport;
pub mod types;

pub use audit::{AccountabilityLog, Direction, LogEntry, LogSnapshot, LogStats};
pub use crypto::{Authenticator, Ed25519Authenticator};
pub use error::{NetworkError, Result};
pub use event::NetworkEvent;
pub use network::{Network, NetworkConfig};
pub use queue::ReadyQueue;
pub use registry::{Connection, ConnectionRegistry, ConnectionState, PeerWriter};
pub use types::{ConnectionId, NodeId};
