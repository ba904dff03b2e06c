//! Deterministic simulation harness for Cloak.
//!
//! Turmoil-based implementation of the transport traits, seeded key
//! material, and a reference model of the accountable network used by the
//! model-based tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod keys;
pub mod mesh;
pub mod model;
pub mod sim_transport;

pub use keys::keyring;
pub use mesh::Mesh;
pub use model::{ModelEntry, ModelWorld, Operation, OperationError, OperationResult, SmallMessage};
pub use sim_transport::{SimEndpoint, SimTransport};
