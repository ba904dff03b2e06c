//! Wire format for the Cloak accountable transport.
//!
//! Every message on a connection is one frame: a length-prefixed payload
//! followed by a length-prefixed signature.
//!
//! ```text
//! ┌──────────────┬───────────────┬──────────────┬─────────────────┐
//! │ N: u32 (BE)  │ payload [N]   │ M: u32 (BE)  │ signature [M]   │
//! └──────────────┴───────────────┴──────────────┴─────────────────┘
//! ```
//!
//! Streams deliver frames in arbitrary fragments, so the receive side is a
//! streaming state machine ([`FrameDecoder`]) that reassembles whole frames
//! one arrival at a time.
//!
//! # Security
//!
//! Length prefixes come from untrusted peers. Both segments are bounded by
//! [`DecoderLimits`] (16 MiB payload, 4 KiB signature by default) and the
//! decoder reserves segment memory fallibly, so a hostile prefix cannot
//! abort the process.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod decoder;
pub mod errors;
#[cfg(feature = "fault-injection")]
pub mod fault;
pub mod frame;

pub use decoder::{BufferState, Decoded, DecoderLimits, FrameDecoder};
pub use errors::{ProtocolError, Result};
pub use frame::Frame;
