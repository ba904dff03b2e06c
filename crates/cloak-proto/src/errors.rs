//! Protocol error types.

use thiserror::Error;

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A length prefix decodes to a negative signed 32-bit value.
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    /// Payload length exceeds the configured maximum.
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge {
        /// Length announced by the prefix (or carried by the frame).
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Signature length exceeds the configured maximum.
    #[error("signature too large: {len} bytes (max {max})")]
    SignatureTooLarge {
        /// Length announced by the prefix (or carried by the frame).
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Reserving the buffer for a segment failed.
    #[error("cannot allocate {len} byte segment buffer")]
    AllocationFailed {
        /// Requested segment length.
        len: usize,
    },
}
