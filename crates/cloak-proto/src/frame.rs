//! Frame type and encoding.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    decoder::DecoderLimits,
    errors::{ProtocolError, Result},
};

/// One signed message as it travels on the wire.
///
/// The signature is opaque to this crate. Producing and checking it is the
/// job of the owning node's signing capability.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Application payload
    pub payload: Bytes,
    /// Signature over the payload (and session nonce)
    pub signature: Bytes,
}

impl Frame {
    /// Width of each length prefix in bytes.
    pub const LENGTH_PREFIX_SIZE: usize = 4;

    /// Create a frame from its two segments.
    pub fn new(payload: impl Into<Bytes>, signature: impl Into<Bytes>) -> Self {
        Self { payload: payload.into(), signature: signature.into() }
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        2 * Self::LENGTH_PREFIX_SIZE + self.payload.len() + self.signature.len()
    }

    /// Check both segments against `limits`.
    ///
    /// The sending side runs the same checks a peer's decoder will, so a
    /// frame we emit is never one we would reject ourselves.
    pub fn validate(&self, limits: &DecoderLimits) -> Result<()> {
        let max_payload = limits.payload_limit();
        if self.payload.len() > max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                len: self.payload.len(),
                max: max_payload,
            });
        }

        let max_signature = limits.signature_limit();
        if self.signature.len() > max_signature {
            return Err(ProtocolError::SignatureTooLarge {
                len: self.signature.len(),
                max: max_signature,
            });
        }

        Ok(())
    }

    /// Append the wire encoding of this frame to `dst`.
    pub fn encode(&self, limits: &DecoderLimits, dst: &mut BytesMut) -> Result<()> {
        self.validate(limits)?;

        dst.reserve(self.encoded_len());
        // validate() bounds both lengths by i32::MAX
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);
        dst.put_u32(self.signature.len() as u32);
        dst.put_slice(&self.signature);
        Ok(())
    }

    /// Encode this frame into a standalone buffer.
    pub fn to_bytes(&self, limits: &DecoderLimits) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(limits, &mut buf)?;
        Ok(buf.freeze())
    }
}
