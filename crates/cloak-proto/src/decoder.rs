//! Streaming frame decoder.
//!
//! One decoder per connection. Bytes are fed in whatever fragments the
//! transport delivers them; whole frames come out once their last signature
//! byte arrives.
//!
//! # State Machine
//!
//! ```text
//!             payload prefix              body complete
//! ┌──────┐  (N > 0)  ┌─────────────────┐  (or N == 0)  ┌──────────────────────┐
//! │ Idle │──────────>│ CollectingBody  │──────────────>│ CollectingSignature  │
//! └──────┘           └─────────────────┘               └──────────────────────┘
//!    ^                                                            │
//!    └────────────────── signature complete (frame out) ──────────┘
//! ```
//!
//! A phase only advances when exactly its expected byte count has arrived.
//! A bad length prefix discards the partial message and the remainder of the
//! chunk it arrived in, then returns to [`BufferState::Idle`].

use crate::{
    errors::{ProtocolError, Result},
    frame::Frame,
};

/// Size limits applied to both length prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderLimits {
    /// Largest accepted payload segment in bytes
    pub max_payload_size: u32,
    /// Largest accepted signature segment in bytes
    pub max_signature_size: u32,
}

impl DecoderLimits {
    /// Hard ceiling for either segment: the largest non-negative `i32`.
    pub const MAX_SEGMENT_SIZE: u32 = i32::MAX as u32;

    /// Default payload limit (16 MiB).
    pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

    /// Default signature limit (4 KiB).
    pub const DEFAULT_MAX_SIGNATURE_SIZE: u32 = 4 * 1024;

    /// Create limits, clamping both values to [`Self::MAX_SEGMENT_SIZE`].
    pub fn new(max_payload_size: u32, max_signature_size: u32) -> Self {
        Self {
            max_payload_size: max_payload_size.min(Self::MAX_SEGMENT_SIZE),
            max_signature_size: max_signature_size.min(Self::MAX_SEGMENT_SIZE),
        }
    }

    /// Effective payload limit.
    pub fn payload_limit(&self) -> usize {
        self.max_payload_size.min(Self::MAX_SEGMENT_SIZE) as usize
    }

    /// Effective signature limit.
    pub fn signature_limit(&self) -> usize {
        self.max_signature_size.min(Self::MAX_SEGMENT_SIZE) as usize
    }

    fn check_payload(&self, raw: u32) -> Result<usize> {
        let len = check_sign(raw)?;
        let max = self.payload_limit();
        if len > max {
            return Err(ProtocolError::PayloadTooLarge { len, max });
        }
        Ok(len)
    }

    fn check_signature(&self, raw: u32) -> Result<usize> {
        let len = check_sign(raw)?;
        let max = self.signature_limit();
        if len > max {
            return Err(ProtocolError::SignatureTooLarge { len, max });
        }
        Ok(len)
    }
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_PAYLOAD_SIZE, Self::DEFAULT_MAX_SIGNATURE_SIZE)
    }
}

fn check_sign(raw: u32) -> Result<usize> {
    if raw > DecoderLimits::MAX_SEGMENT_SIZE {
        return Err(ProtocolError::NegativeLength(raw as i32));
    }
    Ok(raw as usize)
}

/// Phase of the per-connection accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Nothing buffered beyond (possibly) a partial payload length prefix.
    Idle,
    /// Payload prefix read; expecting `remaining` more payload bytes.
    CollectingBody {
        /// Payload bytes still missing
        remaining: usize,
    },
    /// Payload complete; collecting the signature segment.
    ///
    /// `remaining` is `None` until the signature length prefix is complete.
    CollectingSignature {
        /// Signature bytes still missing
        remaining: Option<usize>,
    },
}

/// Outcome of feeding bytes to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A whole frame was reassembled.
    Frame(Frame),
    /// The peer sent an invalid length prefix; its message was dropped.
    Violation(ProtocolError),
}

/// Streaming decoder for one connection.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    state: BufferState,
    limits: DecoderLimits,
    /// Partial length prefix carried across arrivals
    prefix: [u8; Frame::LENGTH_PREFIX_SIZE],
    prefix_len: usize,
    payload: Vec<u8>,
    signature: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder in the `Idle` state.
    pub fn new(limits: DecoderLimits) -> Self {
        Self {
            state: BufferState::Idle,
            limits,
            prefix: [0; Frame::LENGTH_PREFIX_SIZE],
            prefix_len: 0,
            payload: Vec::new(),
            signature: Vec::new(),
        }
    }

    /// Current phase.
    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Limits this decoder enforces.
    pub fn limits(&self) -> &DecoderLimits {
        &self.limits
    }

    /// Bytes held for the in-flight message (prefix bytes included).
    pub fn buffered(&self) -> usize {
        self.prefix_len + self.payload.len() + self.signature.len()
    }

    /// Discard any partial message and return to `Idle`.
    pub fn reset(&mut self) {
        self.state = BufferState::Idle;
        self.prefix_len = 0;
        self.payload = Vec::new();
        self.signature = Vec::new();
    }

    /// Feed newly arrived bytes.
    ///
    /// Returns every frame completed by this arrival, in order. A framing
    /// violation ends processing of `data`: it is reported as the last
    /// element and the decoder is back in `Idle`.
    ///
    /// # Errors
    ///
    /// `AllocationFailed` if the buffer for an announced segment cannot be
    /// reserved. Frames completed earlier in the same arrival are dropped
    /// with the error; use [`Self::decode_into`] to keep them.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Decoded>> {
        let mut decoded = Vec::new();
        self.decode_into(data, &mut decoded)?;
        Ok(decoded)
    }

    /// Like [`Self::push`], appending results to `decoded`.
    ///
    /// Items appended before an allocation failure stay in `decoded`. The
    /// decoder is reset before the error is returned.
    pub fn decode_into(&mut self, mut data: &[u8], decoded: &mut Vec<Decoded>) -> Result<()> {
        while !data.is_empty() {
            match self.state {
                BufferState::Idle => {
                    let Some(raw) = self.take_prefix(&mut data) else { break };
                    let len = match self.limits.check_payload(raw) {
                        Ok(len) => len,
                        Err(violation) => {
                            self.reset();
                            decoded.push(Decoded::Violation(violation));
                            return Ok(());
                        },
                    };

                    self.payload = self.reserve(len)?;
                    self.state = if len == 0 {
                        BufferState::CollectingSignature { remaining: None }
                    } else {
                        BufferState::CollectingBody { remaining: len }
                    };
                },
                BufferState::CollectingBody { remaining } => {
                    let take = remaining.min(data.len());
                    self.payload.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    self.state = if take == remaining {
                        BufferState::CollectingSignature { remaining: None }
                    } else {
                        BufferState::CollectingBody { remaining: remaining - take }
                    };
                },
                BufferState::CollectingSignature { remaining: None } => {
                    let Some(raw) = self.take_prefix(&mut data) else { break };
                    let len = match self.limits.check_signature(raw) {
                        Ok(len) => len,
                        Err(violation) => {
                            self.reset();
                            decoded.push(Decoded::Violation(violation));
                            return Ok(());
                        },
                    };

                    self.signature = self.reserve(len)?;
                    if len == 0 {
                        decoded.push(Decoded::Frame(self.finish()));
                    } else {
                        self.state = BufferState::CollectingSignature { remaining: Some(len) };
                    }
                },
                BufferState::CollectingSignature { remaining: Some(remaining) } => {
                    let take = remaining.min(data.len());
                    self.signature.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    if take == remaining {
                        decoded.push(Decoded::Frame(self.finish()));
                    } else {
                        self.state =
                            BufferState::CollectingSignature { remaining: Some(remaining - take) };
                    }
                },
            }
        }

        Ok(())
    }

    /// Move bytes into the prefix scratch; yields the prefix once complete.
    fn take_prefix(&mut self, data: &mut &[u8]) -> Option<u32> {
        let want = Frame::LENGTH_PREFIX_SIZE - self.prefix_len;
        let take = want.min(data.len());
        self.prefix[self.prefix_len..self.prefix_len + take].copy_from_slice(&data[..take]);
        self.prefix_len += take;
        *data = &data[take..];

        if self.prefix_len < Frame::LENGTH_PREFIX_SIZE {
            return None;
        }

        self.prefix_len = 0;
        Some(u32::from_be_bytes(self.prefix))
    }

    fn reserve(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if refused(len) || buf.try_reserve_exact(len).is_err() {
            self.reset();
            return Err(ProtocolError::AllocationFailed { len });
        }
        Ok(buf)
    }

    fn finish(&mut self) -> Frame {
        self.state = BufferState::Idle;
        let payload = std::mem::take(&mut self.payload);
        let signature = std::mem::take(&mut self.signature);
        Frame::new(payload, signature)
    }
}

#[cfg(feature = "fault-injection")]
fn refused(len: usize) -> bool {
    crate::fault::refuses(len)
}

#[cfg(not(feature = "fault-injection"))]
const fn refused(_len: usize) -> bool {
    false
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DecoderLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn encode(payload: &[u8], signature: &[u8]) -> Vec<u8> {
        Frame::new(payload.to_vec(), signature.to_vec())
            .to_bytes(&DecoderLimits::default())
            .unwrap()
            .to_vec()
    }

    fn frames(decoded: Vec<Decoded>) -> Vec<Frame> {
        decoded
            .into_iter()
            .map(|d| match d {
                Decoded::Frame(frame) => frame,
                Decoded::Violation(e) => panic!("unexpected violation: {e}"),
            })
            .collect()
    }

    #[test]
    fn single_frame_in_one_chunk() {
        let mut decoder = FrameDecoder::default();
        let out = frames(decoder.push(&encode(b"hello", b"sig")).unwrap());

        assert_eq!(out, vec![Frame::new(&b"hello"[..], &b"sig"[..])]);
        assert_eq!(decoder.state(), BufferState::Idle);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn phases_advance_only_on_exact_counts() {
        let mut decoder = FrameDecoder::default();
        let bytes = encode(b"abcd", b"xy");

        // Partial payload prefix stays Idle
        assert!(decoder.push(&bytes[..3]).unwrap().is_empty());
        assert_eq!(decoder.state(), BufferState::Idle);

        // Prefix complete plus one body byte
        assert!(decoder.push(&bytes[3..5]).unwrap().is_empty());
        assert_eq!(decoder.state(), BufferState::CollectingBody { remaining: 3 });

        // Rest of body
        assert!(decoder.push(&bytes[5..8]).unwrap().is_empty());
        assert_eq!(decoder.state(), BufferState::CollectingSignature { remaining: None });

        // Signature prefix and first signature byte
        assert!(decoder.push(&bytes[8..13]).unwrap().is_empty());
        assert_eq!(decoder.state(), BufferState::CollectingSignature { remaining: Some(1) });

        let out = frames(decoder.push(&bytes[13..]).unwrap());
        assert_eq!(out, vec![Frame::new(&b"abcd"[..], &b"xy"[..])]);
        assert_eq!(decoder.state(), BufferState::Idle);
    }

    #[test]
    fn byte_at_a_time() {
        let mut decoder = FrameDecoder::default();
        let bytes = encode(b"fragmented", b"signature");

        let mut out = Vec::new();
        for byte in &bytes {
            out.extend(frames(decoder.push(&[*byte]).unwrap()));
        }

        assert_eq!(out, vec![Frame::new(&b"fragmented"[..], &b"signature"[..])]);
    }

    #[test]
    fn multiple_frames_and_trailing_partial() {
        let mut decoder = FrameDecoder::default();
        let mut data = encode(b"one", b"1");
        data.extend(encode(b"two", b"2"));
        let third = encode(b"three", b"3");
        data.extend(&third[..6]);

        let out = frames(decoder.push(&data).unwrap());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].payload, Bytes::from_static(b"one"));
        assert_eq!(out[1].payload, Bytes::from_static(b"two"));
        assert_eq!(decoder.state(), BufferState::CollectingBody { remaining: 3 });

        let out = frames(decoder.push(&third[6..]).unwrap());
        assert_eq!(out, vec![Frame::new(&b"three"[..], &b"3"[..])]);
    }

    #[test]
    fn empty_payload_and_signature_are_legal() {
        let mut decoder = FrameDecoder::default();
        let out = frames(decoder.push(&encode(b"", b"")).unwrap());

        assert_eq!(out, vec![Frame::default()]);
        assert_eq!(decoder.state(), BufferState::Idle);
    }

    #[test]
    fn zero_length_payload_goes_straight_to_signature() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.push(&[0, 0, 0, 0]).unwrap().is_empty());
        assert_eq!(decoder.state(), BufferState::CollectingSignature { remaining: None });
    }

    #[test]
    fn empty_arrival_is_a_no_op() {
        let mut decoder = FrameDecoder::default();
        decoder.push(&[0, 0]).unwrap();

        assert!(decoder.push(&[]).unwrap().is_empty());
        assert_eq!(decoder.buffered(), 2);
    }

    #[test]
    fn oversized_payload_prefix_is_a_violation() {
        let mut decoder = FrameDecoder::new(DecoderLimits::new(8, 8));
        let mut data = 9u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"ignored bytes");

        let out = decoder.push(&data).unwrap();
        assert_eq!(
            out,
            vec![Decoded::Violation(ProtocolError::PayloadTooLarge { len: 9, max: 8 })]
        );
        assert_eq!(decoder.state(), BufferState::Idle);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn oversized_signature_prefix_discards_partial_message() {
        let mut decoder = FrameDecoder::new(DecoderLimits::new(8, 2));
        let mut data = encode(b"ok", b"");
        data.truncate(6);
        data.extend_from_slice(&3u32.to_be_bytes());

        let out = decoder.push(&data).unwrap();
        assert_eq!(
            out,
            vec![Decoded::Violation(ProtocolError::SignatureTooLarge { len: 3, max: 2 })]
        );
        assert_eq!(decoder.state(), BufferState::Idle);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn negative_prefix_is_a_violation() {
        let mut decoder = FrameDecoder::default();
        let out = decoder.push(&(-5i32).to_be_bytes()).unwrap();

        assert_eq!(out, vec![Decoded::Violation(ProtocolError::NegativeLength(-5))]);
    }

    #[test]
    fn frames_before_violation_are_kept() {
        let mut decoder = FrameDecoder::new(DecoderLimits::new(8, 8));
        let mut data = encode(b"good", b"s");
        data.extend_from_slice(&100u32.to_be_bytes());

        let out = decoder.push(&data).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Decoded::Frame(Frame::new(&b"good"[..], &b"s"[..])));
        assert!(matches!(out[1], Decoded::Violation(ProtocolError::PayloadTooLarge { .. })));
    }

    #[test]
    fn decoder_recovers_after_violation() {
        let mut decoder = FrameDecoder::new(DecoderLimits::new(8, 8));
        decoder.push(&100u32.to_be_bytes()).unwrap();

        let out = frames(decoder.push(&encode(b"next", b"s")).unwrap());
        assert_eq!(out, vec![Frame::new(&b"next"[..], &b"s"[..])]);
    }

    #[test]
    fn reset_discards_partial_message() {
        let mut decoder = FrameDecoder::default();
        let bytes = encode(b"partial", b"sig");
        decoder.push(&bytes[..7]).unwrap();
        assert!(decoder.buffered() > 0);

        decoder.reset();
        assert_eq!(decoder.state(), BufferState::Idle);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn limits_are_clamped_to_signed_range() {
        let limits = DecoderLimits::new(u32::MAX, u32::MAX);
        assert_eq!(limits.max_payload_size, DecoderLimits::MAX_SEGMENT_SIZE);
        assert_eq!(limits.max_signature_size, DecoderLimits::MAX_SEGMENT_SIZE);
    }
}
