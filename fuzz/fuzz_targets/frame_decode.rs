//! Feed arbitrary bytes, split at arbitrary points, to one decoder.
//!
//! The decoder must never panic, never return an error with default limits
//! on small inputs, and report at most one violation per chunk as its last
//! item.

#![no_main]

use arbitrary::Arbitrary;
use cloak_proto::{Decoded, DecoderLimits, FrameDecoder};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    /// Small limits so the violation paths are reachable
    max_payload_size: u16,
    max_signature_size: u8,
    chunks: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let limits = DecoderLimits::new(
        u32::from(input.max_payload_size),
        u32::from(input.max_signature_size),
    );
    let mut decoder = FrameDecoder::new(limits);

    for chunk in &input.chunks {
        let decoded = decoder.push(chunk).expect("small limits never exhaust memory");

        let violations = decoded.iter().filter(|d| matches!(d, Decoded::Violation(_))).count();
        assert!(violations <= 1);
        if violations == 1 {
            assert!(matches!(decoded.last(), Some(Decoded::Violation(_))));
        }

        for item in &decoded {
            if let Decoded::Frame(frame) = item {
                assert!(frame.payload.len() <= usize::from(input.max_payload_size));
                assert!(frame.signature.len() <= usize::from(input.max_signature_size));
            }
        }
    }
});
