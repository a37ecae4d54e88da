//! Fuzz target for length-prefixed frame decoding
//!
//! Arbitrary bytes are decoded frame by frame, and every decoded payload is
//! run through text and relay parsing.
//!
//! # Invariants
//!
//! - Decoding never panics; bad input is a structured error
//! - A decoded payload never exceeds the limit it was decoded with
//! - `consumed` is always prefix + payload and never past the buffer
//! - A decoded relay re-encodes to the exact text it came from

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use pinchat_core::{
    MAX_FRAME_PAYLOAD, RelayFrame,
    frame::{self, LENGTH_PREFIX_SIZE},
};

#[derive(Debug, Arbitrary)]
struct Input {
    /// Payload limit, folded into `0..=MAX_FRAME_PAYLOAD`
    limit: u16,
    data: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let limit = usize::from(input.limit) % (MAX_FRAME_PAYLOAD + 1);
    let mut rest = input.data.as_slice();

    while let Ok(Some((payload, consumed))) = frame::decode(rest, limit) {
        assert!(payload.len() <= limit);
        assert_eq!(consumed, LENGTH_PREFIX_SIZE + payload.len());
        assert!(consumed <= rest.len());

        if let Ok(text) = frame::payload_text(payload)
            && let Ok(relay) = RelayFrame::decode(text)
        {
            assert_eq!(relay.encode(), text);
        }

        let mut reencoded = BytesMut::new();
        frame::encode(payload, &mut reencoded).unwrap();
        assert_eq!(&reencoded[..], &rest[..consumed]);

        rest = &rest[consumed..];
    }
});
