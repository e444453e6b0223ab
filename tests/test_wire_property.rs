//! Property-based tests for the probe wire format.
//!
//! These verify the codec's contract under random inputs:
//!
//! - Decoding is total: arbitrary bytes never panic, and anything that
//!   decodes really did carry the probe tag.
//! - Echo validation accepts exactly the transmitted bytes at exactly the
//!   transmitted length, and nothing else.
//! - Truncation at the receive buffer can shorten the timestamp without
//!   destroying the sequence id, which is the field the client keys on.

use pingfort::wire::{echo_matches, Probe, PROBE_TAG};
use pingfort::SequenceId;
use proptest::prelude::*;

proptest! {
    /// Any header the engine writes, the engine reads back unchanged.
    #[test]
    fn prop_encode_decode_round_trip(sequence in any::<i64>(), timestamp in any::<i64>()) {
        let probe = Probe::new(SequenceId::new(sequence), timestamp);
        let decoded = Probe::decode(&probe.encode());
        prop_assert_eq!(decoded, Ok(probe));
    }

    /// Decoding arbitrary bytes never panics, and a successful decode means
    /// the datagram genuinely opened with the probe tag.
    #[test]
    fn prop_decode_tolerates_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..1200)) {
        if Probe::decode(&bytes).is_ok() {
            let line_end = bytes
                .iter()
                .position(|&byte| byte == b'\r' || byte == b'\n')
                .unwrap_or(bytes.len());
            let header = std::str::from_utf8(&bytes[..line_end])
                .expect("a decoded header region must be UTF-8");
            // Hoisted out of the assert: braces inside prop_assert!'s condition
            // are re-parsed as format placeholders by the macro's message string.
            let tagged_prefix = format!("{} ", PROBE_TAG);
            prop_assert!(header.starts_with(&tagged_prefix));
        }
    }

    /// An echo matches at exactly the transmitted length and at no other
    /// reported length, regardless of what trails it in the buffer.
    #[test]
    fn prop_echo_matches_only_the_exact_prefix(
        sequence in any::<i64>(),
        timestamp in any::<i64>(),
        junk in proptest::collection::vec(any::<u8>(), 0..64),
        reported in 0usize..1100,
    ) {
        let sent = Probe::new(SequenceId::new(sequence), timestamp).encode();
        let mut buffer = sent.clone();
        buffer.extend_from_slice(&junk);

        prop_assert_eq!(
            echo_matches(&sent, &buffer, reported),
            reported == sent.len() && reported <= buffer.len()
        );
    }

    /// Flipping any single bit of the echo fails validation.
    #[test]
    fn prop_corrupted_echo_never_matches(
        sequence in any::<i64>(),
        timestamp in any::<i64>(),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let sent = Probe::new(SequenceId::new(sequence), timestamp).encode();
        let mut corrupted = sent.clone();
        let index = position.index(corrupted.len());
        corrupted[index] ^= 1 << bit;

        prop_assert!(!echo_matches(&sent, &corrupted, corrupted.len()));
    }

    /// Receive-buffer truncation that cuts into the timestamp still yields
    /// the original sequence id.
    #[test]
    fn prop_truncated_timestamp_keeps_the_sequence(
        sequence in any::<i64>(),
        timestamp in 1000i64..i64::MAX,
        cut in 1usize..=3,
    ) {
        let encoded = Probe::new(SequenceId::new(sequence), timestamp).encode();
        // Drop the CRLF and the last `cut` timestamp digits, the same shape a
        // 1024-byte receive buffer leaves behind.
        let truncated = &encoded[..encoded.len() - 2 - cut];

        let decoded = Probe::decode(truncated).expect("truncated header should still parse");
        prop_assert_eq!(decoded.sequence, SequenceId::new(sequence));
    }
}
