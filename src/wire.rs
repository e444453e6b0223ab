//! Text codec for the probe datagram format.
//!
//! This module centralizes the wire format shared by both halves of the
//! engine. A probe is exactly one UDP datagram carrying a single UTF-8 line:
//!
//! ```text
//! PingUDP {sequence} {timestamp_millis}\r\n
//! ```
//!
//! The tag is literal and case-sensitive, the two fields are base-10 signed
//! 64-bit integers, and the separators are single ASCII spaces. The server
//! echoes datagrams byte for byte, so the client validates echoes with plain
//! bounded byte equality rather than re-decoding.
//!
//! # Design Rationale
//!
//! - **Best-effort decode**: The server echoes every datagram whether or not
//!   it parses, so [`Probe::decode`] failures are informational, never fatal.
//!   Anything after the first CR or LF is ignored; extra tokens on the header
//!   line are ignored.
//! - **Bounded reads**: Neither half ever reads more than
//!   [`PROBE_BUFFER_SIZE`] bytes of a datagram. Oversized datagrams are
//!   truncated at that boundary, and the truncated bytes are what gets parsed
//!   and echoed.
//!
//! # Examples
//!
//! ```
//! use pingfort::wire::Probe;
//! use pingfort::SequenceId;
//!
//! let probe = Probe::new(SequenceId::new(7), 1_700_000_000_000);
//! let datagram = probe.encode();
//! assert_eq!(datagram, b"PingUDP 7 1700000000000\r\n");
//!
//! let decoded = Probe::decode(&datagram).expect("well-formed probe");
//! assert_eq!(decoded, probe);
//! ```

use crate::SequenceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal tag opening every probe datagram.
pub const PROBE_TAG: &str = "PingUDP";

/// Largest number of datagram bytes either half will read.
///
/// Datagrams longer than this are truncated at the receive buffer; the
/// truncated prefix is what gets parsed, counted, and echoed.
pub const PROBE_BUFFER_SIZE: usize = 1024;

/// The decoded header of a well-formed probe datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Probe {
    /// Sequence id carried in the datagram.
    pub sequence: SequenceId,
    /// Transmit wall clock in unix milliseconds, as stamped by the sender.
    pub timestamp_millis: i64,
}

impl Probe {
    /// Creates a probe header from its two fields.
    #[must_use]
    pub const fn new(sequence: SequenceId, timestamp_millis: i64) -> Self {
        Self {
            sequence,
            timestamp_millis,
        }
    }

    /// Renders the probe into its exact datagram bytes, CRLF included.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{} {} {}\r\n",
            PROBE_TAG,
            self.sequence.as_i64(),
            self.timestamp_millis
        )
        .into_bytes()
    }

    /// Parses the header of a received datagram.
    ///
    /// The payload is cut at the first CR or LF; the remaining header line
    /// must be UTF-8 and must open with at least three space-separated
    /// tokens: the literal tag, the sequence id, and the timestamp. Tokens
    /// past the third are tolerated and ignored.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let header_region = payload
            .split(|&byte| byte == b'\r' || byte == b'\n')
            .next()
            .unwrap_or_default();
        let line = std::str::from_utf8(header_region).map_err(|_| WireError::NotText)?;

        let tokens: Vec<&str> = line.split(' ').collect();
        let (tag, sequence_token, timestamp_token) = match tokens.as_slice() {
            [tag, sequence, timestamp, ..] => (*tag, *sequence, *timestamp),
            short => {
                return Err(WireError::TooFewFields { found: short.len() });
            }
        };

        if tag != PROBE_TAG {
            return Err(WireError::BadTag {
                found: tag.to_owned(),
            });
        }
        let sequence: i64 = sequence_token
            .parse()
            .map_err(|_| WireError::BadNumber { field: "sequence" })?;
        let timestamp_millis: i64 = timestamp_token
            .parse()
            .map_err(|_| WireError::BadNumber { field: "timestamp" })?;

        Ok(Self {
            sequence: SequenceId::new(sequence),
            timestamp_millis,
        })
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            sequence,
            timestamp_millis,
        } = self;
        write!(f, "{} {} {}", PROBE_TAG, sequence, timestamp_millis)
    }
}

/// Checks whether an echoed datagram reproduces the transmitted probe.
///
/// `received_len` is the datagram length the socket reported; only that
/// prefix of `buffer` participates in the comparison. A slow echo colliding
/// with a later probe's window fails this check and is classified as a
/// payload mismatch for that probe.
#[must_use]
pub fn echo_matches(sent: &[u8], buffer: &[u8], received_len: usize) -> bool {
    buffer.get(..received_len).is_some_and(|echo| echo == sent)
}

/// Errors that can occur while decoding a probe header.
///
/// These never escape the engine as failures: a server that cannot decode a
/// datagram still counts, reports, and echoes it. The variants exist so
/// observers can say *why* a datagram did not look like a probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum WireError {
    /// The header region (everything before the first CR or LF) was not UTF-8.
    NotText,
    /// The header line had fewer than three space-separated tokens.
    TooFewFields {
        /// How many tokens were present.
        found: usize,
    },
    /// The first token was not the probe tag.
    BadTag {
        /// The token found where the tag belongs.
        found: String,
    },
    /// A numeric field did not parse as a signed 64-bit integer.
    BadNumber {
        /// Which field failed to parse.
        field: &'static str,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::NotText => write!(f, "header region is not UTF-8"),
            WireError::TooFewFields { found } => {
                write!(f, "header line has {} tokens, expected at least 3", found)
            }
            WireError::BadTag { found } => {
                write!(f, "expected tag '{}', found '{}'", PROBE_TAG, found)
            }
            WireError::BadNumber { field } => {
                write!(f, "{} field is not a signed 64-bit integer", field)
            }
        }
    }
}

impl std::error::Error for WireError {}

// #############################################################################
// # TESTS                                                                     #
// #############################################################################

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn probe(sequence: i64, timestamp: i64) -> Probe {
        Probe::new(SequenceId::new(sequence), timestamp)
    }

    #[test]
    fn test_encode_exact_bytes() {
        let encoded = probe(5, 99).encode();
        assert_eq!(encoded, b"PingUDP 5 99\r\n");
    }

    #[test]
    fn test_encode_negative_fields() {
        let encoded = probe(-3, -12).encode();
        assert_eq!(encoded, b"PingUDP -3 -12\r\n");
    }

    #[test]
    fn test_decode_round_trip() {
        let original = probe(1_755_000_000_123, 1_755_000_000_456);
        let decoded = Probe::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_without_line_ending() {
        // A datagram truncated before its CRLF still parses
        let decoded = Probe::decode(b"PingUDP 12 34").unwrap();
        assert_eq!(decoded, probe(12, 34));
    }

    #[test]
    fn test_decode_ignores_bytes_after_line_ending() {
        let decoded = Probe::decode(b"PingUDP 12 34\r\nEXTRA GARBAGE").unwrap();
        assert_eq!(decoded, probe(12, 34));
    }

    #[test]
    fn test_decode_ignores_extra_tokens() {
        let decoded = Probe::decode(b"PingUDP 12 34 surplus tokens\r\n").unwrap();
        assert_eq!(decoded, probe(12, 34));
    }

    #[test]
    fn test_decode_ignores_invalid_utf8_after_line_ending() {
        let mut payload = b"PingUDP 7 8\r\n".to_vec();
        payload.extend_from_slice(&[0xff, 0xfe, 0xfd]);
        let decoded = Probe::decode(&payload).unwrap();
        assert_eq!(decoded, probe(7, 8));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8_header() {
        let result = Probe::decode(&[0xff, 0xfe, b'P', b'i', b'n', b'g']);
        assert_eq!(result, Err(WireError::NotText));
    }

    #[test]
    fn test_decode_rejects_too_few_fields() {
        assert_eq!(
            Probe::decode(b"hello\r\n"),
            Err(WireError::TooFewFields { found: 1 })
        );
        assert_eq!(
            Probe::decode(b"PingUDP 12\r\n"),
            Err(WireError::TooFewFields { found: 2 })
        );
        assert_eq!(Probe::decode(b""), Err(WireError::TooFewFields { found: 1 }));
    }

    #[test]
    fn test_decode_rejects_wrong_tag() {
        assert_eq!(
            Probe::decode(b"pingudp 12 34\r\n"),
            Err(WireError::BadTag {
                found: "pingudp".to_owned()
            })
        );
    }

    #[test]
    fn test_decode_rejects_non_numeric_fields() {
        assert_eq!(
            Probe::decode(b"PingUDP twelve 34\r\n"),
            Err(WireError::BadNumber { field: "sequence" })
        );
        assert_eq!(
            Probe::decode(b"PingUDP 12 soon\r\n"),
            Err(WireError::BadNumber { field: "timestamp" })
        );
    }

    #[test]
    fn test_decode_accepts_timestamp_cut_short_by_truncation() {
        // Truncation can cut the timestamp short; the digits that survive
        // still parse
        let decoded = Probe::decode(b"PingUDP 12 3").unwrap();
        assert_eq!(decoded, probe(12, 3));
    }

    #[test]
    fn test_display_omits_line_ending() {
        assert_eq!(probe(5, 99).to_string(), "PingUDP 5 99");
    }

    // === echo matching ===

    #[test]
    fn test_echo_matches_exact() {
        let sent = probe(1, 2).encode();
        let mut buffer = [0u8; PROBE_BUFFER_SIZE];
        buffer[..sent.len()].copy_from_slice(&sent);
        assert!(echo_matches(&sent, &buffer, sent.len()));
    }

    #[test]
    fn test_echo_matches_rejects_short_echo() {
        let sent = probe(1, 2).encode();
        let mut buffer = [0u8; PROBE_BUFFER_SIZE];
        buffer[..sent.len()].copy_from_slice(&sent);
        assert!(!echo_matches(&sent, &buffer, sent.len() - 1));
    }

    #[test]
    fn test_echo_matches_rejects_trailing_bytes() {
        let sent = probe(1, 2).encode();
        let mut buffer = [0u8; PROBE_BUFFER_SIZE];
        buffer[..sent.len()].copy_from_slice(&sent);
        buffer[sent.len()] = b'!';
        assert!(!echo_matches(&sent, &buffer, sent.len() + 1));
    }

    #[test]
    fn test_echo_matches_rejects_different_probe() {
        let sent = probe(1, 2).encode();
        let other = probe(2, 2).encode();
        let mut buffer = [0u8; PROBE_BUFFER_SIZE];
        buffer[..other.len()].copy_from_slice(&other);
        assert!(!echo_matches(&sent, &buffer, other.len()));
    }

    #[test]
    fn test_echo_matches_rejects_length_beyond_buffer() {
        let sent = probe(1, 2).encode();
        let buffer = [0u8; 4];
        assert!(!echo_matches(&sent, &buffer, buffer.len() + 1));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            WireError::NotText.to_string(),
            "header region is not UTF-8"
        );
        assert_eq!(
            WireError::TooFewFields { found: 2 }.to_string(),
            "header line has 2 tokens, expected at least 3"
        );
        assert_eq!(
            WireError::BadTag {
                found: "Nope".to_owned()
            }
            .to_string(),
            "expected tag 'PingUDP', found 'Nope'"
        );
        assert_eq!(
            WireError::BadNumber { field: "sequence" }.to_string(),
            "sequence field is not a signed 64-bit integer"
        );
    }
}

// =============================================================================
// Property-Based Tests
// =============================================================================

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: every representable probe survives an encode/decode trip.
        #[test]
        fn prop_round_trip(sequence in any::<i64>(), timestamp in any::<i64>()) {
            let original = Probe::new(SequenceId::new(sequence), timestamp);
            let decoded = Probe::decode(&original.encode());
            prop_assert_eq!(decoded, Ok(original));
        }

        /// Property: decode never panics, whatever bytes arrive.
        #[test]
        fn prop_decode_arbitrary_bytes_never_panics(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let _ = Probe::decode(&payload);
        }

        /// Property: an encoded probe always matches itself as an echo.
        #[test]
        fn prop_encoded_probe_matches_own_echo(sequence in any::<i64>(), timestamp in any::<i64>()) {
            let datagram = Probe::new(SequenceId::new(sequence), timestamp).encode();
            prop_assert!(echo_matches(&datagram, &datagram, datagram.len()));
        }

        /// Property: appending any byte to the echo breaks the match.
        #[test]
        fn prop_longer_echo_never_matches(sequence in any::<i64>(), extra in any::<u8>()) {
            let datagram = Probe::new(SequenceId::new(sequence), 0).encode();
            let mut echoed = datagram.clone();
            echoed.push(extra);
            prop_assert!(!echo_matches(&datagram, &echoed, echoed.len()));
        }
    }
}
