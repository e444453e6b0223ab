//! # pingfort
//!
//! pingfort is a fault-injecting UDP ping engine written in 100% safe Rust.
//! One wire format, two halves:
//!
//! - The **client** sends a fixed number of sequenced, timestamped probes to
//!   a host and port, waits for each echo with a per-probe timeout, and
//!   produces a [`PingReport`]: ordered per-probe records plus aggregate
//!   statistics (sent, received, lost, loss percentage, min/max/mean RTT).
//! - The **server** listens on a runtime-reconfigurable UDP port, optionally
//!   injects faults (probabilistic loss, fixed or random per-packet delay)
//!   before echoing each datagram back to its source, keeps per-source fault
//!   counters, and notifies a [`ServerObserver`] of traffic, log events, and
//!   counter updates.
//!
//! Probes travel as one UTF-8 text line per datagram,
//! `PingUDP {sequence} {timestamp_millis}\r\n`, and the server echoes the
//! received bytes back unchanged, bounded by the received length. The server
//! does not need to understand a payload to echo it; well-formed probes just
//! get richer observer summaries.
//!
//! # Quick start
//!
//! ```no_run
//! use pingfort::{ClientBuilder, ServerBuilder, SharedRuntimeConfig};
//!
//! // Server, retunable at runtime through the shared config handle.
//! let config = SharedRuntimeConfig::default();
//! let mut server = ServerBuilder::new().with_config(config.clone()).build()?;
//! server.start()?;
//!
//! // Inject 25% loss without restarting.
//! config.set_loss_enabled(true);
//! config.set_loss_percent(25);
//!
//! // Client run against it.
//! let mut client = ClientBuilder::new()
//!     .with_host("127.0.0.1")
//!     .with_port(server.bound_port().unwrap_or_default())
//!     .build()?;
//! let report = client.run();
//! println!("{report}");
//!
//! server.stop();
//! # Ok::<(), pingfort::PingError>(())
//! ```

#![forbid(unsafe_code)] // let us try
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use client::{
    ClientBuilder, PingClient, PingReport, ProbeOutcome, ProbeRecord, DEFAULT_PROBE_COUNT,
    DEFAULT_TIMEOUT,
};
pub use config::{
    ConfigSnapshot, DelayConfig, DelayMode, LossConfig, RuntimeConfigProvider,
    SharedRuntimeConfig, DEFAULT_FIXED_DELAY, DEFAULT_LISTEN_PORT,
};
pub use error::PingError;
pub use observer::{
    CollectingObserver, CompositeObserver, CounterRecord, HeaderSummary, MessageRecord,
    ServerObserver, TracingObserver,
};
pub use server::counters::{FaultCounters, StatsTable};
pub use server::fault::{FaultDecision, FaultInjector};
pub use server::runtime::{
    PingServer, ServerBuilder, DEFAULT_CLOSE_GRACE, DEFAULT_POLL_INTERVAL, DEFAULT_WORKER_COUNT,
};
pub use stats::{PingStatistics, RttAggregator, RttSummary};
pub use wire::{Probe, WireError, PROBE_BUFFER_SIZE, PROBE_TAG};

pub mod client;
pub mod config;
pub mod error;
pub mod observer;
/// Internal random number generator module based on PCG32.
///
/// Provides a minimal, high-quality PRNG that replaces the `rand` crate
/// dependency. Deterministic seeding keeps fault-injection behavior
/// reproducible. See the module documentation for usage details.
pub mod rng;
pub mod stats;
pub mod wire;
/// The server half: lifecycle, fault injection, socket management, dispatch.
pub mod server {
    pub mod counters;
    pub mod dispatch;
    pub mod fault;
    pub mod runtime;
    pub mod socket;
}

/// The sequence number a probe carries.
///
/// Sequence ids are seeded from the client's loop start time in unix
/// milliseconds and advance by one per probe, so they are large in practice
/// and do not collide across runs against the same server.
///
/// # Type Safety
///
/// `SequenceId` is a newtype wrapper around `i64` that provides:
/// - Clear semantic meaning (probe sequence numbers vs arbitrary integers)
/// - Compile-time prevention of accidentally mixing sequence numbers with
///   timestamps, which share the representation on the wire
///
/// # Examples
///
/// ```
/// use pingfort::SequenceId;
///
/// let first = SequenceId::new(1_700_000_000_000);
/// let next = first + 1;
/// assert_eq!(next.as_i64(), 1_700_000_000_001);
/// assert!(next > first);
/// assert_eq!(next - first, 1);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct SequenceId(i64);

impl SequenceId {
    /// Creates a new `SequenceId` from an `i64` value.
    ///
    /// Note: This does not validate the value. The wire format accepts any
    /// `i64`, though clients only ever generate non-negative ids.
    #[inline]
    #[must_use]
    pub const fn new(sequence: i64) -> Self {
        SequenceId(sequence)
    }

    /// Returns the underlying `i64` value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Arithmetic operations

impl std::ops::Add<i64> for SequenceId {
    type Output = SequenceId;

    #[inline]
    fn add(self, rhs: i64) -> Self::Output {
        SequenceId(self.0 + rhs)
    }
}

impl std::ops::AddAssign<i64> for SequenceId {
    #[inline]
    fn add_assign(&mut self, rhs: i64) {
        self.0 += rhs;
    }
}

impl std::ops::Sub<SequenceId> for SequenceId {
    type Output = i64;

    #[inline]
    fn sub(self, rhs: SequenceId) -> Self::Output {
        self.0 - rhs.0
    }
}

// Conversion traits

impl From<i64> for SequenceId {
    #[inline]
    fn from(value: i64) -> Self {
        SequenceId(value)
    }
}

impl From<SequenceId> for i64 {
    #[inline]
    fn from(sequence: SequenceId) -> Self {
        sequence.0
    }
}

// Comparison with i64 for convenience

impl PartialEq<i64> for SequenceId {
    #[inline]
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<i64> for SequenceId {
    #[inline]
    fn partial_cmp(&self, other: &i64) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

// ###################
// # UNIT TESTS      #
// ###################

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================
    // SequenceId Tests
    // ==========================================

    #[test]
    fn sequence_id_new_and_as_i64() {
        let sequence = SequenceId::new(42);
        assert_eq!(sequence.as_i64(), 42);
    }

    #[test]
    fn sequence_id_default_is_zero() {
        assert_eq!(SequenceId::default(), SequenceId::new(0));
    }

    #[test]
    fn sequence_id_display_is_the_bare_number() {
        assert_eq!(
            format!("{}", SequenceId::new(1_700_000_000_123)),
            "1700000000123"
        );
        assert_eq!(format!("{}", SequenceId::new(-7)), "-7");
    }

    #[test]
    fn sequence_id_add_advances() {
        let sequence = SequenceId::new(100);
        assert_eq!(sequence + 1, SequenceId::new(101));
        assert_eq!(sequence + 0, sequence);
    }

    #[test]
    fn sequence_id_add_assign() {
        let mut sequence = SequenceId::new(5);
        sequence += 3;
        assert_eq!(sequence, SequenceId::new(8));
    }

    #[test]
    fn sequence_id_sub_gives_the_distance() {
        let first = SequenceId::new(1000);
        let later = SequenceId::new(1004);
        assert_eq!(later - first, 4);
        assert_eq!(first - later, -4);
    }

    #[test]
    fn sequence_id_conversions_round_trip() {
        let sequence = SequenceId::from(99_i64);
        assert_eq!(i64::from(sequence), 99);
    }

    #[test]
    fn sequence_id_compares_with_i64() {
        let sequence = SequenceId::new(7);
        assert_eq!(sequence, 7_i64);
        assert!(sequence > 6_i64);
        assert!(sequence < 8_i64);
    }

    #[test]
    fn sequence_id_ordering_follows_the_value() {
        let mut sequences = vec![SequenceId::new(3), SequenceId::new(1), SequenceId::new(2)];
        sequences.sort();
        assert_eq!(
            sequences,
            vec![SequenceId::new(1), SequenceId::new(2), SequenceId::new(3)]
        );
    }
}
