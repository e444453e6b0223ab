//! Aggregate statistics for a client probe run.
//!
//! The probe loop feeds every terminal outcome into an [`RttAggregator`];
//! once the run finishes, [`RttAggregator::statistics`] folds the counters
//! into a [`PingStatistics`] snapshot. Loss percentage uses integer floor
//! division, and the round-trip summary is `None` when nothing came back so
//! there is never a divide by zero and never a fabricated zero-millisecond
//! round trip.

use serde::{Deserialize, Serialize};

/// Round-trip summary over the probes that received an echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RttSummary {
    /// Fastest observed round trip, in milliseconds.
    pub min_millis: u128,
    /// Slowest observed round trip, in milliseconds.
    pub max_millis: u128,
    /// Mean round trip in milliseconds, floor of the integer division.
    pub mean_millis: u128,
}

/// The aggregate product of a probe run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[must_use = "PingStatistics should be inspected or used after being queried"]
pub struct PingStatistics {
    /// Number of probes transmitted.
    pub sent: u64,
    /// Number of probes whose echo came back intact.
    pub received: u64,
    /// Number of probes recovered as loss (timeout, mismatch, or send failure).
    pub lost: u64,
    /// `(sent - received) * 100 / sent`, floor division. 0 when nothing was sent.
    pub loss_percent: u64,
    /// Round-trip summary. `None` when no echo was received, which keeps
    /// min/max/mean undefined rather than inventing values.
    pub rtt: Option<RttSummary>,
}

impl PingStatistics {
    /// Serializes these statistics to a JSON string.
    ///
    /// Returns `None` if serialization fails (which should not happen for
    /// well-formed statistics).
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for PingStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            sent,
            received,
            lost,
            loss_percent,
            rtt,
        } = self;

        write!(
            f,
            "Packets: Sent = {}, Received = {}, Lost = {} ({}% loss)",
            sent, received, lost, loss_percent
        )?;

        if let Some(RttSummary {
            min_millis,
            max_millis,
            mean_millis,
        }) = rtt
        {
            write!(
                f,
                "\nApproximate round trip times in milli-seconds:\
                 \n    Minimum = {}ms, Maximum = {}ms, Average = {}ms",
                min_millis, max_millis, mean_millis
            )?;
        }

        Ok(())
    }
}

/// Accumulates per-probe outcomes during a run.
///
/// Each probe terminates exactly once, as either [`record_reply`] or
/// [`record_loss`]; the aggregator derives everything else.
///
/// [`record_reply`]: Self::record_reply
/// [`record_loss`]: Self::record_loss
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RttAggregator {
    sent: u64,
    received: u64,
    sum_millis: u128,
    min_millis: Option<u128>,
    max_millis: Option<u128>,
}

impl RttAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a probe whose echo came back intact.
    pub fn record_reply(&mut self, rtt_millis: u128) {
        self.sent += 1;
        self.received += 1;
        self.sum_millis += rtt_millis;
        self.min_millis = Some(match self.min_millis {
            Some(current) => current.min(rtt_millis),
            None => rtt_millis,
        });
        self.max_millis = Some(match self.max_millis {
            Some(current) => current.max(rtt_millis),
            None => rtt_millis,
        });
    }

    /// Records a probe recovered as loss.
    pub fn record_loss(&mut self) {
        self.sent += 1;
    }

    /// Number of probes recorded so far.
    #[must_use]
    pub const fn sent(&self) -> u64 {
        self.sent
    }

    /// Number of intact echoes recorded so far.
    #[must_use]
    pub const fn received(&self) -> u64 {
        self.received
    }

    /// Folds the recorded outcomes into a statistics snapshot.
    #[must_use]
    pub fn statistics(&self) -> PingStatistics {
        let lost = self.sent - self.received;
        let loss_percent = if self.sent == 0 {
            0
        } else {
            lost * 100 / self.sent
        };
        let rtt = match (self.min_millis, self.max_millis) {
            (Some(min_millis), Some(max_millis)) if self.received > 0 => Some(RttSummary {
                min_millis,
                max_millis,
                mean_millis: self.sum_millis / u128::from(self.received),
            }),
            _ => None,
        };

        PingStatistics {
            sent: self.sent,
            received: self.received,
            lost,
            loss_percent,
            rtt,
        }
    }
}

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

    #[test]
    fn test_empty_aggregator() {
        let stats = RttAggregator::new().statistics();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.received, 0);
        assert_eq!(stats.lost, 0);
        assert_eq!(stats.loss_percent, 0);
        assert_eq!(stats.rtt, None);
    }

    #[test]
    fn test_all_replies() {
        let mut aggregator = RttAggregator::new();
        for rtt in [4, 2, 9, 2, 3] {
            aggregator.record_reply(rtt);
        }

        let stats = aggregator.statistics();
        assert_eq!(stats.sent, 5);
        assert_eq!(stats.received, 5);
        assert_eq!(stats.lost, 0);
        assert_eq!(stats.loss_percent, 0);
        assert_eq!(
            stats.rtt,
            Some(RttSummary {
                min_millis: 2,
                max_millis: 9,
                mean_millis: 4
            })
        );
    }

    #[test]
    fn test_all_lost_leaves_rtt_undefined() {
        let mut aggregator = RttAggregator::new();
        for _ in 0..5 {
            aggregator.record_loss();
        }

        let stats = aggregator.statistics();
        assert_eq!(stats.sent, 5);
        assert_eq!(stats.received, 0);
        assert_eq!(stats.lost, 5);
        assert_eq!(stats.loss_percent, 100);
        assert_eq!(stats.rtt, None, "no replies must leave min/max/mean undefined");
    }

    #[test]
    fn test_mixed_outcomes() {
        let mut aggregator = RttAggregator::new();
        aggregator.record_reply(10);
        aggregator.record_loss();
        aggregator.record_reply(20);
        aggregator.record_loss();
        aggregator.record_loss();

        let stats = aggregator.statistics();
        assert_eq!(stats.sent, 5);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.lost, 3);
        assert_eq!(stats.loss_percent, 60);
        assert_eq!(
            stats.rtt,
            Some(RttSummary {
                min_millis: 10,
                max_millis: 20,
                mean_millis: 15
            })
        );
    }

    #[test]
    fn test_loss_percent_floors() {
        let mut aggregator = RttAggregator::new();
        aggregator.record_reply(1);
        aggregator.record_reply(1);
        aggregator.record_loss();

        // 1 of 3 lost: 33.33..% floors to 33
        assert_eq!(aggregator.statistics().loss_percent, 33);
    }

    #[test]
    fn test_mean_floors() {
        let mut aggregator = RttAggregator::new();
        aggregator.record_reply(1);
        aggregator.record_reply(2);

        // (1 + 2) / 2 floors to 1
        assert_eq!(aggregator.statistics().rtt.unwrap().mean_millis, 1);
    }

    #[test]
    fn test_single_reply_collapses_summary() {
        let mut aggregator = RttAggregator::new();
        aggregator.record_reply(7);

        let summary = aggregator.statistics().rtt.unwrap();
        assert_eq!(summary.min_millis, 7);
        assert_eq!(summary.max_millis, 7);
        assert_eq!(summary.mean_millis, 7);
    }

    #[test]
    fn test_zero_millis_reply_is_a_reply() {
        // Loopback echoes can come back within the same millisecond
        let mut aggregator = RttAggregator::new();
        aggregator.record_reply(0);

        let stats = aggregator.statistics();
        assert_eq!(stats.received, 1);
        assert_eq!(
            stats.rtt,
            Some(RttSummary {
                min_millis: 0,
                max_millis: 0,
                mean_millis: 0
            })
        );
    }

    // ==========================================================================
    // Display Tests
    // ==========================================================================

    #[test]
    fn test_display_without_replies_omits_rtt_block() {
        let mut aggregator = RttAggregator::new();
        aggregator.record_loss();
        aggregator.record_loss();

        let display = aggregator.statistics().to_string();
        assert_eq!(
            display,
            "Packets: Sent = 2, Received = 0, Lost = 2 (100% loss)"
        );
    }

    #[test]
    fn test_display_with_replies_includes_rtt_block() {
        let mut aggregator = RttAggregator::new();
        aggregator.record_reply(3);
        aggregator.record_reply(5);
        aggregator.record_loss();

        let display = aggregator.statistics().to_string();
        assert!(display.contains("Packets: Sent = 3, Received = 2, Lost = 1 (33% loss)"));
        assert!(display.contains("Minimum = 3ms, Maximum = 5ms, Average = 4ms"));
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_statistics_to_json() {
        let mut aggregator = RttAggregator::new();
        aggregator.record_reply(4);

        let json = aggregator.statistics().to_json().unwrap();
        assert!(json.contains(r#""sent":1"#));
        assert!(json.contains(r#""min_millis":4"#));
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
        /// Property: counters always reconcile and the summary exists exactly
        /// when at least one reply was recorded.
        #[test]
        fn prop_counters_reconcile(outcomes in proptest::collection::vec(proptest::option::of(0u128..10_000), 0..200)) {
            let mut aggregator = RttAggregator::new();
            for outcome in &outcomes {
                match outcome {
                    Some(rtt) => aggregator.record_reply(*rtt),
                    None => aggregator.record_loss(),
                }
            }

            let stats = aggregator.statistics();
            prop_assert_eq!(stats.sent, outcomes.len() as u64);
            prop_assert_eq!(stats.received + stats.lost, stats.sent);
            prop_assert!(stats.loss_percent <= 100);
            prop_assert_eq!(stats.rtt.is_some(), stats.received > 0);

            if let Some(summary) = stats.rtt {
                prop_assert!(summary.min_millis <= summary.max_millis);
                prop_assert!(summary.min_millis <= summary.mean_millis);
                prop_assert!(summary.mean_millis <= summary.max_millis);
            }
        }
    }
}
