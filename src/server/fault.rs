//! Fault decisions for incoming datagrams.
//!
//! The receive loop consults a [`FaultInjector`] once per packet, against
//! that iteration's fresh [`ConfigSnapshot`]. Loss is evaluated before delay,
//! so a dropped packet is never also delayed. The injector owns its RNG;
//! seed it with [`FaultInjector::with_seed`] to make an injection sequence
//! reproducible in tests.

use std::time::Duration;

use crate::config::{ConfigSnapshot, DelayMode, RANDOM_DELAY_BOUND_MILLIS};
use crate::rng::{Pcg32, SeedableRng};

/// What the server should do with one incoming datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultDecision {
    /// Handle the packet normally.
    Pass,
    /// Discard the packet: no echo, no dispatch, dropped counter up.
    Drop,
    /// Pause for the given duration before handling, delayed counter up.
    Delay(Duration),
}

/// Draws loss and delay decisions for the receive loop.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    rng: Pcg32,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultInjector {
    /// Creates an injector with an entropy-seeded RNG.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Pcg32::from_entropy(),
        }
    }

    /// Creates an injector with a fixed seed, for reproducible decisions.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Pcg32::seed_from_u64(seed),
        }
    }

    /// Decides the fate of one incoming datagram under the given snapshot.
    pub fn assess(&mut self, config: &ConfigSnapshot) -> FaultDecision {
        if config.loss.enabled && self.should_drop(config.loss.percent) {
            return FaultDecision::Drop;
        }
        if config.delay.enabled {
            return FaultDecision::Delay(self.resolve_delay(config.delay.mode));
        }
        FaultDecision::Pass
    }

    /// Uniform draw in `[0, 100)` against the configured chance.
    /// The extremes short-circuit without consuming a draw.
    fn should_drop(&mut self, percent: u8) -> bool {
        if percent == 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        self.rng.percent() < percent
    }

    fn resolve_delay(&mut self, mode: DelayMode) -> Duration {
        match mode {
            DelayMode::Fixed(pause) => pause,
            DelayMode::Random => {
                Duration::from_millis(self.rng.millis_below(RANDOM_DELAY_BOUND_MILLIS))
            },
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
    fn test_no_gates_enabled_passes_everything() {
        let mut injector = FaultInjector::with_seed(42);
        let config = ConfigSnapshot::new(9977);

        for _ in 0..100 {
            assert_eq!(injector.assess(&config), FaultDecision::Pass);
        }
    }

    #[test]
    fn test_loss_zero_percent_never_drops() {
        let mut injector = FaultInjector::with_seed(42);
        let config = ConfigSnapshot::new(9977).with_loss(0);

        for _ in 0..1000 {
            assert_eq!(injector.assess(&config), FaultDecision::Pass);
        }
    }

    #[test]
    fn test_loss_100_percent_drops_everything() {
        let mut injector = FaultInjector::with_seed(42);
        let config = ConfigSnapshot::new(9977).with_loss(100);

        for _ in 0..1000 {
            assert_eq!(injector.assess(&config), FaultDecision::Drop);
        }
    }

    #[test]
    fn test_loss_50_percent_converges() {
        let mut injector = FaultInjector::with_seed(42);
        let config = ConfigSnapshot::new(9977).with_loss(50);

        let drops = (0..10_000)
            .filter(|_| injector.assess(&config) == FaultDecision::Drop)
            .count();

        // Expected ~5000; allow generous variance for the statistical test
        assert!(drops > 4500, "Too few drops: {drops}");
        assert!(drops < 5500, "Too many drops: {drops}");
    }

    #[test]
    fn test_fixed_delay_returns_configured_pause() {
        let mut injector = FaultInjector::with_seed(42);
        let pause = Duration::from_millis(250);
        let config = ConfigSnapshot::new(9977).with_fixed_delay(pause);

        for _ in 0..100 {
            assert_eq!(injector.assess(&config), FaultDecision::Delay(pause));
        }
    }

    #[test]
    fn test_random_delay_stays_below_bound() {
        let mut injector = FaultInjector::with_seed(42);
        let config = ConfigSnapshot::new(9977).with_random_delay();
        let bound = Duration::from_millis(RANDOM_DELAY_BOUND_MILLIS);

        for _ in 0..1000 {
            match injector.assess(&config) {
                FaultDecision::Delay(pause) => assert!(pause < bound),
                other => panic!("expected a delay, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_drop_takes_precedence_over_delay() {
        let mut injector = FaultInjector::with_seed(42);
        let config = ConfigSnapshot::new(9977)
            .with_loss(100)
            .with_random_delay();

        // A dropped packet is never also delayed
        for _ in 0..1000 {
            assert_eq!(injector.assess(&config), FaultDecision::Drop);
        }
    }

    #[test]
    fn test_partial_loss_falls_through_to_delay() {
        let mut injector = FaultInjector::with_seed(42);
        let pause = Duration::from_millis(5);
        let config = ConfigSnapshot::new(9977)
            .with_loss(50)
            .with_fixed_delay(pause);

        let mut saw_drop = false;
        let mut saw_delay = false;
        for _ in 0..1000 {
            match injector.assess(&config) {
                FaultDecision::Drop => saw_drop = true,
                FaultDecision::Delay(actual) => {
                    assert_eq!(actual, pause);
                    saw_delay = true;
                },
                FaultDecision::Pass => panic!("both gates enabled, Pass is impossible"),
            }
        }
        assert!(saw_drop, "50% loss never dropped in 1000 draws");
        assert!(saw_delay, "50% loss never fell through to the delay gate");
    }

    #[test]
    fn test_deterministic_with_seed() {
        let config = ConfigSnapshot::new(9977).with_loss(37).with_random_delay();

        let mut first = FaultInjector::with_seed(12345);
        let mut second = FaultInjector::with_seed(12345);

        for _ in 0..1000 {
            assert_eq!(first.assess(&config), second.assess(&config));
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let config = ConfigSnapshot::new(9977).with_loss(50);

        let mut first = FaultInjector::with_seed(1);
        let mut second = FaultInjector::with_seed(2);

        let first_decisions: Vec<_> = (0..100).map(|_| first.assess(&config)).collect();
        let second_decisions: Vec<_> = (0..100).map(|_| second.assess(&config)).collect();

        assert_ne!(first_decisions, second_decisions);
    }
}
