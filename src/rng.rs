//! Internal random number generator implementation based on PCG32.
//!
//! This module provides a minimal, high-quality PRNG that replaces the `rand` crate
//! dependency, removing its transitive dependencies while covering everything the
//! fault injector needs: seeded determinism plus small uniform bounded draws.
//!
//! # PCG32 Algorithm
//!
//! PCG (Permuted Congruential Generator) is a family of simple fast space-efficient
//! statistically good algorithms for random number generation. PCG32 specifically:
//! - Has 64 bits of state, producing 32-bit output
//! - Period of 2^64
//! - Passes TestU01 statistical tests
//! - Is fast and simple to implement
//!
//! Reference: <https://www.pcg-random.org/>
//!
//! # Usage
//!
//! ```rust
//! use pingfort::rng::{Pcg32, SeedableRng};
//!
//! // Seeded RNG for deterministic fault decisions
//! let mut rng = Pcg32::seed_from_u64(12345);
//! let draw = rng.percent();
//! assert!(draw < 100);
//! ```

/// PCG32 random number generator.
///
/// A minimal implementation of the PCG-XSH-RR variant with 64-bit state.
/// Suitable for traffic shaping and testing, but NOT cryptographically secure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

/// Default increment for single-stream PCG32.
/// This is a standard value from the PCG paper.
const PCG_DEFAULT_INCREMENT: u64 = 1442695040888963407;

/// Multiplier constant for the LCG step.
/// This is the standard multiplier for 64-bit state PCG.
const PCG_MULTIPLIER: u64 = 6364136223846793005;

impl Pcg32 {
    /// Creates a new PCG32 generator with the given state and stream.
    ///
    /// The stream (increment) allows for multiple independent sequences.
    /// The increment must be odd; if even, it will be made odd by OR-ing with 1.
    #[must_use]
    pub const fn new(state: u64, stream: u64) -> Self {
        // The increment must be odd
        let inc = (stream << 1) | 1;
        // Initialize state to 0, then advance once, then add the initial state
        // This is the standard PCG seeding procedure
        let mut pcg = Self { state: 0, inc };
        // Can't call non-const fn in const context, so we inline the step
        pcg.state = pcg.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(pcg.inc);
        pcg.state = pcg.state.wrapping_add(state);
        pcg.state = pcg.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(pcg.inc);
        pcg
    }

    /// Generates the next 32-bit random value.
    #[inline]
    #[must_use]
    pub fn next_u32(&mut self) -> u32 {
        let old_state = self.state;
        // Advance internal state
        self.state = old_state
            .wrapping_mul(PCG_MULTIPLIER)
            .wrapping_add(self.inc);
        // Calculate output using XSH-RR (xor-shift, random rotate)
        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Generates the next 64-bit random value by combining two 32-bit values.
    #[inline]
    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        let high = u64::from(self.next_u32());
        let low = u64::from(self.next_u32());
        (high << 32) | low
    }

    /// Generates a uniform value in `[0, bound)` using rejection sampling.
    ///
    /// Returns 0 when `bound` is 0 (the empty draw has one sensible answer).
    #[must_use]
    pub fn bounded_u32(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        // Rejection sampling to avoid modulo bias
        let threshold = bound.wrapping_neg() % bound;
        loop {
            let value = self.next_u32();
            if value >= threshold {
                return value % bound;
            }
        }
    }

    /// Draws a uniform percentage in `[0, 100)`.
    ///
    /// The loss gate compares this against a configured threshold, so a
    /// threshold of 100 drops everything and 0 drops nothing.
    #[inline]
    #[must_use]
    pub fn percent(&mut self) -> u8 {
        self.bounded_u32(100) as u8
    }

    /// Draws a uniform millisecond count in `[0, bound)`.
    ///
    /// Returns 0 when `bound` is 0.
    #[must_use]
    pub fn millis_below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        if bound <= u64::from(u32::MAX) {
            return u64::from(self.bounded_u32(bound as u32));
        }
        let threshold = bound.wrapping_neg() % bound;
        loop {
            let value = self.next_u64();
            if value >= threshold {
                return value % bound;
            }
        }
    }
}

/// Trait for seeding random number generators.
///
/// Provides a simple interface for creating deterministic RNG instances.
pub trait SeedableRng: Sized {
    /// Creates a new RNG seeded from a 64-bit value.
    ///
    /// Different seeds produce different (statistically independent) sequences.
    #[must_use]
    fn seed_from_u64(seed: u64) -> Self;

    /// Creates a new RNG with a random seed derived from system timing.
    ///
    /// This uses timing information and thread identity for entropy, which is
    /// sufficient for traffic-shaping draws but NOT cryptographically secure.
    #[must_use]
    fn from_entropy() -> Self;
}

impl SeedableRng for Pcg32 {
    fn seed_from_u64(seed: u64) -> Self {
        Self::new(seed, PCG_DEFAULT_INCREMENT)
    }

    fn from_entropy() -> Self {
        Self::seed_from_u64(timing_entropy_seed())
    }
}

/// Gets a timing-based seed for RNG initialization.
///
/// Combines the wall clock with thread identity so two injectors created in
/// the same instant on different threads still diverge.
///
/// # Non-Determinism Warning
///
/// This function is intentionally non-deterministic. For reproducible fault
/// sequences (required by the deterministic injection tests), always use
/// [`Pcg32::seed_from_u64`] with a fixed seed instead.
fn timing_entropy_seed() -> u64 {
    use std::hash::{BuildHasher, Hash, Hasher};
    use std::time::{SystemTime, UNIX_EPOCH};

    let clock_bits = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0x5157_4b44);

    let thread_bits = {
        let mut hasher = std::collections::hash_map::RandomState::new().build_hasher();
        std::thread::current().id().hash(&mut hasher);
        hasher.finish()
    };

    clock_bits
        .wrapping_mul(thread_bits | 1)
        .wrapping_add(0x9e3779b97f4a7c15)
}

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
    fn test_pcg32_deterministic() {
        let mut rng1 = Pcg32::seed_from_u64(12345);
        let mut rng2 = Pcg32::seed_from_u64(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u32(), rng2.next_u32());
        }
    }

    #[test]
    fn test_pcg32_different_seeds() {
        let mut rng1 = Pcg32::seed_from_u64(12345);
        let mut rng2 = Pcg32::seed_from_u64(54321);

        // Should produce different sequences
        let mut same_count = 0;
        for _ in 0..100 {
            if rng1.next_u32() == rng2.next_u32() {
                same_count += 1;
            }
        }
        // Extremely unlikely to have more than a few collisions
        assert!(same_count < 10);
    }

    #[test]
    fn test_pcg32_distribution() {
        let mut rng = Pcg32::seed_from_u64(42);
        let mut buckets = [0u32; 16];

        // Generate many values and check distribution
        for _ in 0..16000 {
            let val = rng.next_u32();
            let bucket = (val >> 28) as usize; // Use top 4 bits
            buckets[bucket] += 1;
        }

        // Each bucket should have roughly 1000 values (16000/16)
        // Allow significant variance for statistical tests
        for &count in &buckets {
            assert!(count > 500, "Bucket too low: {count}");
            assert!(count < 1500, "Bucket too high: {count}");
        }
    }

    // Test that known seed produces expected sequence (golden test)
    #[test]
    fn test_pcg32_golden() {
        let mut rng = Pcg32::seed_from_u64(0);

        // These values are from running the implementation with seed 0
        // They serve as a regression test to ensure we don't accidentally change the algorithm
        let expected = [
            0x348a463f_u32,
            0x4f205a1b_u32,
            0x2946c488_u32,
            0x805e36de_u32,
            0x79f994a9_u32,
        ];

        for &exp in &expected {
            assert_eq!(rng.next_u32(), exp, "Golden test failed");
        }
    }

    #[test]
    fn test_percent_within_bounds() {
        let mut rng = Pcg32::seed_from_u64(42);

        for _ in 0..10000 {
            assert!(rng.percent() < 100);
        }
    }

    #[test]
    fn test_percent_covers_extremes() {
        let mut rng = Pcg32::seed_from_u64(42);
        let mut saw_low = false;
        let mut saw_high = false;

        for _ in 0..100_000 {
            let draw = rng.percent();
            if draw == 0 {
                saw_low = true;
            }
            if draw == 99 {
                saw_high = true;
            }
            if saw_low && saw_high {
                break;
            }
        }

        assert!(saw_low, "never drew 0 in 100k attempts");
        assert!(saw_high, "never drew 99 in 100k attempts");
    }

    #[test]
    fn test_millis_below_within_bounds() {
        let mut rng = Pcg32::seed_from_u64(7);

        for _ in 0..10000 {
            assert!(rng.millis_below(1000) < 1000);
        }
    }

    #[test]
    fn test_millis_below_zero_bound() {
        let mut rng = Pcg32::seed_from_u64(7);
        assert_eq!(rng.millis_below(0), 0);
    }

    #[test]
    fn test_millis_below_large_bound() {
        let mut rng = Pcg32::seed_from_u64(7);
        let bound = u64::from(u32::MAX) + 5000;

        for _ in 0..100 {
            assert!(rng.millis_below(bound) < bound);
        }
    }

    #[test]
    fn test_bounded_u32_single_value() {
        let mut rng = Pcg32::seed_from_u64(42);

        // Bound of 1 should always return 0
        for _ in 0..100 {
            assert_eq!(rng.bounded_u32(1), 0);
        }
    }

    #[test]
    fn test_next_u64_combines_correctly() {
        let mut rng = Pcg32::seed_from_u64(42);

        // Verify u64 covers full range (tests high bits are populated)
        let mut has_high_bits = false;
        for _ in 0..1000 {
            let val = rng.next_u64();
            if val > u64::from(u32::MAX) {
                has_high_bits = true;
                break;
            }
        }
        assert!(
            has_high_bits,
            "next_u64 should produce values with high bits set"
        );
    }

    #[test]
    fn test_seedable_from_entropy() {
        // Just verify it doesn't panic
        let _rng = Pcg32::from_entropy();
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
        /// Property: Same seed always produces identical sequence.
        ///
        /// This is what makes fault-injection tests reproducible: a seeded
        /// injector must decide identically run over run.
        #[test]
        fn prop_determinism_same_seed_same_sequence(seed in any::<u64>()) {
            let mut rng1 = Pcg32::seed_from_u64(seed);
            let mut rng2 = Pcg32::seed_from_u64(seed);

            for _ in 0..100 {
                prop_assert_eq!(
                    rng1.next_u32(), rng2.next_u32(),
                    "Same seed must produce identical sequences"
                );
            }
        }

        /// Property: Different seeds produce different sequences.
        ///
        /// While collisions are possible, they should be astronomically rare.
        #[test]
        fn prop_different_seeds_different_sequences(seed1 in any::<u64>(), seed2 in any::<u64>()) {
            prop_assume!(seed1 != seed2);

            let mut rng1 = Pcg32::seed_from_u64(seed1);
            let mut rng2 = Pcg32::seed_from_u64(seed2);

            // Collect first 10 values
            let seq1: Vec<u32> = (0..10).map(|_| rng1.next_u32()).collect();
            let seq2: Vec<u32> = (0..10).map(|_| rng2.next_u32()).collect();

            // Sequences should differ (extremely unlikely to collide)
            prop_assert_ne!(seq1, seq2, "Different seeds should produce different sequences");
        }

        /// Property: bounded_u32 output is always within the bound.
        #[test]
        fn prop_bounded_u32_within_bounds(
            seed in any::<u64>(),
            bound in 1u32..100_000,
        ) {
            let mut rng = Pcg32::seed_from_u64(seed);

            for _ in 0..100 {
                let val = rng.bounded_u32(bound);
                prop_assert!(val < bound, "bounded_u32 output {} >= bound {}", val, bound);
            }
        }

        /// Property: millis_below output is always within the bound.
        #[test]
        fn prop_millis_below_within_bounds(
            seed in any::<u64>(),
            bound in 1u64..1_000_000,
        ) {
            let mut rng = Pcg32::seed_from_u64(seed);

            for _ in 0..100 {
                let val = rng.millis_below(bound);
                prop_assert!(val < bound, "millis_below output {} >= bound {}", val, bound);
            }
        }

        /// Property: percent draws hit every decile over a long run.
        #[test]
        fn prop_percent_spread(seed in any::<u64>()) {
            let mut rng = Pcg32::seed_from_u64(seed);
            let mut deciles = [false; 10];

            for _ in 0..10_000 {
                let draw = rng.percent();
                deciles[usize::from(draw / 10)] = true;
            }

            prop_assert!(
                deciles.iter().all(|&hit| hit),
                "10k percent draws left a decile empty: {:?}",
                deciles
            );
        }

        /// Property: Clone produces identical RNG that generates same sequence.
        #[test]
        fn prop_clone_produces_identical_sequence(seed in any::<u64>(), advance in 0usize..100) {
            let mut rng1 = Pcg32::seed_from_u64(seed);

            // Advance RNG by some amount
            for _ in 0..advance {
                let _ = rng1.next_u32();
            }

            // Clone at this point
            let mut rng2 = rng1.clone();

            // Both should produce identical values going forward
            for _ in 0..50 {
                prop_assert_eq!(
                    rng1.next_u32(), rng2.next_u32(),
                    "Cloned RNG must produce identical sequence"
                );
            }
        }
    }
}
