//! Runtime configuration for the echo server.
//!
//! The server never caches its configuration: every iteration of the receive
//! loop asks its [`RuntimeConfigProvider`] for a fresh [`ConfigSnapshot`], so
//! an operator edit (new listen port, loss toggled on, delay changed) applies
//! to the very next packet without a restart. [`SharedRuntimeConfig`] is the
//! provided live implementation: a cloneable handle the operator mutates from
//! one thread while the server snapshots it from another.
//!
//! # Example
//!
//! ```
//! use pingfort::config::{ConfigSnapshot, RuntimeConfigProvider, SharedRuntimeConfig};
//!
//! let config = SharedRuntimeConfig::new(ConfigSnapshot::new(9977));
//!
//! // Operator turns on 25% loss; the next snapshot sees it
//! config.set_loss_enabled(true);
//! config.set_loss_percent(25);
//!
//! let snapshot = config.snapshot();
//! assert!(snapshot.loss.enabled);
//! assert_eq!(snapshot.loss.percent, 25);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Listen port used when the operator never chooses one.
pub const DEFAULT_LISTEN_PORT: u16 = 9977;

/// Fixed pause applied when delay injection is first enabled.
pub const DEFAULT_FIXED_DELAY: Duration = Duration::from_millis(1000);

/// Exclusive upper bound of a random per-packet delay, in milliseconds.
pub const RANDOM_DELAY_BOUND_MILLIS: u64 = 1000;

/// How a delayed packet's pause is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelayMode {
    /// Every delayed packet pauses for the same duration.
    Fixed(Duration),
    /// Every delayed packet pauses for a fresh uniform draw in
    /// `[0, RANDOM_DELAY_BOUND_MILLIS)` milliseconds.
    Random,
}

impl Default for DelayMode {
    fn default() -> Self {
        Self::Fixed(DEFAULT_FIXED_DELAY)
    }
}

/// Probabilistic packet loss settings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LossConfig {
    /// Whether the loss gate runs at all.
    pub enabled: bool,
    /// Chance in `[0, 100]` that a packet is dropped. 100 drops everything,
    /// 0 drops nothing.
    pub percent: u8,
}

/// Per-packet delay settings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Whether the delay gate runs at all.
    pub enabled: bool,
    /// How the pause is chosen when the gate runs.
    pub mode: DelayMode,
}

/// One receive-loop iteration's immutable view of the configuration.
///
/// # Example
///
/// ```
/// use pingfort::config::{ConfigSnapshot, DelayMode};
/// use std::time::Duration;
///
/// // A server that drops a quarter of its traffic and delays the rest
/// let snapshot = ConfigSnapshot::new(9977)
///     .with_loss(25)
///     .with_fixed_delay(Duration::from_millis(150));
/// assert!(snapshot.loss.enabled);
/// assert!(matches!(snapshot.delay.mode, DelayMode::Fixed(_)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[must_use = "ConfigSnapshot has no effect unless served through a RuntimeConfigProvider"]
pub struct ConfigSnapshot {
    /// UDP port the server should be listening on.
    pub listen_port: u16,
    /// Loss gate settings.
    pub loss: LossConfig,
    /// Delay gate settings.
    pub delay: DelayConfig,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN_PORT)
    }
}

impl ConfigSnapshot {
    /// Creates a snapshot with both fault gates disabled.
    pub const fn new(listen_port: u16) -> Self {
        Self {
            listen_port,
            loss: LossConfig {
                enabled: false,
                percent: 0,
            },
            delay: DelayConfig {
                enabled: false,
                mode: DelayMode::Fixed(DEFAULT_FIXED_DELAY),
            },
        }
    }

    /// Enables the loss gate at the given percentage, clamped to `[0, 100]`.
    pub fn with_loss(mut self, percent: u8) -> Self {
        self.loss = LossConfig {
            enabled: true,
            percent: percent.min(100),
        };
        self
    }

    /// Enables the delay gate with a fixed per-packet pause.
    pub const fn with_fixed_delay(mut self, pause: Duration) -> Self {
        self.delay = DelayConfig {
            enabled: true,
            mode: DelayMode::Fixed(pause),
        };
        self
    }

    /// Enables the delay gate with a fresh random pause per packet.
    pub const fn with_random_delay(mut self) -> Self {
        self.delay = DelayConfig {
            enabled: true,
            mode: DelayMode::Random,
        };
        self
    }
}

/// Source of the configuration the server re-reads every receive cycle.
///
/// Implementations must be cheap: the server calls [`snapshot`] once per loop
/// iteration, which under load means once per packet.
///
/// [`snapshot`]: Self::snapshot
pub trait RuntimeConfigProvider: Send + Sync {
    /// Returns the configuration the next iteration should run under.
    fn snapshot(&self) -> ConfigSnapshot;
}

/// A fixed snapshot is its own provider. Handy for servers whose
/// configuration never changes, and for tests.
impl RuntimeConfigProvider for ConfigSnapshot {
    fn snapshot(&self) -> ConfigSnapshot {
        *self
    }
}

/// Live, shared server configuration.
///
/// Cloning is cheap and every clone addresses the same underlying values, so
/// an operator console can hold one handle while the server holds another.
/// Scalar fields are independent atomics; only the delay mode (a compound
/// value) sits behind a lock.
#[derive(Debug, Clone, Default)]
pub struct SharedRuntimeConfig {
    inner: Arc<SharedConfigInner>,
}

#[derive(Debug)]
struct SharedConfigInner {
    listen_port: AtomicU16,
    loss_enabled: AtomicBool,
    loss_percent: AtomicU8,
    delay_enabled: AtomicBool,
    delay_mode: RwLock<DelayMode>,
}

impl Default for SharedConfigInner {
    fn default() -> Self {
        Self::from_snapshot(ConfigSnapshot::default())
    }
}

impl SharedConfigInner {
    fn from_snapshot(snapshot: ConfigSnapshot) -> Self {
        Self {
            listen_port: AtomicU16::new(snapshot.listen_port),
            loss_enabled: AtomicBool::new(snapshot.loss.enabled),
            loss_percent: AtomicU8::new(snapshot.loss.percent.min(100)),
            delay_enabled: AtomicBool::new(snapshot.delay.enabled),
            delay_mode: RwLock::new(snapshot.delay.mode),
        }
    }
}

impl SharedRuntimeConfig {
    /// Creates a live configuration seeded from a snapshot.
    #[must_use]
    pub fn new(initial: ConfigSnapshot) -> Self {
        Self {
            inner: Arc::new(SharedConfigInner::from_snapshot(initial)),
        }
    }

    /// Changes the listen port. The server rebinds on its next iteration.
    pub fn set_listen_port(&self, port: u16) {
        self.inner.listen_port.store(port, Ordering::Relaxed);
    }

    /// Turns the loss gate on or off.
    pub fn set_loss_enabled(&self, enabled: bool) {
        self.inner.loss_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Sets the loss chance, clamped to `[0, 100]`.
    pub fn set_loss_percent(&self, percent: u8) {
        self.inner
            .loss_percent
            .store(percent.min(100), Ordering::Relaxed);
    }

    /// Turns the delay gate on or off.
    pub fn set_delay_enabled(&self, enabled: bool) {
        self.inner.delay_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Changes how delayed packets pause.
    pub fn set_delay_mode(&self, mode: DelayMode) {
        *self.inner.delay_mode.write() = mode;
    }
}

impl RuntimeConfigProvider for SharedRuntimeConfig {
    fn snapshot(&self) -> ConfigSnapshot {
        // Fields are independent scalars; per-field relaxed loads are enough
        // for operator-console consistency.
        ConfigSnapshot {
            listen_port: self.inner.listen_port.load(Ordering::Relaxed),
            loss: LossConfig {
                enabled: self.inner.loss_enabled.load(Ordering::Relaxed),
                percent: self.inner.loss_percent.load(Ordering::Relaxed),
            },
            delay: DelayConfig {
                enabled: self.inner.delay_enabled.load(Ordering::Relaxed),
                mode: *self.inner.delay_mode.read(),
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
    fn test_snapshot_default() {
        let snapshot = ConfigSnapshot::default();
        assert_eq!(snapshot.listen_port, DEFAULT_LISTEN_PORT);
        assert!(!snapshot.loss.enabled);
        assert_eq!(snapshot.loss.percent, 0);
        assert!(!snapshot.delay.enabled);
        assert_eq!(snapshot.delay.mode, DelayMode::Fixed(DEFAULT_FIXED_DELAY));
    }

    #[test]
    fn test_snapshot_builders() {
        let snapshot = ConfigSnapshot::new(4000)
            .with_loss(30)
            .with_fixed_delay(Duration::from_millis(250));

        assert_eq!(snapshot.listen_port, 4000);
        assert_eq!(
            snapshot.loss,
            LossConfig {
                enabled: true,
                percent: 30
            }
        );
        assert_eq!(
            snapshot.delay,
            DelayConfig {
                enabled: true,
                mode: DelayMode::Fixed(Duration::from_millis(250))
            }
        );
    }

    #[test]
    fn test_snapshot_with_loss_clamps() {
        let snapshot = ConfigSnapshot::new(4000).with_loss(250);
        assert_eq!(snapshot.loss.percent, 100);
    }

    #[test]
    fn test_snapshot_with_random_delay() {
        let snapshot = ConfigSnapshot::new(4000).with_random_delay();
        assert!(snapshot.delay.enabled);
        assert_eq!(snapshot.delay.mode, DelayMode::Random);
    }

    #[test]
    fn test_snapshot_is_its_own_provider() {
        let snapshot = ConfigSnapshot::new(5111).with_loss(10);
        assert_eq!(RuntimeConfigProvider::snapshot(&snapshot), snapshot);
    }

    #[test]
    fn test_shared_config_round_trip() {
        let initial = ConfigSnapshot::new(6001)
            .with_loss(40)
            .with_random_delay();
        let config = SharedRuntimeConfig::new(initial);
        assert_eq!(config.snapshot(), initial);
    }

    #[test]
    fn test_shared_config_mutators() {
        let config = SharedRuntimeConfig::new(ConfigSnapshot::new(6001));

        config.set_listen_port(6002);
        config.set_loss_enabled(true);
        config.set_loss_percent(15);
        config.set_delay_enabled(true);
        config.set_delay_mode(DelayMode::Fixed(Duration::from_millis(75)));

        let snapshot = config.snapshot();
        assert_eq!(snapshot.listen_port, 6002);
        assert_eq!(
            snapshot.loss,
            LossConfig {
                enabled: true,
                percent: 15
            }
        );
        assert_eq!(
            snapshot.delay,
            DelayConfig {
                enabled: true,
                mode: DelayMode::Fixed(Duration::from_millis(75))
            }
        );
    }

    #[test]
    fn test_shared_config_clamps_loss_percent() {
        let config = SharedRuntimeConfig::default();
        config.set_loss_percent(101);
        assert_eq!(config.snapshot().loss.percent, 100);

        let seeded = SharedRuntimeConfig::new(ConfigSnapshot {
            listen_port: 1,
            loss: LossConfig {
                enabled: true,
                percent: 255,
            },
            delay: DelayConfig::default(),
        });
        assert_eq!(seeded.snapshot().loss.percent, 100);
    }

    #[test]
    fn test_clones_share_state() {
        let operator = SharedRuntimeConfig::new(ConfigSnapshot::new(6001));
        let server_side = operator.clone();

        operator.set_listen_port(7000);
        assert_eq!(server_side.snapshot().listen_port, 7000);
    }

    #[test]
    fn test_edits_visible_across_threads() {
        let config = SharedRuntimeConfig::new(ConfigSnapshot::new(6001));
        let handle = config.clone();

        let editor = std::thread::spawn(move || {
            handle.set_loss_enabled(true);
            handle.set_loss_percent(90);
        });
        editor.join().unwrap();

        let snapshot = config.snapshot();
        assert!(snapshot.loss.enabled);
        assert_eq!(snapshot.loss.percent, 90);
    }
}
