//! Observer surface for server-side traffic, log events, and fault counters.
//!
//! The server reports everything it does through a [`ServerObserver`]: each
//! handled datagram, each operator-facing log line, and each per-source
//! counter change. Hooks are fire-and-forget; the engine never waits on an
//! observer and never inspects a result, so a slow or failing observer can
//! degrade observability but not traffic.
//!
//! Three implementations ship with the crate:
//!
//! - [`TracingObserver`] forwards every hook to the `tracing` crate with
//!   structured fields. This is what the demo server installs.
//! - [`CollectingObserver`] stores everything in thread-safe vectors so tests
//!   and embedding UIs can assert on or render what happened.
//! - [`CompositeObserver`] fans out to any number of boxed observers.
//!
//! # Observer Contract
//!
//! Hooks run on the server's receive and worker threads. Implementations
//! must return quickly and must not panic; block here and you stall the
//! pipeline that called you.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::wire::Probe;

/// What the server knows about one received datagram's header.
///
/// Carried by [`ServerObserver::on_message_received`]. The `probe` field is
/// `None` when the payload did not parse as a probe; the datagram was still
/// counted and echoed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct HeaderSummary {
    /// Per-server ordinal of this datagram, starting at 1.
    pub message_number: u64,
    /// Address the datagram came from.
    pub source: SocketAddr,
    /// Local port the datagram arrived on.
    pub local_port: u16,
    /// Datagram length in bytes, after truncation at the receive buffer.
    pub length: usize,
    /// Decoded probe header, when the payload parsed as one.
    pub probe: Option<Probe>,
}

impl HeaderSummary {
    /// Creates a header summary for one received datagram.
    #[must_use]
    pub const fn new(
        message_number: u64,
        source: SocketAddr,
        local_port: u16,
        length: usize,
        probe: Option<Probe>,
    ) -> Self {
        Self {
            message_number,
            source,
            local_port,
            length,
            probe,
        }
    }

    /// Serializes this summary to a JSON string.
    ///
    /// Returns `None` if serialization fails (which should not happen for
    /// well-formed summaries).
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for HeaderSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            message_number,
            source,
            local_port,
            length,
            probe,
        } = self;

        write!(
            f,
            "message {} from {} to port {} ({} bytes)",
            message_number, source, local_port, length
        )?;
        match probe {
            Some(probe) => write!(f, ", probe {}", probe),
            None => write!(f, ", not a well-formed probe"),
        }
    }
}

/// One received-datagram notification, as stored by [`CollectingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Address the datagram came from.
    pub source: SocketAddr,
    /// The header summary the observer was handed.
    pub header: HeaderSummary,
    /// Lossy UTF-8 rendering of the datagram bytes.
    pub payload: String,
}

/// One counter-update notification, as stored by [`CollectingObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Source address the counters belong to.
    pub source: IpAddr,
    /// Packets delayed for this source so far.
    pub delayed: u64,
    /// Packets dropped for this source so far.
    pub dropped: u64,
}

/// Trait for observing server-side activity.
///
/// All hooks default to no-ops, so implementations override only what they
/// care about. Observers are shared across the server's threads and must be
/// `Send + Sync`.
///
/// # Example
///
/// ```
/// use pingfort::observer::{HeaderSummary, ServerObserver};
/// use std::net::SocketAddr;
///
/// struct DropLogger;
///
/// impl ServerObserver for DropLogger {
///     fn on_log_event(&self, event: &str) {
///         // Forward to a UI, a metrics pipeline, etc.
///         let _ = event;
///     }
/// }
/// ```
pub trait ServerObserver: Send + Sync {
    /// Called once per handled datagram, before the echo is sent.
    ///
    /// This method should be relatively quick to execute; it runs on the
    /// worker that is about to send the echo.
    fn on_message_received(&self, source: SocketAddr, header: &HeaderSummary, payload: &str) {
        let _ = (source, header, payload);
    }

    /// Called for operator-facing events: injected drops and delays, bind
    /// failures, send failures, lifecycle transitions.
    fn on_log_event(&self, event: &str) {
        let _ = event;
    }

    /// Called whenever a source's fault counters change.
    fn on_stats_updated(&self, source: IpAddr, delayed: u64, dropped: u64) {
        let _ = (source, delayed, dropped);
    }
}

/// Built-in observer that forwards every hook to the `tracing` crate.
///
/// # Log Levels
///
/// - received datagrams → `tracing::info!`
/// - log events → `tracing::info!`
/// - counter updates → `tracing::debug!` (they accompany a log event anyway)
///
/// All fields are output as structured tracing fields, compatible with JSON
/// logging formatters (like `tracing-subscriber`'s JSON layer) and log
/// aggregation systems.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ServerObserver for TracingObserver {
    fn on_message_received(&self, source: SocketAddr, header: &HeaderSummary, payload: &str) {
        tracing::info!(
            message_number = header.message_number,
            %source,
            local_port = header.local_port,
            length = header.length,
            payload,
            "received datagram"
        );
    }

    fn on_log_event(&self, event: &str) {
        tracing::info!("{}", event);
    }

    fn on_stats_updated(&self, source: IpAddr, delayed: u64, dropped: u64) {
        tracing::debug!(%source, delayed, dropped, "fault counters updated");
    }
}

/// Built-in observer that collects everything for testing.
///
/// This observer stores all notifications in thread-safe vectors, allowing
/// tests to assert on exactly what the server reported.
///
/// # Example
///
/// ```
/// use pingfort::observer::{CollectingObserver, ServerObserver};
///
/// let observer = CollectingObserver::new();
/// observer.on_log_event("simulated drop");
///
/// assert_eq!(observer.log_events(), vec!["simulated drop".to_owned()]);
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    messages: Mutex<Vec<MessageRecord>>,
    log_events: Mutex<Vec<String>>,
    counter_updates: Mutex<Vec<CounterRecord>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer with nothing recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every received-datagram notification, in order.
    #[must_use]
    pub fn messages(&self) -> Vec<MessageRecord> {
        self.messages.lock().clone()
    }

    /// Returns a copy of every log event, in order.
    #[must_use]
    pub fn log_events(&self) -> Vec<String> {
        self.log_events.lock().clone()
    }

    /// Returns a copy of every counter update, in order.
    #[must_use]
    pub fn counter_updates(&self) -> Vec<CounterRecord> {
        self.counter_updates.lock().clone()
    }

    /// Returns the most recent counter update for the given source, if any.
    #[must_use]
    pub fn last_counters_for(&self, source: IpAddr) -> Option<CounterRecord> {
        self.counter_updates
            .lock()
            .iter()
            .rev()
            .find(|record| record.source == source)
            .copied()
    }

    /// Checks whether any collected log event contains the given fragment.
    #[must_use]
    pub fn has_log_containing(&self, fragment: &str) -> bool {
        self.log_events
            .lock()
            .iter()
            .any(|event| event.contains(fragment))
    }

    /// True when nothing at all has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
            && self.log_events.lock().is_empty()
            && self.counter_updates.lock().is_empty()
    }

    /// Clears everything recorded so far.
    pub fn clear(&self) {
        self.messages.lock().clear();
        self.log_events.lock().clear();
        self.counter_updates.lock().clear();
    }
}

impl ServerObserver for CollectingObserver {
    fn on_message_received(&self, source: SocketAddr, header: &HeaderSummary, payload: &str) {
        self.messages.lock().push(MessageRecord {
            source,
            header: *header,
            payload: payload.to_owned(),
        });
    }

    fn on_log_event(&self, event: &str) {
        self.log_events.lock().push(event.to_owned());
    }

    fn on_stats_updated(&self, source: IpAddr, delayed: u64, dropped: u64) {
        self.counter_updates.lock().push(CounterRecord {
            source,
            delayed,
            dropped,
        });
    }
}

/// A composite observer that forwards every hook to multiple observers.
///
/// Useful when you want to both log activity and collect it for testing, or
/// when a UI and a metrics pipeline both need the stream.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ServerObserver>>,
}

impl CompositeObserver {
    /// Creates a new composite observer with no child observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Adds an observer to the composite.
    pub fn add(&mut self, observer: Arc<dyn ServerObserver>) {
        self.observers.push(observer);
    }

    /// Creates a composite observer from a list of observers.
    #[must_use]
    pub fn from_observers(observers: Vec<Arc<dyn ServerObserver>>) -> Self {
        Self { observers }
    }
}

impl ServerObserver for CompositeObserver {
    fn on_message_received(&self, source: SocketAddr, header: &HeaderSummary, payload: &str) {
        for observer in &self.observers {
            observer.on_message_received(source, header, payload);
        }
    }

    fn on_log_event(&self, event: &str) {
        for observer in &self.observers {
            observer.on_log_event(event);
        }
    }

    fn on_stats_updated(&self, source: IpAddr, delayed: u64, dropped: u64) {
        for observer in &self.observers {
            observer.on_stats_updated(source, delayed, dropped);
        }
    }
}

impl std::fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("num_observers", &self.observers.len())
            .finish()
    }
}

/// An `Arc`-wrapped observer observes too, so callers can hand the server a
/// clone and keep their own handle for inspection.
impl<T> ServerObserver for Arc<T>
where
    T: ServerObserver + ?Sized,
{
    fn on_message_received(&self, source: SocketAddr, header: &HeaderSummary, payload: &str) {
        self.as_ref().on_message_received(source, header, payload);
    }

    fn on_log_event(&self, event: &str) {
        self.as_ref().on_log_event(event);
    }

    fn on_stats_updated(&self, source: IpAddr, delayed: u64, dropped: u64) {
        self.as_ref().on_stats_updated(source, delayed, dropped);
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
    use crate::SequenceId;

    fn source() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn summary(message_number: u64) -> HeaderSummary {
        HeaderSummary::new(
            message_number,
            source(),
            9977,
            24,
            Some(Probe::new(SequenceId::new(3), 400)),
        )
    }

    #[test]
    fn test_default_hooks_are_no_ops() {
        struct Silent;
        impl ServerObserver for Silent {}

        let observer = Silent;
        observer.on_message_received(source(), &summary(1), "PingUDP 3 400");
        observer.on_log_event("nothing happens");
        observer.on_stats_updated(source().ip(), 1, 2);
    }

    #[test]
    fn test_header_summary_display_with_probe() {
        let display = summary(7).to_string();
        assert_eq!(
            display,
            "message 7 from 127.0.0.1:50000 to port 9977 (24 bytes), probe PingUDP 3 400"
        );
    }

    #[test]
    fn test_header_summary_display_without_probe() {
        let header = HeaderSummary::new(2, source(), 9977, 5, None);
        assert_eq!(
            header.to_string(),
            "message 2 from 127.0.0.1:50000 to port 9977 (5 bytes), not a well-formed probe"
        );
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_header_summary_to_json() {
        let json = summary(7).to_json().unwrap();
        assert!(json.contains(r#""message_number":7"#));
        assert!(json.contains(r#""local_port":9977"#));
    }

    #[test]
    fn test_collecting_observer_records_everything() {
        let observer = CollectingObserver::new();
        assert!(observer.is_empty());

        observer.on_message_received(source(), &summary(1), "PingUDP 3 400");
        observer.on_log_event("simulated delay of 120 ms");
        observer.on_stats_updated(source().ip(), 1, 0);

        let messages = observer.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].source, source());
        assert_eq!(messages[0].header, summary(1));
        assert_eq!(messages[0].payload, "PingUDP 3 400");

        assert!(observer.has_log_containing("simulated delay"));
        assert_eq!(
            observer.counter_updates(),
            vec![CounterRecord {
                source: source().ip(),
                delayed: 1,
                dropped: 0
            }]
        );
        assert!(!observer.is_empty());
    }

    #[test]
    fn test_collecting_observer_clear() {
        let observer = CollectingObserver::new();
        observer.on_log_event("one");
        observer.on_stats_updated(source().ip(), 0, 1);

        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn test_last_counters_for_returns_latest() {
        let observer = CollectingObserver::new();
        let other: IpAddr = "10.0.0.9".parse().unwrap();

        observer.on_stats_updated(source().ip(), 1, 0);
        observer.on_stats_updated(other, 0, 5);
        observer.on_stats_updated(source().ip(), 2, 0);

        assert_eq!(
            observer.last_counters_for(source().ip()),
            Some(CounterRecord {
                source: source().ip(),
                delayed: 2,
                dropped: 0
            })
        );
        assert_eq!(
            observer.last_counters_for(other),
            Some(CounterRecord {
                source: other,
                delayed: 0,
                dropped: 5
            })
        );
        assert_eq!(observer.last_counters_for("192.168.1.1".parse().unwrap()), None);
    }

    #[test]
    fn test_composite_observer_fans_out() {
        let first = Arc::new(CollectingObserver::new());
        let second = Arc::new(CollectingObserver::new());

        let mut composite = CompositeObserver::new();
        composite.add(first.clone());
        composite.add(second.clone());

        composite.on_log_event("fan out");
        composite.on_stats_updated(source().ip(), 3, 4);

        for observer in [&first, &second] {
            assert!(observer.has_log_containing("fan out"));
            assert_eq!(observer.counter_updates().len(), 1);
        }
    }

    #[test]
    fn test_composite_observer_debug() {
        let mut composite = CompositeObserver::new();
        composite.add(Arc::new(CollectingObserver::new()));

        let debug = format!("{:?}", composite);
        assert!(debug.contains("CompositeObserver"));
        assert!(debug.contains("num_observers: 1"));
    }

    #[test]
    fn test_tracing_observer_hooks_do_not_panic() {
        let observer = TracingObserver::new();
        observer.on_message_received(source(), &summary(1), "PingUDP 3 400");
        observer.on_log_event("bind failed, keeping previous port");
        observer.on_stats_updated(source().ip(), 9, 9);
    }

    #[test]
    fn test_collecting_observer_is_thread_safe() {
        let observer = Arc::new(CollectingObserver::new());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let observer = observer.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        observer.on_log_event(&format!("worker {} event {}", worker, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(observer.log_events().len(), 200);
    }
}
