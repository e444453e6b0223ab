//! Per-source fault counters.
//!
//! The server keeps one [`FaultCounters`] entry per source IP address,
//! created lazily on first contact and never deleted for the life of the
//! server. Increments are atomic, so the receive loop, the workers, and any
//! snapshot reader can touch an entry without coordination beyond the table
//! lock used for entry lookup.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::observer::CounterRecord;

/// Fault counters for a single source address.
#[derive(Debug, Default)]
pub struct FaultCounters {
    delayed: AtomicU64,
    dropped: AtomicU64,
}

impl FaultCounters {
    /// Creates a zeroed counter pair.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one delayed packet and returns the new total.
    pub fn record_delayed(&self) -> u64 {
        self.delayed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Counts one dropped packet and returns the new total.
    pub fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Packets delayed so far.
    #[must_use]
    pub fn delayed(&self) -> u64 {
        self.delayed.load(Ordering::Relaxed)
    }

    /// Packets dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Concurrent table of fault counters keyed by source IP address.
///
/// Entries for different sources are fully independent; two clients pinging
/// the same server never share a counter pair.
#[derive(Debug, Default)]
pub struct StatsTable {
    entries: RwLock<BTreeMap<IpAddr, Arc<FaultCounters>>>,
}

impl StatsTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counters for a source, creating them on first contact.
    #[must_use]
    pub fn entry(&self, source: IpAddr) -> Arc<FaultCounters> {
        if let Some(counters) = self.entries.read().get(&source) {
            return counters.clone();
        }
        self.entries
            .write()
            .entry(source)
            .or_insert_with(|| Arc::new(FaultCounters::new()))
            .clone()
    }

    /// Number of sources seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no source has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copies every source's counters, in ascending address order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CounterRecord> {
        self.entries
            .read()
            .iter()
            .map(|(source, counters)| CounterRecord {
                source: *source,
                delayed: counters.delayed(),
                dropped: counters.dropped(),
            })
            .collect()
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

    fn addr(last_octet: u8) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, last_octet))
    }

    #[test]
    fn test_counters_start_at_zero() {
        let counters = FaultCounters::new();
        assert_eq!(counters.delayed(), 0);
        assert_eq!(counters.dropped(), 0);
    }

    #[test]
    fn test_record_returns_new_total() {
        let counters = FaultCounters::new();
        assert_eq!(counters.record_delayed(), 1);
        assert_eq!(counters.record_delayed(), 2);
        assert_eq!(counters.record_dropped(), 1);
        assert_eq!(counters.delayed(), 2);
        assert_eq!(counters.dropped(), 1);
    }

    #[test]
    fn test_entry_created_lazily() {
        let table = StatsTable::new();
        assert!(table.is_empty());

        let _ = table.entry(addr(1));
        assert_eq!(table.len(), 1);

        // Same source reuses the same entry
        let first = table.entry(addr(1));
        let again = table.entry(addr(1));
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_sources_never_share_counters() {
        let table = StatsTable::new();

        table.entry(addr(1)).record_dropped();
        table.entry(addr(2)).record_delayed();
        table.entry(addr(2)).record_delayed();

        assert_eq!(table.entry(addr(1)).dropped(), 1);
        assert_eq!(table.entry(addr(1)).delayed(), 0);
        assert_eq!(table.entry(addr(2)).dropped(), 0);
        assert_eq!(table.entry(addr(2)).delayed(), 2);
    }

    #[test]
    fn test_snapshot_is_sorted_by_source() {
        let table = StatsTable::new();
        table.entry(addr(9)).record_dropped();
        table.entry(addr(1)).record_delayed();
        table.entry(addr(5)).record_dropped();

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].source, addr(1));
        assert_eq!(snapshot[1].source, addr(5));
        assert_eq!(snapshot[2].source, addr(9));
        assert_eq!(snapshot[0].delayed, 1);
        assert_eq!(snapshot[1].dropped, 1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let table = Arc::new(StatsTable::new());
        let per_thread = 500;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        table.entry(addr(1)).record_delayed();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.entry(addr(1)).delayed(), 4 * per_thread);
        assert_eq!(table.len(), 1);
    }
}
