//! Cache activity counters for profiling and tests.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing how much work an [`ObjectCache`](crate::ObjectCache) did.
///
/// Thread-safe counters using atomic operations for lock-free updates.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Native stat calls issued by existence checks and resolution
    pub stats: AtomicU64,

    /// Registry lookups answered by a live proxy
    pub hits: AtomicU64,

    /// Registry lookups that had to consult the disk
    pub misses: AtomicU64,

    /// Proxies constructed and published
    pub nodes_created: AtomicU64,

    /// Proxies moved to the terminal invalid state
    pub nodes_invalidated: AtomicU64,

    /// Primary events fired (correlated parent events excluded)
    pub events_fired: AtomicU64,

    /// Batches processed by bulk refresh
    pub refresh_batches: AtomicU64,

    /// Registry entries dropped by eviction sweeps
    pub evictions: AtomicU64,

    /// Stream requests that had to wait at least once
    pub ticket_waits: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_stat(&self) {
        self.stats.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_created(&self) {
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalidated(&self) {
        self.nodes_invalidated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event(&self) {
        self.events_fired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch(&self) {
        self.refresh_batches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ticket_wait(&self) {
        self.ticket_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            stats: self.stats.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            nodes_created: self.nodes_created.load(Ordering::Relaxed),
            nodes_invalidated: self.nodes_invalidated.load(Ordering::Relaxed),
            events_fired: self.events_fired.load(Ordering::Relaxed),
            refresh_batches: self.refresh_batches.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            ticket_waits: self.ticket_waits.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in [
            &self.stats,
            &self.hits,
            &self.misses,
            &self.nodes_created,
            &self.nodes_invalidated,
            &self.events_fired,
            &self.refresh_batches,
            &self.evictions,
            &self.ticket_waits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time snapshot of cache metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub stats: u64,
    pub hits: u64,
    pub misses: u64,
    pub nodes_created: u64,
    pub nodes_invalidated: u64,
    pub events_fired: u64,
    pub refresh_batches: u64,
    pub evictions: u64,
    pub ticket_waits: u64,
}

impl MetricsSnapshot {
    /// Registry hit rate (0.0 to 1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Counter deltas since an earlier snapshot.
    #[must_use]
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            stats: self.stats.saturating_sub(earlier.stats),
            hits: self.hits.saturating_sub(earlier.hits),
            misses: self.misses.saturating_sub(earlier.misses),
            nodes_created: self.nodes_created.saturating_sub(earlier.nodes_created),
            nodes_invalidated: self.nodes_invalidated.saturating_sub(earlier.nodes_invalidated),
            events_fired: self.events_fired.saturating_sub(earlier.events_fired),
            refresh_batches: self.refresh_batches.saturating_sub(earlier.refresh_batches),
            evictions: self.evictions.saturating_sub(earlier.evictions),
            ticket_waits: self.ticket_waits.saturating_sub(earlier.ticket_waits),
        }
    }
}
