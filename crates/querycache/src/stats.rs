//! Hit/miss accounting.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide counters owned by one [`QueryCache`](crate::QueryCache).
///
/// Created with the cache and reset only by
/// [`QueryCache::clear_all`](crate::QueryCache::clear_all).
#[derive(Debug, Default)]
pub struct QueryStats {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    time_saved_ms: AtomicU64,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a hit on the local tier, crediting the avoided query time.
    pub fn record_local_hit(&self, saved: Duration) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
        self.add_time_saved(saved);
    }

    /// Count a hit on the remote tier, crediting the avoided query time.
    pub fn record_remote_hit(&self, saved: Duration) {
        self.remote_hits.fetch_add(1, Ordering::Relaxed);
        self.add_time_saved(saved);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.local_hits.load(Ordering::Relaxed) + self.remote_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.local_hits.store(0, Ordering::Relaxed);
        self.remote_hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.time_saved_ms.store(0, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let local_hits = self.local_hits.load(Ordering::Relaxed);
        let remote_hits = self.remote_hits.load(Ordering::Relaxed);
        StatsSnapshot {
            hits: local_hits + remote_hits,
            local_hits,
            remote_hits,
            misses: self.misses.load(Ordering::Relaxed),
            time_saved_ms: self.time_saved_ms.load(Ordering::Relaxed),
        }
    }

    fn add_time_saved(&self, saved: Duration) {
        self.time_saved_ms
            .fetch_add(saved.as_millis() as u64, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub local_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    pub time_saved_ms: u64,
}

/// Report returned by [`QueryCache::statistics`](crate::QueryCache::statistics).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub local_hits: u64,
    pub remote_hits: u64,
    pub time_saved_ms: u64,
    /// Percentage of lookups served from either tier.
    pub hit_rate: f64,
    pub local_entries: usize,
    pub local_capacity: usize,
    pub evictions: u64,
    pub remote_available: bool,
}

impl CacheStatistics {
    pub fn from_parts(
        snapshot: StatsSnapshot,
        local_entries: usize,
        local_capacity: usize,
        evictions: u64,
        remote_available: bool,
    ) -> Self {
        Self {
            hits: snapshot.hits,
            misses: snapshot.misses,
            local_hits: snapshot.local_hits,
            remote_hits: snapshot.remote_hits,
            time_saved_ms: snapshot.time_saved_ms,
            hit_rate: hit_rate(snapshot.hits, snapshot.misses),
            local_entries,
            local_capacity,
            evictions,
            remote_available,
        }
    }
}

/// Calculate hit rate as a percentage.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        (hits as f64 / total as f64) * 100.0
    }
}
