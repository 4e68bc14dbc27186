//! Metrics emitted through the `metrics` facade.
//!
//! The library never installs a recorder; whichever exporter the host
//! process installs receives these series.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "query_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "query_cache_misses_total";
    pub const QUERY_DURATION_SECONDS: &str = "query_cache_query_duration_seconds";
    pub const LOCAL_ENTRIES: &str = "query_cache_local_entries";
    pub const EVICTIONS_TOTAL: &str = "query_cache_evictions_total";
    pub const REMOTE_ERRORS_TOTAL: &str = "query_cache_remote_errors_total";
    pub const INVALIDATIONS_TOTAL: &str = "query_cache_invalidations_total";
}

/// Record a cache hit on `tier` ("local" or "remote").
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a miss in both tiers.
pub fn record_cache_miss(query_class: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "query_class" => query_class.to_string()).increment(1);
}

/// Record how long an underlying query ran.
pub fn record_query_duration(query_class: &str, duration: Duration) {
    histogram!(names::QUERY_DURATION_SECONDS, "query_class" => query_class.to_string())
        .record(duration.as_secs_f64());
}

/// Set the number of local entries.
pub fn set_local_entries(count: usize) {
    gauge!(names::LOCAL_ENTRIES).set(count as f64);
}

/// Record entries dropped from the local store.
pub fn record_evictions(reason: &'static str, count: usize) {
    counter!(names::EVICTIONS_TOTAL, "reason" => reason).increment(count as u64);
}

/// Record a failed remote operation.
pub fn record_remote_error(op: &'static str) {
    counter!(names::REMOTE_ERRORS_TOTAL, "op" => op).increment(1);
}

/// Record entries removed by invalidation.
pub fn record_invalidations(count: usize) {
    counter!(names::INVALIDATIONS_TOTAL).increment(count as u64);
}
