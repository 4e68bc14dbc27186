//! Process-local (L1) store.
//!
//! A bounded map from [`CacheKey`] to value, each entry carrying an absolute
//! expiry. Entries are also indexed by expiry so that both the periodic sweep
//! and capacity eviction touch the soonest-to-expire entries first without a
//! full scan.
//!
//! Time is read from `tokio::time::Instant`, so tests running on a paused
//! runtime can move the clock with `tokio::time::advance`.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::time::{Duration, Instant};

use crate::entry::Selector;
use crate::keys::CacheKey;

/// Metadata stored alongside a local value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMeta {
    /// Canonical `class|params` string, matched by pattern invalidation.
    pub descriptor: String,
    /// How long the query that produced the value took.
    pub execution: Duration,
}

impl EntryMeta {
    pub fn new(descriptor: impl Into<String>, execution: Duration) -> Self {
        Self {
            descriptor: descriptor.into(),
            execution,
        }
    }
}

#[derive(Debug, Clone)]
struct LocalEntry<V> {
    value: V,
    expires_at: Instant,
    meta: EntryMeta,
}

/// A live value returned from [`LocalStore::get`].
#[derive(Debug, Clone)]
pub struct LocalHit<V> {
    pub value: V,
    pub expires_at: Instant,
    pub execution: Duration,
}

/// Result of a [`LocalStore::sweep`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries dropped because their expiry had passed.
    pub expired: usize,
    /// Live entries dropped to get back under capacity.
    pub evicted: usize,
    /// Entries left after the pass.
    pub remaining: usize,
}

struct Inner<V> {
    entries: HashMap<CacheKey, LocalEntry<V>>,
    by_expiry: BTreeSet<(Instant, CacheKey)>,
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &CacheKey) -> Option<LocalEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.by_expiry.remove(&(entry.expires_at, key.clone()));
        Some(entry)
    }

    /// Pop the entry closest to expiry.
    fn pop_soonest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.by_expiry.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((expires_at, _)) = self.by_expiry.first() {
            if *expires_at > now {
                break;
            }
            self.pop_soonest();
            removed += 1;
        }
        removed
    }
}

/// Bounded, TTL-aware in-process store.
///
/// A single mutex guards the map and its expiry index; every operation holds
/// it only for the duration of its own lookup, insert or scan.
pub struct LocalStore<V> {
    inner: Mutex<Inner<V>>,
    capacity: usize,
    evictions: AtomicU64,
}

impl<V: Clone> LocalStore<V> {
    /// Create a store holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                by_expiry: BTreeSet::new(),
            }),
            capacity: capacity.max(1),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a live entry. An entry whose expiry has passed is removed and
    /// reported as absent.
    pub fn get(&self, key: &CacheKey) -> Option<LocalHit<V>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                return Some(LocalHit {
                    value: entry.value.clone(),
                    expires_at: entry.expires_at,
                    execution: entry.meta.execution,
                });
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.remove(key);
            drop(inner);
            self.record_evictions("expired", 1);
        }
        None
    }

    /// Insert or fully replace the entry for `key`, expiring `ttl` from now.
    ///
    /// When the store is full, expired entries are purged first; if it is
    /// still full the entry closest to expiry is evicted. A new entry that
    /// would itself expire before everything already stored is not admitted.
    /// Returns whether the value was stored.
    pub fn set(&self, key: CacheKey, value: V, ttl: Duration, meta: EntryMeta) -> bool {
        if ttl.is_zero() {
            return false;
        }
        let now = Instant::now();
        let expires_at = now + ttl;
        let mut inner = self.inner.lock();

        let replacing = inner.remove(&key).is_some();
        let mut expired = 0;
        let mut evicted = 0;

        if !replacing && inner.entries.len() >= self.capacity {
            expired = inner.purge_expired(now);
            if inner.entries.len() >= self.capacity {
                let admit = inner
                    .by_expiry
                    .first()
                    .is_none_or(|(soonest, _)| *soonest < expires_at);
                if !admit {
                    drop(inner);
                    self.record_evictions("expired", expired);
                    self.record_evictions("rejected", 1);
                    return false;
                }
                if let Some(victim) = inner.pop_soonest() {
                    tracing::trace!(key = %victim, "local entry evicted for capacity");
                    evicted = 1;
                }
            }
        }

        inner.by_expiry.insert((expires_at, key.clone()));
        inner.entries.insert(
            key,
            LocalEntry {
                value,
                expires_at,
                meta,
            },
        );
        let len = inner.entries.len();
        drop(inner);

        self.record_evictions("expired", expired);
        self.record_evictions("capacity", evicted);
        crate::metrics::set_local_entries(len);
        true
    }

    /// Remove every entry `selector` matches against its full key, hash or
    /// descriptor. Returns the removed keys.
    pub fn remove_matching(&self, selector: Selector<'_>) -> Vec<CacheKey> {
        let mut inner = self.inner.lock();
        let matched: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(key, entry)| selector.matches_local(key, &entry.meta.descriptor))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matched {
            inner.remove(key);
        }
        matched
    }

    /// Drop expired entries, then evict the soonest-to-expire entries until
    /// the store is at or under capacity.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = inner.purge_expired(now);
        let mut evicted = 0;
        while inner.entries.len() > self.capacity {
            if inner.pop_soonest().is_none() {
                break;
            }
            evicted += 1;
        }
        let remaining = inner.entries.len();
        drop(inner);

        self.record_evictions("expired", expired);
        self.record_evictions("capacity", evicted);
        crate::metrics::set_local_entries(remaining);

        SweepReport {
            expired,
            evicted,
            remaining,
        }
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.by_expiry.clear();
        drop(inner);
        crate::metrics::set_local_entries(0);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live (unexpired) entry exists for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Total entries dropped for expiry or capacity since creation.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn record_evictions(&self, reason: &'static str, count: usize) {
        if count > 0 {
            self.evictions.fetch_add(count as u64, Ordering::Relaxed);
            crate::metrics::record_evictions(reason, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: usize) -> CacheKey {
        CacheKey::from_hash(format!("k{i:04}"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_set() {
        let store = LocalStore::new(10);
        assert!(store.set(key(1), "v1", Duration::from_secs(60), EntryMeta::default()));

        let hit = store.get(&key(1)).unwrap();
        assert_eq!(hit.value, "v1");
        assert!(store.get(&key(2)).is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_boundary() {
        let store = LocalStore::new(10);
        store.set(key(1), 1u32, Duration::from_secs(300), EntryMeta::default());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(store.get(&key(1)).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get(&key(1)).is_none());
        // Lazily removed on read
        assert_eq!(store.len(), 0);
        assert_eq!(store.evictions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_at_exact_expiry_is_absent() {
        let store = LocalStore::new(10);
        store.set(key(1), 1u32, Duration::from_secs(5), EntryMeta::default());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.get(&key(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_is_whole_value() {
        let store = LocalStore::new(10);
        store.set(key(1), "old", Duration::from_secs(10), EntryMeta::default());
        store.set(key(1), "new", Duration::from_secs(100), EntryMeta::default());

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(store.get(&key(1)).unwrap().value, "new");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_keeps_latest_expiry() {
        let capacity = 5;
        let store = LocalStore::new(capacity);

        // Ten entries with shuffled TTLs; the five longest-lived must survive.
        let ttls = [70u64, 20, 90, 10, 50, 100, 30, 80, 40, 60];
        for (i, ttl) in ttls.iter().enumerate() {
            store.set(key(i), i, Duration::from_secs(*ttl), EntryMeta::default());
            assert!(store.len() <= capacity);
        }

        let mut kept: Vec<u64> = (0..ttls.len())
            .filter(|i| store.contains(&key(*i)))
            .map(|i| ttls[i])
            .collect();
        kept.sort_unstable();
        assert_eq!(kept, vec![60, 70, 80, 90, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_store_prefers_expired_over_live() {
        let store = LocalStore::new(2);
        store.set(key(1), 1, Duration::from_secs(1), EntryMeta::default());
        store.set(key(2), 2, Duration::from_secs(100), EntryMeta::default());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.set(key(3), 3, Duration::from_secs(10), EntryMeta::default()));
        assert!(store.contains(&key(2)));
        assert!(store.contains(&key(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired() {
        let store = LocalStore::new(10);
        for i in 0..3 {
            store.set(key(i), i, Duration::from_millis(10), EntryMeta::default());
        }
        store.set(key(9), 9, Duration::from_secs(60), EntryMeta::default());

        tokio::time::advance(Duration::from_millis(20)).await;
        let report = store.sweep();
        assert_eq!(report.expired, 3);
        assert_eq!(report.evicted, 0);
        assert_eq!(report.remaining, 1);
        assert_eq!(store.evictions(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_matching_checks_key_and_descriptor() {
        let store = LocalStore::new(10);
        store.set(
            CacheKey::from_hash("aaa111"),
            1,
            Duration::from_secs(60),
            EntryMeta::new(r#"dashboard_metrics|{"companyId":42}"#, Duration::ZERO),
        );
        store.set(
            CacheKey::from_hash("bbb222"),
            2,
            Duration::from_secs(60),
            EntryMeta::new(r#"dashboard_metrics|{"companyId":7}"#, Duration::ZERO),
        );
        store.set(
            CacheKey::from_hash("ccc333"),
            3,
            Duration::from_secs(60),
            EntryMeta::new("admin_analytics|{}", Duration::ZERO),
        );

        let removed = store.remove_matching(Selector::Pattern(r#""companyId":42"#));
        assert_eq!(removed, vec![CacheKey::from_hash("aaa111")]);

        let removed = store.remove_matching(Selector::Pattern("ccc"));
        assert_eq!(removed, vec![CacheKey::from_hash("ccc333")]);

        let removed = store.remove_matching(Selector::Pattern("query:cache:bbb222"));
        assert_eq!(removed, vec![CacheKey::from_hash("bbb222")]);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_query_class_is_exact() {
        let store = LocalStore::new(10);
        store.set(
            CacheKey::from_hash("aaa111"),
            1,
            Duration::from_secs(60),
            EntryMeta::new(r#"dashboard_metrics|{"companyId":42}"#, Duration::ZERO),
        );
        store.set(
            CacheKey::from_hash("bbb222"),
            2,
            Duration::from_secs(60),
            EntryMeta::new("metrics|{}", Duration::ZERO),
        );

        let removed = store.remove_matching(Selector::QueryClass("metrics"));
        assert_eq!(removed, vec![CacheKey::from_hash("bbb222")]);
        assert!(store.contains(&CacheKey::from_hash("aaa111")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_not_stored() {
        let store = LocalStore::new(10);
        assert!(!store.set(key(1), 1, Duration::ZERO, EntryMeta::default()));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let store = LocalStore::new(10);
        for i in 0..5 {
            store.set(key(i), i, Duration::from_secs(60), EntryMeta::default());
        }
        assert_eq!(store.len(), 5);
        store.clear();
        assert!(store.is_empty());
    }
}
