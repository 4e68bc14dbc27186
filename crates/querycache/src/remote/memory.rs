//! In-process remote tier.
//!
//! Behaves like the Redis adapter (server-side expiry, namespace scan,
//! availability gating) without a network hop. Several [`QueryCache`]
//! instances sharing one `Arc<MemoryRemoteStore>` see each other's writes,
//! which is how multi-instance behaviour is exercised in tests.
//!
//! [`QueryCache`]: crate::QueryCache

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::{Availability, RemoteRemoval, RemoteStore};
use crate::entry::Selector;
use crate::error::{CacheError, CacheResult};
use crate::keys::REMOTE_KEY_PREFIX;

struct StoredValue {
    raw: String,
    expires_at: Instant,
}

pub struct MemoryRemoteStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    availability: Availability,
    /// When set, every attempted call fails as if the connection dropped.
    failing: AtomicBool,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::with_reconnect_after(Duration::from_secs(30))
    }

    pub fn with_reconnect_after(reconnect_after: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            availability: Availability::new(reconnect_after),
            failing: AtomicBool::new(false),
        }
    }

    /// Simulate an outage (`true`) or its end (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Raw entry stored under `key`, ignoring availability.
    pub fn raw(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|v| v.expires_at > now)
            .map(|v| v.raw.clone())
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, v)| v.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gate and fault-inject one call. `Ok(false)` means the call was
    /// skipped during a cool-down; `Err` means it was made and failed.
    fn attempt(&self, op: &'static str) -> CacheResult<bool> {
        if !self.availability.should_attempt() {
            return Ok(false);
        }
        if self.failing.load(Ordering::Acquire) {
            let error = CacheError::remote("simulated connection failure");
            self.availability.mark_failure(op, &error);
            return Err(error);
        }
        self.availability.mark_success();
        Ok(true)
    }

    /// Run a namespace removal through [`Self::attempt`].
    fn removal(&self, op: &'static str, remove: impl FnOnce() -> usize) -> RemoteRemoval {
        match self.attempt(op) {
            Ok(true) => RemoteRemoval::done(remove()),
            Ok(false) => RemoteRemoval::default(),
            Err(error) => RemoteRemoval::failed(error),
        }
    }

    fn remove_where(&self, mut predicate: impl FnMut(&str, &str) -> bool) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, v| v.expires_at > now);
        let before = entries.len();
        entries.retain(|k, v| !(k.starts_with(REMOTE_KEY_PREFIX) && predicate(k, &v.raw)));
        before - entries.len()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, key: &str) -> Option<String> {
        if !matches!(self.attempt("get"), Ok(true)) {
            return None;
        }
        self.raw(key)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        if !matches!(self.attempt("set"), Ok(true)) {
            return false;
        }
        let ttl = ttl.max(Duration::from_secs(1));
        self.entries.write().insert(
            key.to_string(),
            StoredValue {
                raw: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    async fn delete_matching(&self, selector: Selector<'_>) -> RemoteRemoval {
        self.removal("delete_matching", || {
            self.remove_where(|key, raw| selector.matches_remote(key, Some(raw)))
        })
    }

    async fn clear_namespace(&self) -> RemoteRemoval {
        self.removal("clear", || self.remove_where(|_, _| true))
    }

    fn is_available(&self) -> bool {
        self.availability.is_available()
    }

    fn mode(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_server_side_expiry() {
        let store = MemoryRemoteStore::new();
        assert!(store.set("query:cache:a", "{}", Duration::from_secs(10)).await);
        assert_eq!(store.get("query:cache:a").await.as_deref(), Some("{}"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("query:cache:a").await.is_none());
    }

    #[tokio::test]
    async fn test_namespace_is_respected() {
        let store = MemoryRemoteStore::new();
        store.set("query:cache:a", "{}", Duration::from_secs(60)).await;
        store.set("session:a", "{}", Duration::from_secs(60)).await;

        assert_eq!(store.clear_namespace().await.removed, 1);
        assert_eq!(store.keys(), vec!["session:a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_and_recovery() {
        let store = MemoryRemoteStore::with_reconnect_after(Duration::from_secs(5));
        store.set("query:cache:a", "{}", Duration::from_secs(60)).await;

        store.set_failing(true);
        assert!(store.get("query:cache:a").await.is_none());
        assert!(!store.is_available());

        // Outage over, but the adapter waits for its cool-down
        store.set_failing(false);
        assert!(store.get("query:cache:a").await.is_none());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("query:cache:a").await.as_deref(), Some("{}"));
        assert!(store.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_removal_reports_error() {
        let store = MemoryRemoteStore::with_reconnect_after(Duration::from_secs(5));
        store.set("query:cache:a", "{}", Duration::from_secs(60)).await;

        store.set_failing(true);
        let removal = store.delete_matching(Selector::Pattern("a")).await;
        assert_eq!(removal.removed, 0);
        assert!(removal.error.is_some_and(|e| e.is_remote_unavailable()));

        // Cooling down: skipped, not failed
        let removal = store.clear_namespace().await;
        assert!(removal.error.is_none());

        store.set_failing(false);
        tokio::time::advance(Duration::from_secs(6)).await;
        store.set_failing(true);
        let removal = store.clear_namespace().await;
        assert!(removal.error.is_some());
        assert_eq!(store.keys(), vec!["query:cache:a".to_string()]);
    }
}
