//! Remote (L2) store adapters.
//!
//! The remote tier is shared by every process instance. Adapters never
//! surface failures as errors on the read/write path: a failed call marks the
//! adapter unavailable, and while unavailable every call is a no-op that
//! reports a miss or a write without effect. After a cool-down one probe call
//! is let through; if it succeeds the adapter is available again.
//!
//! ## Adapters
//!
//! - [`RedisStore`]: Redis via a `deadpool-redis` pool
//! - [`MemoryRemoteStore`]: in-process stand-in with the same semantics
//! - [`DisabledRemote`]: local-only mode

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RedisConfig;
use crate::entry::Selector;
use crate::error::CacheError;

pub use memory::MemoryRemoteStore;
pub use redis_store::RedisStore;

/// Outcome of a pattern delete against the remote tier.
#[derive(Debug, Default)]
pub struct RemoteRemoval {
    /// Keys actually deleted.
    pub removed: usize,
    /// Set when the operation stopped early; `removed` is still accurate.
    pub error: Option<CacheError>,
}

impl RemoteRemoval {
    pub fn done(removed: usize) -> Self {
        Self {
            removed,
            error: None,
        }
    }

    /// Nothing removed because the call itself failed.
    pub fn failed(error: CacheError) -> Self {
        Self {
            removed: 0,
            error: Some(error),
        }
    }
}

/// Shared key-value store holding serialized entries under full remote keys
/// (`query:cache:<hash>`).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the raw entry stored under `key`.
    ///
    /// Returns `None` on a miss and whenever the store is unavailable.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key` with a server-side expiry of `ttl`.
    ///
    /// Returns whether the write took effect.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool;

    /// Delete every key in the cache namespace that `selector` matches by
    /// key or entry metadata.
    async fn delete_matching(&self, selector: Selector<'_>) -> RemoteRemoval;

    /// Delete every key in the cache namespace.
    async fn clear_namespace(&self) -> RemoteRemoval;

    /// Whether calls are currently being attempted.
    fn is_available(&self) -> bool;

    /// Short name for logs and status output.
    fn mode(&self) -> &'static str;

    /// Release connections. Later calls behave as if unavailable.
    async fn shutdown(&self) {}
}

/// Remote tier used when Redis is disabled: every call is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRemote;

#[async_trait]
impl RemoteStore for DisabledRemote {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> bool {
        false
    }

    async fn delete_matching(&self, _selector: Selector<'_>) -> RemoteRemoval {
        RemoteRemoval::default()
    }

    async fn clear_namespace(&self) -> RemoteRemoval {
        RemoteRemoval::default()
    }

    fn is_available(&self) -> bool {
        false
    }

    fn mode(&self) -> &'static str {
        "disabled"
    }
}

/// Availability state machine shared by the adapters.
///
/// `Available --failure--> Unavailable --cool-down elapsed--> probe`
#[derive(Debug)]
pub struct Availability {
    available: AtomicBool,
    down_since: Mutex<Option<Instant>>,
    reconnect_after: Duration,
}

impl Availability {
    pub fn new(reconnect_after: Duration) -> Self {
        Self {
            available: AtomicBool::new(true),
            down_since: Mutex::new(None),
            reconnect_after,
        }
    }

    /// Start in the unavailable state (e.g. the startup probe failed).
    pub fn new_unavailable(reconnect_after: Duration) -> Self {
        Self {
            available: AtomicBool::new(false),
            down_since: Mutex::new(Some(Instant::now())),
            reconnect_after,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Whether a call should be attempted now. While unavailable, only the
    /// first caller after the cool-down gets `true`; the cool-down restarts
    /// from that moment.
    pub fn should_attempt(&self) -> bool {
        if self.is_available() {
            return true;
        }
        let mut down_since = self.down_since.lock();
        let now = Instant::now();
        match *down_since {
            Some(since) if now.duration_since(since) < self.reconnect_after => false,
            _ => {
                *down_since = Some(now);
                true
            }
        }
    }

    /// Record a successful call.
    pub fn mark_success(&self) {
        if !self.available.swap(true, Ordering::AcqRel) {
            *self.down_since.lock() = None;
            tracing::info!("remote cache tier available again");
        }
    }

    /// Record a failed call. Logged once per transition to unavailable.
    pub fn mark_failure(&self, op: &'static str, error: &CacheError) {
        crate::metrics::record_remote_error(op);
        *self.down_since.lock() = Some(Instant::now());
        if self.available.swap(false, Ordering::AcqRel) {
            tracing::warn!(
                op,
                error = %error,
                retry_after_secs = self.reconnect_after.as_secs(),
                "remote cache tier unavailable, continuing with local cache only"
            );
        }
    }

    /// Force the unavailable state without counting an error.
    pub fn disable(&self) {
        self.available.store(false, Ordering::Release);
        *self.down_since.lock() = Some(Instant::now());
    }
}

/// Create the remote tier from configuration.
///
/// ## Graceful Degradation
///
/// - **Redis disabled**: returns [`DisabledRemote`]
/// - **Invalid configuration**: logs a warning and returns [`DisabledRemote`]
/// - **Redis unreachable**: returns a [`RedisStore`] that starts unavailable
///   and keeps probing on its cool-down, so startup never blocks on Redis
pub async fn create_remote_store(config: &RedisConfig) -> Arc<dyn RemoteStore> {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return Arc::new(DisabledRemote);
    }

    tracing::info!(url = %config.redacted_url(), "Connecting to Redis");

    let store = match RedisStore::from_config(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return Arc::new(DisabledRemote);
        }
    };

    match store.ping().await {
        Ok(()) => tracing::info!("Connected to Redis"),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Continuing with local cache only."
            );
            store.availability().disable();
        }
    }

    Arc::new(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_availability_transitions() {
        let availability = Availability::new(Duration::from_secs(30));
        assert!(availability.should_attempt());

        availability.mark_failure("get", &CacheError::remote("connection refused"));
        assert!(!availability.is_available());
        assert!(!availability.should_attempt());

        tokio::time::advance(Duration::from_secs(31)).await;
        // One probe after the cool-down, then closed again until it resolves
        assert!(availability.should_attempt());
        assert!(!availability.should_attempt());

        availability.mark_success();
        assert!(availability.is_available());
        assert!(availability.should_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_unavailable() {
        let availability = Availability::new_unavailable(Duration::from_secs(5));
        assert!(!availability.should_attempt());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(availability.should_attempt());
    }

    #[tokio::test]
    async fn test_disabled_remote_is_noop() {
        let remote = DisabledRemote;
        assert!(!remote.set("query:cache:a", "{}", Duration::from_secs(1)).await);
        assert!(remote.get("query:cache:a").await.is_none());
        assert_eq!(remote.delete_matching(Selector::Pattern("a")).await.removed, 0);
        assert!(!remote.is_available());
    }

    #[tokio::test]
    async fn test_create_disabled() {
        let remote = create_remote_store(&RedisConfig::default()).await;
        assert_eq!(remote.mode(), "disabled");
        assert!(!remote.is_available());
    }
}
