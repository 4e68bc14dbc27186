//! Tiered lookup orchestration.
//!
//! ## Read Path
//!
//! 1. Local tier: a live entry is returned immediately
//! 2. Remote tier: a readable entry is decoded, promoted into the local tier
//!    with a short TTL and returned
//! 3. The query runs once; on success its result is written to the local
//!    tier, then to the remote tier
//!
//! Cache failures never reach the caller. The only error [`QueryCache::run_cached`]
//! returns is the query's own, unchanged.
//!
//! Concurrent misses for the same key are not coalesced: each caller runs the
//! query and the last write wins.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::codec::Encoding;
use crate::config::{AppConfig, CacheSettings};
use crate::entry::{EncodePolicy, EntrySource, RemoteEntry, Selector};
use crate::error::{CacheError, CacheResult};
use crate::keys::{DerivedKey, KeyDeriver};
use crate::local::{EntryMeta, LocalStore};
use crate::metrics;
use crate::policy::{CachePolicy, PolicyRegistry};
use crate::remote::{DisabledRemote, RemoteStore, create_remote_store};
use crate::stats::{CacheStatistics, QueryStats};
use crate::sweeper::Sweeper;

/// Value held by the local tier. Results are stored as the caller's own type
/// so a local hit is a clone, not a deserialization.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Outcome of an invalidation call.
#[derive(Debug, Default)]
pub struct InvalidationReport {
    /// Entries removed from this process's local tier.
    pub local: usize,
    /// Keys removed from the remote tier.
    pub remote: usize,
    /// Set when the remote tier was reached but the operation stopped early.
    pub error: Option<CacheError>,
}

impl InvalidationReport {
    pub fn total(&self) -> usize {
        self.local + self.remote
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Fold `other` into this report, keeping the first error.
    pub fn merge(&mut self, other: InvalidationReport) {
        self.local += other.local;
        self.remote += other.remote;
        if self.error.is_none() {
            self.error = other.error;
        }
    }
}

/// Builder for [`QueryCache`].
pub struct QueryCacheBuilder {
    settings: CacheSettings,
    registry: Option<PolicyRegistry>,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl QueryCacheBuilder {
    pub fn settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use `registry` instead of the one derived from the settings.
    pub fn registry(mut self, registry: PolicyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn build(self) -> QueryCache {
        let registry = self
            .registry
            .unwrap_or_else(|| PolicyRegistry::from_settings(&self.settings));
        let remote = self.remote.unwrap_or_else(|| Arc::new(DisabledRemote));

        QueryCache {
            local: Arc::new(LocalStore::new(self.settings.local_capacity)),
            remote,
            registry,
            deriver: KeyDeriver::new(self.settings.key_length),
            stats: QueryStats::new(),
            promotion_ttl: self.settings.local_promotion_ttl(),
            sweep_interval: self.settings.sweep_interval(),
            compression_threshold: self.settings.compression_threshold_bytes,
            entity_params: self.settings.entity_params,
            sweeper: Mutex::new(None),
        }
    }
}

/// Two-tier cache for expensive read queries.
///
/// One instance is created at startup and shared (`Arc<QueryCache>`) by every
/// caller in the process.
pub struct QueryCache {
    local: Arc<LocalStore<CachedValue>>,
    remote: Arc<dyn RemoteStore>,
    registry: PolicyRegistry,
    deriver: KeyDeriver,
    stats: QueryStats,
    promotion_ttl: Duration,
    sweep_interval: Duration,
    compression_threshold: usize,
    entity_params: Vec<String>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("local_entries", &self.local.len())
            .field("local_capacity", &self.local.capacity())
            .field("remote", &self.remote.mode())
            .finish()
    }
}

impl QueryCache {
    pub fn builder() -> QueryCacheBuilder {
        QueryCacheBuilder {
            settings: CacheSettings::default(),
            registry: None,
            remote: None,
        }
    }

    /// Local-only cache with default settings.
    pub fn local_only() -> Self {
        Self::builder().build()
    }

    /// Build the cache from application configuration, connect the remote
    /// tier (degrading to local-only if that fails) and start the sweeper.
    pub async fn connect(config: &AppConfig) -> Arc<Self> {
        let remote = create_remote_store(&config.redis).await;
        let cache = Arc::new(
            Self::builder()
                .settings(config.cache.clone())
                .remote(remote)
                .build(),
        );
        cache.start_sweeper();
        tracing::info!(
            local_capacity = cache.local.capacity(),
            remote = cache.remote.mode(),
            remote_available = cache.remote.is_available(),
            "query cache ready"
        );
        cache
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn local(&self) -> &LocalStore<CachedValue> {
        &self.local
    }

    /// Key and descriptor `params` map to under `query_class`.
    pub fn derive<P>(&self, query_class: &str, params: &P) -> CacheResult<DerivedKey>
    where
        P: Serialize + ?Sized,
    {
        self.deriver.derive(query_class, params)
    }

    /// Return the cached result for `(query_class, params)`, running `query`
    /// only when neither tier holds a live entry.
    ///
    /// A failed query is returned as-is and nothing is cached. Parameters that
    /// cannot be serialized bypass the cache entirely.
    pub async fn run_cached<T, P, F, Fut, E>(
        &self,
        query_class: &str,
        params: &P,
        query: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let derived = match self.deriver.derive(query_class, params) {
            Ok(derived) => derived,
            Err(e) => {
                tracing::warn!(
                    query_class,
                    error = %e,
                    "query parameters not serializable, bypassing cache"
                );
                self.count_miss(query_class);
                return query().await;
            }
        };
        let policy = self.registry.resolve(query_class);

        if let Some(value) = self.lookup_local::<T>(&derived, query_class) {
            return Ok(value);
        }

        if let Some(value) = self.lookup_remote::<T>(&derived, query_class, policy).await {
            return Ok(value);
        }

        self.count_miss(query_class);
        let started = Instant::now();
        let value = query().await?;
        let execution = started.elapsed();
        metrics::record_query_duration(query_class, execution);
        tracing::debug!(
            query_class,
            key = %derived.key,
            execution_ms = execution.as_millis() as u64,
            "cache miss, query executed"
        );

        self.populate(&derived, query_class, policy, &value, execution)
            .await;
        Ok(value)
    }

    fn count_miss(&self, query_class: &str) {
        self.stats.record_miss();
        metrics::record_cache_miss(query_class);
    }

    fn lookup_local<T>(&self, derived: &DerivedKey, query_class: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let hit = self.local.get(&derived.key)?;
        match hit.value.downcast::<T>() {
            Ok(value) => {
                self.stats.record_local_hit(hit.execution);
                metrics::record_cache_hit("local");
                tracing::debug!(query_class, key = %derived.key, "cache hit (L1)");
                Some(T::clone(&value))
            }
            Err(_) => {
                // Same class and params requested with a different result type
                tracing::debug!(
                    query_class,
                    key = %derived.key,
                    "local entry holds a different result type, ignoring"
                );
                None
            }
        }
    }

    async fn lookup_remote<T>(
        &self,
        derived: &DerivedKey,
        query_class: &str,
        policy: CachePolicy,
    ) -> Option<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let raw = self.remote.get(&derived.key.remote_key()).await?;

        let (value, execution) = match decode_remote::<T>(&raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(
                    query_class,
                    key = %derived.key,
                    error = %e,
                    "unreadable remote entry, treating as miss"
                );
                return None;
            }
        };

        let ttl = policy.ttl.min(self.promotion_ttl);
        self.local.set(
            derived.key.clone(),
            Arc::new(value.clone()),
            ttl,
            EntryMeta::new(derived.descriptor.clone(), execution),
        );

        self.stats.record_remote_hit(execution);
        metrics::record_cache_hit("remote");
        tracing::debug!(
            query_class,
            key = %derived.key,
            promoted_ttl_secs = ttl.as_secs(),
            "cache hit (L2)"
        );
        Some(value)
    }

    async fn populate<T>(
        &self,
        derived: &DerivedKey,
        query_class: &str,
        policy: CachePolicy,
        value: &T,
        execution: Duration,
    ) where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        self.local.set(
            derived.key.clone(),
            Arc::new(value.clone()),
            policy.ttl,
            EntryMeta::new(derived.descriptor.clone(), execution),
        );

        let encode = EncodePolicy {
            enabled: policy.encode_large,
            threshold_bytes: self.compression_threshold,
            encoding: Encoding::Deflate,
        };
        let source = EntrySource {
            key: &derived.key,
            query_class,
            descriptor: &derived.descriptor,
            execution,
        };
        let raw = match serde_json::to_value(value)
            .map_err(CacheError::from)
            .and_then(|json| RemoteEntry::build(source, json, encode))
            .and_then(|entry| entry.to_json())
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    query_class,
                    key = %derived.key,
                    error = %e,
                    "result not serializable, skipping remote write"
                );
                return;
            }
        };

        if !self
            .remote
            .set(&derived.key.remote_key(), &raw, policy.ttl)
            .await
        {
            tracing::trace!(query_class, key = %derived.key, "remote write skipped");
        }
    }

    /// Remove every entry, in both tiers, whose full key, hash or descriptor
    /// contains `pattern`. Other processes' local tiers are not reached.
    ///
    /// An empty pattern removes nothing.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> InvalidationReport {
        if pattern.is_empty() {
            tracing::warn!("refusing to invalidate with an empty pattern");
            return InvalidationReport::default();
        }
        self.invalidate(Selector::Pattern(pattern)).await
    }

    async fn invalidate(&self, selector: Selector<'_>) -> InvalidationReport {
        let local = self.local.remove_matching(selector).len();
        let removal = self.remote.delete_matching(selector).await;
        let remote_unavailable = removal
            .error
            .as_ref()
            .is_some_and(CacheError::is_remote_unavailable);
        let error = removal.error.map(|e| CacheError::InvalidationFailure {
            pattern: selector.to_string(),
            message: e.to_string(),
        });

        let report = InvalidationReport {
            local,
            remote: removal.removed,
            error,
        };
        metrics::record_invalidations(report.total());

        match &report.error {
            None => tracing::info!(
                selector = %selector,
                local = report.local,
                remote = report.remote,
                "cache entries invalidated"
            ),
            Some(e) => tracing::warn!(
                selector = %selector,
                local = report.local,
                remote = report.remote,
                remote_unavailable,
                error = %e,
                "cache invalidation incomplete"
            ),
        }
        report
    }

    /// Remove every entry whose parameters name `entity_id` under one of the
    /// configured entity parameters (`companyId` and friends), whether the id
    /// was passed as a number or a string.
    pub async fn invalidate_for_entity(&self, entity_id: &str) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for pattern in entity_patterns(&self.entity_params, entity_id) {
            report.merge(self.invalidate_by_pattern(&pattern).await);
        }
        report
    }

    /// Remove every entry of `query_class`.
    pub async fn invalidate_query_class(&self, query_class: &str) -> InvalidationReport {
        if query_class.is_empty() {
            return InvalidationReport::default();
        }
        self.invalidate(Selector::QueryClass(query_class)).await
    }

    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics::from_parts(
            self.stats.snapshot(),
            self.local.len(),
            self.local.capacity(),
            self.local.evictions(),
            self.remote.is_available(),
        )
    }

    /// Empty the local tier and the remote namespace, and reset statistics.
    pub async fn clear_all(&self) -> InvalidationReport {
        let local = self.local.len();
        self.local.clear();
        let removal = self.remote.clear_namespace().await;
        self.stats.reset();

        let report = InvalidationReport {
            local,
            remote: removal.removed,
            error: removal.error,
        };
        tracing::info!(
            local = report.local,
            remote = report.remote,
            "query cache cleared"
        );
        report
    }

    /// Start the periodic local sweep. No-op if it is already running.
    pub fn start_sweeper(&self) {
        if self.sweep_interval.is_zero() {
            tracing::warn!("sweep interval is zero, local sweeper not started");
            return;
        }
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(Sweeper::is_running) {
            return;
        }
        *sweeper = Some(Sweeper::spawn(Arc::clone(&self.local), self.sweep_interval));
    }

    /// Stop the sweeper and release remote connections.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
        self.remote.shutdown().await;
        tracing::info!("query cache shut down");
    }
}

fn decode_remote<T: DeserializeOwned>(raw: &str) -> CacheResult<(T, Duration)> {
    let entry = RemoteEntry::from_json(raw)?;
    let execution = entry.execution();
    let value = serde_json::from_value(entry.into_value()?)?;
    Ok((value, execution))
}

/// Descriptor fragments identifying `entity_id`. Numeric ids also match
/// their string form; each fragment is terminated so `4` never matches `42`.
fn entity_patterns(params: &[String], entity_id: &str) -> Vec<String> {
    let quoted = serde_json::Value::String(entity_id.to_string()).to_string();
    let numeric = entity_id.parse::<i64>().is_ok();

    let mut patterns = Vec::new();
    for name in params {
        if numeric {
            patterns.push(format!("\"{name}\":{entity_id},"));
            patterns.push(format!("\"{name}\":{entity_id}}}"));
        }
        patterns.push(format!("\"{name}\":{quoted}"));
    }
    patterns
}
