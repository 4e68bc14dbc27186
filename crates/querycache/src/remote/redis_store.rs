//! Redis adapter for the remote tier.

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;

use super::{Availability, RemoteRemoval, RemoteStore};
use crate::config::RedisConfig;
use crate::entry::Selector;
use crate::error::{CacheError, CacheResult};
use crate::keys::REMOTE_KEY_PREFIX;

/// Keys fetched per SCAN / MGET / DEL round trip.
const BATCH_SIZE: usize = 200;

/// Redis-backed remote tier.
///
/// Every call is bounded by `timeout` and retried up to `max_retries` times
/// with a fixed backoff. When attempts are exhausted the adapter is marked
/// unavailable (see [`Availability`]) and the caller sees a miss.
pub struct RedisStore {
    pool: Pool,
    availability: Availability,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl RedisStore {
    /// Build the connection pool. No connection is made until first use.
    pub fn from_config(config: &RedisConfig) -> CacheResult<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(config.connection_url());
        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.timeout());
        pool_config.timeouts.create = Some(config.timeout());
        pool_config.timeouts.recycle = Some(config.timeout());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::config(format!("failed to create Redis pool: {e}")))?;

        Ok(Self::with_pool(pool, config))
    }

    /// Wrap an existing pool.
    pub fn with_pool(pool: Pool, config: &RedisConfig) -> Self {
        Self {
            pool,
            availability: Availability::new(config.reconnect_after()),
            timeout: config.timeout(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
        }
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    /// Round-trip a PING without touching the availability state.
    pub async fn ping(&self) -> CacheResult<()> {
        let pool = &self.pool;
        let attempt = async {
            let mut conn = pool.get().await?;
            let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<(), CacheError>(())
        };
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::remote(format!(
                "PING timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    /// Run one logical operation with timeout and bounded retry.
    ///
    /// `attempt` builds a fresh future per try.
    async fn call<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> CacheResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let mut last_error = None;
        for n in 0..=self.max_retries {
            if n > 0 {
                tokio::time::sleep(self.retry_backoff).await;
            }
            match tokio::time::timeout(self.timeout, attempt()).await {
                Ok(Ok(value)) => {
                    self.availability.mark_success();
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    tracing::debug!(op, attempt = n, error = %e, "Redis call failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    tracing::debug!(op, attempt = n, "Redis call timed out");
                    last_error = Some(CacheError::remote(format!(
                        "{op} timed out after {}ms",
                        self.timeout.as_millis()
                    )));
                }
            }
        }

        let error = last_error.unwrap_or_else(|| CacheError::remote(format!("{op} not attempted")));
        self.availability.mark_failure(op, &error);
        Err(error)
    }

    async fn scan_namespace(&self) -> CacheResult<Vec<String>> {
        let pool = &self.pool;
        let match_pattern = format!("{REMOTE_KEY_PREFIX}*");
        let match_pattern = match_pattern.as_str();
        self.call("scan", || async move {
            let mut conn = pool.get().await?;
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(match_pattern)
                    .arg("COUNT")
                    .arg(BATCH_SIZE)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<_, CacheError>(keys)
        })
        .await
    }

    async fn fetch_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        let pool = &self.pool;
        self.call("mget", || async move {
            let mut conn = pool.get().await?;
            let values: Vec<Option<String>> = redis::cmd("MGET")
                .arg(keys)
                .query_async(&mut conn)
                .await?;
            Ok::<_, CacheError>(values)
        })
        .await
    }

    /// Delete `keys` in batches. Stops at the first failed batch.
    async fn delete_keys(&self, keys: &[String]) -> RemoteRemoval {
        let pool = &self.pool;
        let mut removed = 0;
        for chunk in keys.chunks(BATCH_SIZE) {
            let result = self
                .call("del", || async move {
                    let mut conn = pool.get().await?;
                    let deleted: usize = conn.del(chunk).await?;
                    Ok::<_, CacheError>(deleted)
                })
                .await;
            match result {
                Ok(deleted) => removed += deleted,
                Err(error) => {
                    return RemoteRemoval {
                        removed,
                        error: Some(error),
                    };
                }
            }
        }
        RemoteRemoval::done(removed)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Option<String> {
        if !self.availability.should_attempt() {
            return None;
        }
        let pool = &self.pool;
        self.call("get", || async move {
            let mut conn = pool.get().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok::<_, CacheError>(value)
        })
        .await
        .ok()
        .flatten()
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        if !self.availability.should_attempt() {
            return false;
        }
        let pool = &self.pool;
        let ttl_secs = ttl.as_secs().max(1);
        let result = self
            .call("set", || async move {
                let mut conn = pool.get().await?;
                conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
                Ok::<_, CacheError>(())
            })
            .await;
        match result {
            Ok(()) => {
                tracing::debug!(key = %key, ttl_secs, "cache set (L2)");
                true
            }
            Err(_) => false,
        }
    }

    async fn delete_matching(&self, selector: Selector<'_>) -> RemoteRemoval {
        if !self.availability.should_attempt() {
            return RemoteRemoval::default();
        }
        let keys = match self.scan_namespace().await {
            Ok(keys) => keys,
            Err(error) => return RemoteRemoval::failed(error),
        };

        let (mut targets, unresolved): (Vec<String>, Vec<String>) =
            keys.into_iter().partition(|key| selector.matches_key(key));

        for chunk in unresolved.chunks(BATCH_SIZE) {
            match self.fetch_many(chunk).await {
                Ok(values) => {
                    targets.extend(
                        chunk
                            .iter()
                            .zip(values)
                            .filter(|(key, raw)| selector.matches_remote(key, raw.as_deref()))
                            .map(|(key, _)| key.clone()),
                    );
                }
                Err(error) => {
                    let mut partial = self.delete_keys(&targets).await;
                    partial.error.get_or_insert(error);
                    return partial;
                }
            }
        }

        self.delete_keys(&targets).await
    }

    async fn clear_namespace(&self) -> RemoteRemoval {
        if !self.availability.should_attempt() {
            return RemoteRemoval::default();
        }
        match self.scan_namespace().await {
            Ok(keys) => self.delete_keys(&keys).await,
            Err(error) => RemoteRemoval::failed(error),
        }
    }

    fn is_available(&self) -> bool {
        self.availability.is_available()
    }

    fn mode(&self) -> &'static str {
        "redis"
    }

    async fn shutdown(&self) {
        self.availability.disable();
        self.pool.close();
        tracing::debug!("Redis pool closed");
    }
}
