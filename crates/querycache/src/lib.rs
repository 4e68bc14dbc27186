//! Two-tier cache for expensive read queries.
//!
//! Results are keyed by a digest of the query class and its canonicalized
//! parameters, held first in a bounded in-process store and then in a shared
//! Redis namespace (`query:cache:*`). When Redis is unreachable the cache
//! keeps working from the local tier alone.
//!
//! ```ignore
//! let cache = QueryCache::connect(&config).await;
//! let metrics = cache
//!     .run_cached(classes::DASHBOARD_METRICS, &json!({"companyId": 42}), || {
//!         store.dashboard_metrics(42)
//!     })
//!     .await?;
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod keys;
pub mod local;
pub mod metrics;
pub mod observability;
pub mod policy;
pub mod remote;
pub mod stats;
pub mod sweeper;

pub use cache::{CachedValue, InvalidationReport, QueryCache, QueryCacheBuilder};
pub use config::{AppConfig, CacheSettings, LoggingConfig, RedisConfig};
pub use entry::Selector;
pub use error::{CacheError, CacheResult};
pub use keys::{CacheKey, DerivedKey, KeyDeriver, derive_key};
pub use policy::{CachePolicy, PolicyRegistry, classes};
pub use remote::{
    DisabledRemote, MemoryRemoteStore, RedisStore, RemoteStore, create_remote_store,
};
pub use stats::CacheStatistics;
