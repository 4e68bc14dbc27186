use thiserror::Error;

/// Failures inside the cache tiers.
///
/// None of these ever reach a caller of [`QueryCache::run_cached`](crate::QueryCache::run_cached):
/// they are logged and the request falls through to the next tier or to the
/// query itself.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("payload encoding error: {0}")]
    Encoding(String),

    #[error("invalid query parameters: {0}")]
    InvalidParams(String),

    #[error("invalidation failed for pattern '{pattern}': {message}")]
    InvalidationFailure { pattern: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl CacheError {
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::RemoteUnavailable(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the remote tier should be considered down.
    pub fn is_remote_unavailable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        Self::RemoteUnavailable(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::RemoteUnavailable(e.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
