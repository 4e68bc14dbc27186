use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::keys::{DEFAULT_KEY_LENGTH, MAX_KEY_LENGTH, MIN_KEY_LENGTH};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Shared remote tier
    #[serde(default)]
    pub redis: RedisConfig,
    /// Local tier and per-query-class policy
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.cache.local_capacity == 0 {
            return Err("cache.local_capacity must be > 0".into());
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs must be > 0".into());
        }
        if self.cache.default_ttl_secs == 0 {
            return Err("cache.default_ttl_secs must be > 0".into());
        }
        if !(MIN_KEY_LENGTH..=MAX_KEY_LENGTH).contains(&self.cache.key_length) {
            return Err(format!(
                "cache.key_length must be within {MIN_KEY_LENGTH}..={MAX_KEY_LENGTH}"
            ));
        }
        for (class, policy) in &self.cache.policies {
            if policy.ttl_secs == 0 {
                return Err(format!("cache.policies.{class}.ttl_secs must be > 0"));
            }
        }
        if self.redis.enabled {
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
            if self.redis.timeout_ms == 0 {
                return Err("redis.timeout_ms must be > 0".into());
            }
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// Redis configuration for the shared remote tier.
///
/// Connection details come from `url` when set, otherwise from the discrete
/// host/port/password/db fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Full connection URL (e.g., "redis://:secret@cache:6379/2")
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub db: u32,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after a failed call before the tier is marked unavailable
    #[serde(default = "default_redis_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_redis_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long the tier stays disabled before a probe call is let through
    #[serde(default = "default_redis_reconnect_after_secs")]
    pub reconnect_after_secs: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

fn default_redis_max_retries() -> u32 {
    2
}

fn default_redis_retry_backoff_ms() -> u64 {
    50
}

fn default_redis_reconnect_after_secs() -> u64 {
    30
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: None,
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: 0,
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            max_retries: default_redis_max_retries(),
            retry_backoff_ms: default_redis_retry_backoff_ms(),
            reconnect_after_secs: default_redis_reconnect_after_secs(),
        }
    }
}

impl RedisConfig {
    /// Connection URL, composed from the discrete fields when `url` is unset.
    pub fn connection_url(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Connection URL with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        if self.url.as_deref().is_some_and(|u| !u.is_empty()) {
            return "<configured url>".to_string();
        }
        let auth = if self.password.as_deref().is_some_and(|p| !p.is_empty()) {
            ":***@"
        } else {
            ""
        };
        format!("redis://{auth}{}:{}/{}", self.host, self.port, self.db)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn reconnect_after(&self) -> Duration {
        Duration::from_secs(self.reconnect_after_secs)
    }
}

/// Per-query-class override of the built-in policy table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyOverride {
    pub ttl_secs: u64,
    #[serde(default)]
    pub encode_large: bool,
}

/// Local tier and policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum local entries
    #[serde(default = "default_local_capacity")]
    pub local_capacity: usize,

    /// Interval between local sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Upper bound on the local TTL of values promoted from the remote tier
    #[serde(default = "default_local_promotion_ttl_secs")]
    pub local_promotion_ttl_secs: u64,

    /// Serialized size above which `encode_large` classes encode payloads
    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: usize,

    /// Hex characters kept from the key digest
    #[serde(default = "default_key_length")]
    pub key_length: usize,

    /// TTL for query classes missing from the policy table
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Parameter names that identify an entity for `invalidate_for_entity`
    #[serde(default = "default_entity_params")]
    pub entity_params: Vec<String>,

    #[serde(default)]
    pub policies: HashMap<String, PolicyOverride>,
}

fn default_local_capacity() -> usize {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_local_promotion_ttl_secs() -> u64 {
    60
}

fn default_compression_threshold_bytes() -> usize {
    1024
}

fn default_key_length() -> usize {
    DEFAULT_KEY_LENGTH
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_entity_params() -> Vec<String> {
    vec![
        "companyId".to_string(),
        "company_id".to_string(),
        "entityId".to_string(),
    ]
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            local_capacity: default_local_capacity(),
            sweep_interval_secs: default_sweep_interval_secs(),
            local_promotion_ttl_secs: default_local_promotion_ttl_secs(),
            compression_threshold_bytes: default_compression_threshold_bytes(),
            key_length: default_key_length(),
            default_ttl_secs: default_ttl_secs(),
            entity_params: default_entity_params(),
            policies: HashMap::new(),
        }
    }
}

impl CacheSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn local_promotion_ttl(&self) -> Duration {
        Duration::from_secs(self.local_promotion_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "querycache.toml";
    pub const ENV_PREFIX: &str = "QUERYCACHE";

    /// Load configuration from an optional TOML file overlaid with
    /// `QUERYCACHE__*` environment variables. A missing file is not an error.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., QUERYCACHE__REDIS__HOST=cache
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(!cfg.redis.enabled);
        assert_eq!(cfg.cache.local_capacity, 1000);
        assert_eq!(cfg.cache.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_connection_url_composition() {
        let mut redis = RedisConfig {
            host: "cache.internal".into(),
            port: 6380,
            db: 2,
            ..RedisConfig::default()
        };
        assert_eq!(redis.connection_url(), "redis://cache.internal:6380/2");

        redis.password = Some("s3cret".into());
        assert_eq!(redis.connection_url(), "redis://:s3cret@cache.internal:6380/2");
        assert!(!redis.redacted_url().contains("s3cret"));

        redis.url = Some("redis://other:6379".into());
        assert_eq!(redis.connection_url(), "redis://other:6379");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.cache.local_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.cache.key_length = 8;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.cache.policies.insert(
            "dashboard_metrics".into(),
            PolicyOverride {
                ttl_secs: 0,
                encode_large: false,
            },
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[redis]
enabled = true
host = "cache.internal"
db = 3

[cache]
local_capacity = 50

[cache.policies.dashboard_metrics]
ttl_secs = 120
encode_large = true
"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let cfg = loader::load_config(Some(&path)).unwrap();
        assert!(cfg.redis.enabled);
        assert_eq!(cfg.redis.host, "cache.internal");
        assert_eq!(cfg.redis.db, 3);
        assert_eq!(cfg.redis.port, 6379);
        assert_eq!(cfg.cache.local_capacity, 50);
        assert_eq!(
            cfg.cache.policies.get("dashboard_metrics"),
            Some(&PolicyOverride {
                ttl_secs: 120,
                encode_large: true
            })
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = loader::load_config(Some("/nonexistent/querycache.toml")).unwrap();
        assert_eq!(cfg.cache.local_capacity, 1000);
    }
}
