//! Integration tests against a real Redis.
//!
//! Two `QueryCache` instances pointed at the same Redis behave like two
//! application processes sharing the remote tier.
//!
//! Tests use testcontainers to spin up a real Redis instance.

use querycache::entry::RemoteEntry;
use querycache::{
    AppConfig, CacheSettings, QueryCache, RedisConfig, RemoteStore, create_remote_store,
};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn redis_config() -> RedisConfig {
    RedisConfig {
        enabled: true,
        url: Some(get_redis_url().await),
        pool_size: 5,
        timeout_ms: 5000,
        ..Default::default()
    }
}

fn instance(remote: Arc<dyn RemoteStore>) -> QueryCache {
    QueryCache::builder()
        .settings(CacheSettings::default())
        .remote(remote)
        .build()
}

#[tokio::test]
async fn test_redis_connection() {
    let remote = create_remote_store(&redis_config().await).await;
    assert_eq!(remote.mode(), "redis");
    assert!(remote.is_available());
}

#[tokio::test]
async fn test_result_shared_between_instances() {
    let config = redis_config().await;
    let first = instance(create_remote_store(&config).await);
    let second = instance(create_remote_store(&config).await);
    let params = json!({"companyId": 9001});

    let value: serde_json::Value = first
        .run_cached("dashboard_metrics", &params, || async {
            Ok::<_, Infallible>(json!({"totalProducts": 7}))
        })
        .await
        .unwrap();
    assert_eq!(value["totalProducts"], 7);

    let value: serde_json::Value = second
        .run_cached("dashboard_metrics", &params, || async {
            Err("second instance must read the shared entry")
        })
        .await
        .unwrap();
    assert_eq!(value["totalProducts"], 7);

    let stats = second.statistics();
    assert_eq!(stats.remote_hits, 1);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.local_entries, 1);
}

#[tokio::test]
async fn test_entry_written_with_expiry_and_envelope() {
    let config = redis_config().await;
    let remote = create_remote_store(&config).await;
    let cache = instance(Arc::clone(&remote));
    let params = json!({"companyId": 9002, "period": "month"});
    let derived = cache.derive("time_series", &params).unwrap();

    let days: Vec<u32> = (0..500).collect();
    let _: Vec<u32> = cache
        .run_cached("time_series", &params, || async {
            Ok::<_, Infallible>(days.clone())
        })
        .await
        .unwrap();

    let raw = remote
        .get(&derived.key.remote_key())
        .await
        .expect("entry written to redis");
    let entry = RemoteEntry::from_json(&raw).unwrap();
    assert_eq!(entry.query_hash, derived.key.as_str());
    assert_eq!(entry.query_class.as_deref(), Some("time_series"));
    assert!(entry.encoded);
    assert_eq!(entry.into_value().unwrap(), json!(days));

    let pool = deadpool_redis::Config::from_url(get_redis_url().await)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .unwrap();
    let mut conn = pool.get().await.unwrap();
    let ttl: i64 = deadpool_redis::redis::cmd("TTL")
        .arg(derived.key.remote_key())
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(ttl > 1700 && ttl <= 1800, "unexpected ttl {ttl}");
}

#[tokio::test]
async fn test_invalidation_reaches_remote_tier() {
    let config = redis_config().await;
    let writer = instance(create_remote_store(&config).await);
    let other = instance(create_remote_store(&config).await);

    for company in [9003, 9004] {
        let _: u32 = writer
            .run_cached("company_analytics", &json!({"companyId": company}), || async {
                Ok::<_, Infallible>(company)
            })
            .await
            .unwrap();
    }

    // Invalidate from a process that never cached anything locally
    let report = other.invalidate_for_entity("9003").await;
    assert_eq!(report.local, 0);
    assert_eq!(report.remote, 1);
    assert!(report.is_complete());

    let value: u32 = other
        .run_cached("company_analytics", &json!({"companyId": 9003}), || async {
            Ok::<_, Infallible>(1)
        })
        .await
        .unwrap();
    assert_eq!(value, 1);

    let value: u32 = other
        .run_cached("company_analytics", &json!({"companyId": 9004}), || async {
            Ok::<_, Infallible>(0)
        })
        .await
        .unwrap();
    assert_eq!(value, 9004);
}

#[tokio::test]
async fn test_connect_with_unreachable_redis_degrades() {
    let config = AppConfig {
        redis: RedisConfig {
            enabled: true,
            url: Some("redis://127.0.0.1:1".to_string()),
            timeout_ms: 200,
            max_retries: 0,
            ..Default::default()
        },
        ..Default::default()
    };

    let cache = QueryCache::connect(&config).await;
    assert!(!cache.statistics().remote_available);

    let value: u32 = cache
        .run_cached("product_list", &json!({"page": 1}), || async {
            Ok::<_, Infallible>(3)
        })
        .await
        .unwrap();
    assert_eq!(value, 3);

    let value: u32 = cache
        .run_cached("product_list", &json!({"page": 1}), || async {
            Ok::<_, Infallible>(4)
        })
        .await
        .unwrap();
    assert_eq!(value, 3);

    cache.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_remote_calls() {
    let config = redis_config().await;
    let cache = instance(create_remote_store(&config).await);
    cache.shutdown().await;

    let value: u32 = cache
        .run_cached("supplier_list", &json!({"page": 9005}), || async {
            Ok::<_, Infallible>(5)
        })
        .await
        .unwrap();
    assert_eq!(value, 5);
    assert!(!cache.statistics().remote_available);
}
