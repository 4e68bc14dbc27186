use anyhow::{Result, bail};
use serde_json::json;

use querycache::{AppConfig, InvalidationReport, QueryCache, create_remote_store};

use crate::cli::OutputFormat;
use crate::output::{emit, print_success, print_warning};

/// Cache handle for one-shot admin commands: no sweeper, and the remote tier
/// must be reachable since that is the only tier these commands affect.
async fn open(config: &AppConfig) -> Result<QueryCache> {
    if !config.redis.enabled {
        bail!("redis is disabled in configuration; nothing shared to invalidate");
    }
    let remote = create_remote_store(&config.redis).await;
    if !remote.is_available() {
        bail!("redis at {} is unreachable", config.redis.redacted_url());
    }
    Ok(QueryCache::builder()
        .settings(config.cache.clone())
        .remote(remote)
        .build())
}

fn report(action: &str, report: &InvalidationReport, format: OutputFormat) -> Result<()> {
    let value = json!({
        "removed": report.remote,
        "complete": report.is_complete(),
        "error": report.error.as_ref().map(|e| e.to_string()),
    });
    emit(&value, format, |_| {
        print_success(&format!("{action}: {} remote entries removed", report.remote));
        if let Some(e) = &report.error {
            print_warning(&format!("stopped early: {e}"));
        }
    })?;
    if !report.is_complete() {
        bail!("{action} incomplete");
    }
    Ok(())
}

pub async fn invalidate(config: &AppConfig, pattern: &str, format: OutputFormat) -> Result<()> {
    if pattern.is_empty() {
        bail!("pattern must not be empty");
    }
    let cache = open(config).await?;
    let result = cache.invalidate_by_pattern(pattern).await;
    cache.shutdown().await;
    report(&format!("Invalidated '{pattern}'"), &result, format)
}

pub async fn invalidate_entity(
    config: &AppConfig,
    entity_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let cache = open(config).await?;
    let result = cache.invalidate_for_entity(entity_id).await;
    cache.shutdown().await;
    report(&format!("Invalidated entity {entity_id}"), &result, format)
}

pub async fn invalidate_class(
    config: &AppConfig,
    query_class: &str,
    format: OutputFormat,
) -> Result<()> {
    let cache = open(config).await?;
    let result = cache.invalidate_query_class(query_class).await;
    cache.shutdown().await;
    report(&format!("Invalidated class {query_class}"), &result, format)
}

pub async fn clear(config: &AppConfig, yes: bool, format: OutputFormat) -> Result<()> {
    if !yes {
        bail!("refusing to clear the shared cache without --yes");
    }
    let cache = open(config).await?;
    let result = cache.clear_all().await;
    cache.shutdown().await;
    report("Cleared cache namespace", &result, format)
}
