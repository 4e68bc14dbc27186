use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use querycache::{AppConfig, KeyDeriver, PolicyRegistry, create_remote_store};

use crate::cli::OutputFormat;
use crate::output::{emit, print_fields, print_table};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    remote_mode: &'static str,
    remote_url: Option<String>,
    remote_available: bool,
    local_capacity: usize,
    sweep_interval_secs: u64,
    local_promotion_ttl_secs: u64,
    compression_threshold_bytes: usize,
    key_length: usize,
    entity_params: Vec<String>,
}

pub async fn status(config: &AppConfig, format: OutputFormat) -> Result<()> {
    let remote = create_remote_store(&config.redis).await;
    let status = Status {
        remote_mode: remote.mode(),
        remote_url: config.redis.enabled.then(|| config.redis.redacted_url()),
        remote_available: remote.is_available(),
        local_capacity: config.cache.local_capacity,
        sweep_interval_secs: config.cache.sweep_interval_secs,
        local_promotion_ttl_secs: config.cache.local_promotion_ttl_secs,
        compression_threshold_bytes: config.cache.compression_threshold_bytes,
        key_length: config.cache.key_length,
        entity_params: config.cache.entity_params.clone(),
    };
    remote.shutdown().await;

    emit(&status, format, |s| {
        let availability = if s.remote_available {
            "available".green().to_string()
        } else if s.remote_mode == "disabled" {
            "disabled".yellow().to_string()
        } else {
            "unavailable".red().to_string()
        };
        print_fields(&[
            ("Remote", format!("{} ({availability})", s.remote_mode)),
            ("Redis URL", s.remote_url.clone().unwrap_or_else(|| "-".into())),
            ("Local capacity", s.local_capacity.to_string()),
            ("Sweep interval", format!("{}s", s.sweep_interval_secs)),
            ("Promotion TTL", format!("{}s", s.local_promotion_ttl_secs)),
            (
                "Encode threshold",
                format!("{} bytes", s.compression_threshold_bytes),
            ),
            ("Key length", s.key_length.to_string()),
            ("Entity params", s.entity_params.join(", ")),
        ]);
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyRow {
    query_class: String,
    ttl_secs: u64,
    encode_large: bool,
}

pub fn policies(config: &AppConfig, format: OutputFormat) -> Result<()> {
    let registry = PolicyRegistry::from_settings(&config.cache);
    let mut rows: Vec<PolicyRow> = registry
        .classes()
        .into_iter()
        .map(|class| {
            let policy = registry.resolve(class);
            PolicyRow {
                query_class: class.to_string(),
                ttl_secs: policy.ttl.as_secs(),
                encode_large: policy.encode_large,
            }
        })
        .collect();
    rows.push(PolicyRow {
        query_class: "(other)".to_string(),
        ttl_secs: registry.fallback().ttl.as_secs(),
        encode_large: registry.fallback().encode_large,
    });

    emit(&rows, format, |rows| {
        print_table(
            &["Query class", "TTL (s)", "Encode large"],
            rows.iter()
                .map(|r| {
                    vec![
                        r.query_class.clone(),
                        r.ttl_secs.to_string(),
                        if r.encode_large { "yes" } else { "no" }.to_string(),
                    ]
                })
                .collect(),
        );
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyInfo {
    query_class: String,
    key: String,
    remote_key: String,
    descriptor: String,
    ttl_secs: u64,
    registered: bool,
}

pub fn key(config: &AppConfig, query_class: &str, params: &str, format: OutputFormat) -> Result<()> {
    let params: Value = serde_json::from_str(params).context("--params must be valid JSON")?;
    let derived = KeyDeriver::new(config.cache.key_length).derive_value(query_class, &params);
    let registry = PolicyRegistry::from_settings(&config.cache);

    let info = KeyInfo {
        query_class: query_class.to_string(),
        key: derived.key.to_string(),
        remote_key: derived.key.remote_key(),
        descriptor: derived.descriptor,
        ttl_secs: registry.resolve(query_class).ttl.as_secs(),
        registered: registry.contains(query_class),
    };

    emit(&info, format, |i| {
        let ttl = if i.registered {
            format!("{}s", i.ttl_secs)
        } else {
            format!("{}s (fallback)", i.ttl_secs)
        };
        print_fields(&[
            ("Key", i.key.clone()),
            ("Remote key", i.remote_key.clone()),
            ("Descriptor", i.descriptor.clone()),
            ("TTL", ttl),
        ]);
    })
}
