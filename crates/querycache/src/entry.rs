//! Self-describing envelope stored in the remote tier.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use time::OffsetDateTime;

use crate::codec::{self, Encoding};
use crate::error::{CacheError, CacheResult};
use crate::keys::CacheKey;

/// Serialized form of a remote cache entry.
///
/// `data` holds the query result as plain JSON, or, when `encoded` is set,
/// a string produced by [`codec::encode`] with the scheme named in
/// `encoding`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub data: Value,
    /// Unix time in milliseconds.
    pub cached_at: i64,
    pub query_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_class: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub descriptor: String,
    #[serde(default)]
    pub execution_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub encoded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// When to encode the payload before it is written.
#[derive(Debug, Clone, Copy)]
pub struct EncodePolicy {
    pub enabled: bool,
    /// Serialized size in bytes above which the payload is encoded.
    pub threshold_bytes: usize,
    pub encoding: Encoding,
}

impl EncodePolicy {
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            threshold_bytes: usize::MAX,
            encoding: Encoding::Deflate,
        }
    }
}

/// Everything needed to describe a freshly computed result.
#[derive(Debug, Clone)]
pub struct EntrySource<'a> {
    pub key: &'a CacheKey,
    pub query_class: &'a str,
    pub descriptor: &'a str,
    pub execution: Duration,
}

impl RemoteEntry {
    /// Wrap `value`, encoding it when the policy asks for it and the
    /// serialized payload is over the threshold.
    pub fn build(source: EntrySource<'_>, value: Value, policy: EncodePolicy) -> CacheResult<Self> {
        let row_count = row_count(&value);
        let mut entry = Self {
            data: Value::Null,
            cached_at: now_millis(),
            query_hash: source.key.as_str().to_string(),
            query_class: Some(source.query_class.to_string()),
            descriptor: source.descriptor.to_string(),
            execution_ms: source.execution.as_millis() as u64,
            row_count,
            encoded: false,
            encoding: None,
        };

        if policy.enabled {
            let json = serde_json::to_string(&value)?;
            if json.len() > policy.threshold_bytes {
                entry.data = Value::String(codec::encode(&json, policy.encoding)?);
                entry.encoded = true;
                entry.encoding = Some(policy.encoding.as_str().to_string());
                return Ok(entry);
            }
        }

        entry.data = value;
        Ok(entry)
    }

    pub fn to_json(&self) -> CacheResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> CacheResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn execution(&self) -> Duration {
        Duration::from_millis(self.execution_ms)
    }

    /// The stored result, decoded if necessary.
    pub fn into_value(self) -> CacheResult<Value> {
        if !self.encoded {
            return Ok(self.data);
        }
        let scheme = Encoding::from_tag(self.encoding.as_deref())?;
        let Value::String(payload) = self.data else {
            return Err(CacheError::encoding("encoded payload is not a string"));
        };
        let json = codec::decode(&payload, scheme)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Which entries an invalidation removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector<'a> {
    /// Entries whose full key (`query:cache:<hash>`), hash or descriptor
    /// contains the text.
    Pattern(&'a str),
    /// Every entry of exactly this query class.
    QueryClass(&'a str),
}

impl Selector<'_> {
    /// Whether the remote key alone is enough to select the entry.
    pub fn matches_key(&self, remote_key: &str) -> bool {
        match self {
            Self::Pattern(pattern) => remote_key.contains(pattern),
            Self::QueryClass(_) => false,
        }
    }

    /// Match against a `class|params` descriptor.
    pub fn matches_descriptor(&self, descriptor: &str) -> bool {
        match self {
            Self::Pattern(pattern) => descriptor.contains(pattern),
            Self::QueryClass(class) => descriptor
                .strip_prefix(class)
                .is_some_and(|rest| rest.starts_with('|')),
        }
    }

    /// Match a local entry by its key and descriptor.
    pub fn matches_local(&self, key: &CacheKey, descriptor: &str) -> bool {
        self.matches_key(&key.remote_key()) || self.matches_descriptor(descriptor)
    }

    /// Match a decoded remote entry by its metadata.
    pub fn matches_entry(&self, entry: &RemoteEntry) -> bool {
        match self {
            Self::Pattern(pattern) => {
                entry.query_hash.contains(pattern)
                    || self.matches_descriptor(&entry.descriptor)
                    || entry
                        .query_class
                        .as_deref()
                        .is_some_and(|class| class.contains(pattern))
            }
            Self::QueryClass(class) => match entry.query_class.as_deref() {
                Some(stored) => stored == *class,
                None => self.matches_descriptor(&entry.descriptor),
            },
        }
    }

    /// Match a raw remote key/value pair. Values that do not parse are
    /// matched on the key alone.
    pub fn matches_remote(&self, remote_key: &str, raw: Option<&str>) -> bool {
        if self.matches_key(remote_key) {
            return true;
        }
        raw.and_then(|raw| RemoteEntry::from_json(raw).ok())
            .is_some_and(|entry| self.matches_entry(&entry))
    }
}

impl std::fmt::Display for Selector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pattern(pattern) => f.write_str(pattern),
            Self::QueryClass(class) => write!(f, "class:{class}"),
        }
    }
}

fn row_count(value: &Value) -> Option<u64> {
    match value {
        Value::Array(items) => Some(items.len() as u64),
        Value::Object(map) => ["rows", "items"]
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_array))
            .map(|items| items.len() as u64),
        _ => None,
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
