//! Cache key derivation.
//!
//! A key is the truncated SHA-256 of a canonical serialization of
//! `{ params, type, version }`. Object keys are sorted at every depth, so the
//! insertion order of a parameter bag never changes the derived key.
//!
//! ## Key Format
//!
//! - Local tier: `<hash>` (hex, [`DEFAULT_KEY_LENGTH`] chars by default)
//! - Remote tier: `query:cache:<hash>`

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CacheError, CacheResult};

/// Tag mixed into every key. Bump when the meaning of a query class changes
/// so entries written under the old meaning stop matching.
pub const KEY_SCHEMA_VERSION: &str = "1";

/// Namespace reserved for this subsystem inside the shared store.
pub const REMOTE_KEY_PREFIX: &str = "query:cache:";

pub const DEFAULT_KEY_LENGTH: usize = 32;
pub const MIN_KEY_LENGTH: usize = 16;
pub const MAX_KEY_LENGTH: usize = 64;

/// Opaque fixed-length hash identifying one (query class, params) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an existing hash (e.g. one read back from the remote namespace).
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the entry lives in the remote store.
    #[inline]
    pub fn remote_key(&self) -> String {
        format!("{REMOTE_KEY_PREFIX}{}", self.0)
    }

    /// Recover a key from its remote form. Returns `None` for keys outside
    /// the reserved namespace.
    pub fn from_remote_key(remote: &str) -> Option<Self> {
        remote
            .strip_prefix(REMOTE_KEY_PREFIX)
            .filter(|hash| !hash.is_empty())
            .map(Self::from_hash)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A derived key together with the human-readable descriptor used for
/// pattern invalidation (`dashboard_metrics|{"companyId":42}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    pub key: CacheKey,
    pub descriptor: String,
}

/// Derives [`CacheKey`]s with a fixed digest length and schema version.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    length: usize,
    version: String,
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_LENGTH)
    }
}

impl KeyDeriver {
    /// Create a deriver producing keys of `length` hex characters
    /// (clamped to 16..=64).
    pub fn new(length: usize) -> Self {
        Self {
            length: length.clamp(MIN_KEY_LENGTH, MAX_KEY_LENGTH),
            version: KEY_SCHEMA_VERSION.to_string(),
        }
    }

    /// Override the schema version tag.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn key_length(&self) -> usize {
        self.length
    }

    /// Derive the key for `query_class` and any serializable parameter bag.
    ///
    /// Fails only when `params` cannot be represented as JSON (for example a
    /// map with non-string keys).
    pub fn derive<P>(&self, query_class: &str, params: &P) -> CacheResult<DerivedKey>
    where
        P: Serialize + ?Sized,
    {
        let value = serde_json::to_value(params)
            .map_err(|e| CacheError::InvalidParams(e.to_string()))?;
        Ok(self.derive_value(query_class, &value))
    }

    /// Derive the key for an already-built JSON parameter bag.
    pub fn derive_value(&self, query_class: &str, params: &Value) -> DerivedKey {
        let mut canonical_params = String::new();
        write_canonical(&normalize_params(params), &mut canonical_params);

        let mut material = String::with_capacity(canonical_params.len() + 64);
        material.push_str("{\"params\":");
        material.push_str(&canonical_params);
        material.push_str(",\"type\":");
        write_json_string(query_class, &mut material);
        material.push_str(",\"version\":");
        write_json_string(&self.version, &mut material);
        material.push('}');

        let digest = Sha256::digest(material.as_bytes());
        let mut hash = hex::encode(digest);
        hash.truncate(self.length);

        DerivedKey {
            key: CacheKey(hash),
            descriptor: format!("{query_class}|{canonical_params}"),
        }
    }
}

/// Derive a key with the default length and schema version.
pub fn derive_key<P>(query_class: &str, params: &P) -> CacheResult<CacheKey>
where
    P: Serialize + ?Sized,
{
    KeyDeriver::default()
        .derive(query_class, params)
        .map(|derived| derived.key)
}

/// Absent parameters (`null`) normalize to an empty map.
fn normalize_params(params: &Value) -> Value {
    match params {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    }
}

/// Serialize `value` with object keys sorted at every depth. Array order is
/// significant and kept as-is.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(k, out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_json_string(s, out),
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_key_is_order_independent() {
        let a = json!({"companyId": 42, "range": {"from": "2024-01-01", "to": "2024-02-01"}});
        let b = json!({"range": {"to": "2024-02-01", "from": "2024-01-01"}, "companyId": 42});

        let deriver = KeyDeriver::default();
        assert_eq!(
            deriver.derive_value("dashboard_metrics", &a).key,
            deriver.derive_value("dashboard_metrics", &b).key
        );
    }

    #[test]
    fn test_key_sensitive_to_params_and_class() {
        let deriver = KeyDeriver::default();
        let k1 = deriver.derive_value("dashboard_metrics", &json!({"companyId": 42}));
        let k2 = deriver.derive_value("dashboard_metrics", &json!({"companyId": 43}));
        let k3 = deriver.derive_value("kpi_calculations", &json!({"companyId": 42}));
        let k4 = deriver.derive_value("dashboard_metrics", &json!({"companyId": "42"}));

        assert_ne!(k1.key, k2.key);
        assert_ne!(k1.key, k3.key);
        assert_ne!(k1.key, k4.key);
    }

    #[test]
    fn test_array_order_is_significant() {
        let deriver = KeyDeriver::default();
        let a = deriver.derive_value("product_list", &json!({"ids": [1, 2]}));
        let b = deriver.derive_value("product_list", &json!({"ids": [2, 1]}));
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_absent_params_equal_empty_map() {
        let deriver = KeyDeriver::default();
        assert_eq!(
            deriver.derive_value("admin_analytics", &Value::Null).key,
            deriver.derive_value("admin_analytics", &json!({})).key
        );
    }

    #[test]
    fn test_schema_version_changes_key() {
        let params = json!({"companyId": 1});
        let v1 = KeyDeriver::default().derive_value("report_data", &params);
        let v2 = KeyDeriver::default()
            .with_version("2")
            .derive_value("report_data", &params);
        assert_ne!(v1.key, v2.key);
    }

    #[test]
    fn test_key_length_is_fixed_and_clamped() {
        let params = json!({"companyId": 1});
        assert_eq!(
            KeyDeriver::default()
                .derive_value("q", &params)
                .key
                .as_str()
                .len(),
            DEFAULT_KEY_LENGTH
        );
        assert_eq!(KeyDeriver::new(4).key_length(), MIN_KEY_LENGTH);
        assert_eq!(KeyDeriver::new(500).key_length(), MAX_KEY_LENGTH);
    }

    #[test]
    fn test_descriptor_is_canonical() {
        let derived =
            KeyDeriver::default().derive_value("dashboard_metrics", &json!({"b": 1, "a": {"d": 2, "c": 3}}));
        assert_eq!(
            derived.descriptor,
            r#"dashboard_metrics|{"a":{"c":3,"d":2},"b":1}"#
        );
    }

    #[test]
    fn test_typed_params_match_json_params() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            company_id: u64,
        }

        let typed = derive_key("dashboard_metrics", &Params { company_id: 42 }).unwrap();
        let json = derive_key("dashboard_metrics", &json!({"companyId": 42})).unwrap();
        assert_eq!(typed, json);
    }

    #[test]
    fn test_non_serializable_params_rejected() {
        let mut params: HashMap<(u8, u8), u8> = HashMap::new();
        params.insert((1, 2), 3);
        let err = derive_key("q", &params).unwrap_err();
        assert!(matches!(err, CacheError::InvalidParams(_)));
    }

    #[test]
    fn test_remote_key_round_trip() {
        let key = derive_key("q", &json!({})).unwrap();
        let remote = key.remote_key();
        assert!(remote.starts_with(REMOTE_KEY_PREFIX));
        assert_eq!(CacheKey::from_remote_key(&remote), Some(key));
        assert_eq!(CacheKey::from_remote_key("session:abc"), None);
    }
}
