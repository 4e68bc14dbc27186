//! Query-class registry: the cache policy attached to each class of query.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::CacheSettings;

/// Names of the built-in query classes.
pub mod classes {
    pub const DASHBOARD_METRICS: &str = "dashboard_metrics";
    pub const COMPANY_ANALYTICS: &str = "company_analytics";
    pub const PRODUCT_LIST: &str = "product_list";
    pub const SUPPLIER_LIST: &str = "supplier_list";
    pub const TIME_SERIES: &str = "time_series";
    pub const REPORT_DATA: &str = "report_data";
    pub const KPI_CALCULATIONS: &str = "kpi_calculations";
    pub const ADMIN_ANALYTICS: &str = "admin_analytics";
}

/// How results of one query class are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    /// Encode payloads above the size threshold before the remote write.
    pub encode_large: bool,
}

impl CachePolicy {
    pub const fn new(ttl_secs: u64, encode_large: bool) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            encode_large,
        }
    }
}

/// Built-in policy table.
pub const DEFAULT_POLICIES: &[(&str, CachePolicy)] = &[
    (classes::DASHBOARD_METRICS, CachePolicy::new(300, false)),
    (classes::COMPANY_ANALYTICS, CachePolicy::new(900, true)),
    (classes::PRODUCT_LIST, CachePolicy::new(600, false)),
    (classes::SUPPLIER_LIST, CachePolicy::new(600, false)),
    (classes::TIME_SERIES, CachePolicy::new(1800, true)),
    (classes::REPORT_DATA, CachePolicy::new(3600, true)),
    (classes::KPI_CALCULATIONS, CachePolicy::new(900, false)),
    (classes::ADMIN_ANALYTICS, CachePolicy::new(300, true)),
];

/// Maps query-class names to their [`CachePolicy`].
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, CachePolicy>,
    fallback: CachePolicy,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PolicyRegistry {
    /// An empty registry; every class resolves to `fallback`.
    pub fn empty(fallback: CachePolicy) -> Self {
        Self {
            policies: HashMap::new(),
            fallback,
        }
    }

    /// The built-in table with a 300s, unencoded fallback.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty(CachePolicy::new(300, false));
        for (class, policy) in DEFAULT_POLICIES {
            registry.register(*class, *policy);
        }
        registry
    }

    /// The built-in table with configured overrides and fallback TTL applied.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        let mut registry = Self::with_defaults();
        registry.fallback = CachePolicy::new(settings.default_ttl_secs, false);
        for (class, policy) in &settings.policies {
            registry.register(class.clone(), CachePolicy::new(policy.ttl_secs, policy.encode_large));
        }
        registry
    }

    /// Register or replace the policy of `class`.
    pub fn register(&mut self, class: impl Into<String>, policy: CachePolicy) {
        self.policies.insert(class.into(), policy);
    }

    /// Policy for `class`, or the fallback when the class is unknown.
    pub fn resolve(&self, class: &str) -> CachePolicy {
        match self.policies.get(class) {
            Some(policy) => *policy,
            None => {
                tracing::debug!(query_class = %class, "no registered policy, using fallback");
                self.fallback
            }
        }
    }

    pub fn fallback(&self) -> CachePolicy {
        self.fallback
    }

    pub fn contains(&self, class: &str) -> bool {
        self.policies.contains_key(class)
    }

    /// Registered class names, sorted.
    pub fn classes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyOverride;

    #[test]
    fn test_default_table() {
        let registry = PolicyRegistry::with_defaults();
        assert_eq!(
            registry.resolve(classes::DASHBOARD_METRICS),
            CachePolicy::new(300, false)
        );
        assert_eq!(
            registry.resolve(classes::COMPANY_ANALYTICS),
            CachePolicy::new(900, true)
        );
        assert_eq!(registry.resolve(classes::REPORT_DATA).ttl, Duration::from_secs(3600));
        assert_eq!(registry.classes().len(), DEFAULT_POLICIES.len());
    }

    #[test]
    fn test_unknown_class_falls_back() {
        let registry = PolicyRegistry::with_defaults();
        assert!(!registry.contains("ad_hoc"));
        assert_eq!(registry.resolve("ad_hoc"), CachePolicy::new(300, false));
    }

    #[test]
    fn test_settings_override() {
        let mut settings = CacheSettings {
            default_ttl_secs: 42,
            ..CacheSettings::default()
        };
        settings.policies.insert(
            classes::DASHBOARD_METRICS.to_string(),
            PolicyOverride {
                ttl_secs: 60,
                encode_large: true,
            },
        );

        let registry = PolicyRegistry::from_settings(&settings);
        assert_eq!(
            registry.resolve(classes::DASHBOARD_METRICS),
            CachePolicy::new(60, true)
        );
        assert_eq!(registry.resolve("ad_hoc").ttl, Duration::from_secs(42));
        // Untouched classes keep their defaults
        assert_eq!(
            registry.resolve(classes::TIME_SERIES),
            CachePolicy::new(1800, true)
        );
    }
}
