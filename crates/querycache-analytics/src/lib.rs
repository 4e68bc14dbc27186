//! Aggregate read queries served through the query cache.
//!
//! [`AnalyticsService`] wraps each computation in
//! [`QueryCache::run_cached`](querycache::QueryCache::run_cached) under its
//! query class; [`queries`] holds the computations themselves and
//! [`AnalyticsStore`] the boundary to the data store.

pub mod memory;
pub mod model;
pub mod queries;
pub mod service;
pub mod store;

pub use memory::InMemoryAnalyticsStore;
pub use model::*;
pub use queries::{ProductQuery, ProductSort, SupplierQuery};
pub use service::AnalyticsService;
pub use store::{AnalyticsStore, StoreError, StoreResult};

/// Type alias for a shareable store instance.
pub type DynAnalyticsStore = std::sync::Arc<dyn AnalyticsStore>;
