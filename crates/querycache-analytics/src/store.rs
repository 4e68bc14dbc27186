//! Read boundary to the relational data store.

use async_trait::async_trait;

use crate::model::{Company, CompanyId, Order, Product, Supplier, TimeRange};

/// Errors raised by an [`AnalyticsStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read-only access to the rows the aggregates are computed from.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn companies(&self) -> StoreResult<Vec<Company>>;

    async fn company(&self, id: CompanyId) -> StoreResult<Option<Company>>;

    async fn products(&self, company_id: CompanyId) -> StoreResult<Vec<Product>>;

    async fn suppliers(&self, company_id: CompanyId) -> StoreResult<Vec<Supplier>>;

    /// Orders of one company, optionally restricted to those placed in `range`.
    async fn orders(
        &self,
        company_id: CompanyId,
        range: Option<TimeRange>,
    ) -> StoreResult<Vec<Order>>;

    /// Orders of every company placed in `range`.
    async fn all_orders(&self, range: Option<TimeRange>) -> StoreResult<Vec<Order>>;
}
