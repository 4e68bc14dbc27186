//! Cached analytics call sites.
//!
//! Every method loads its rows from the [`AnalyticsStore`] only on a cache
//! miss. Parameters are serialized with camelCase names so entries scoped to
//! a company carry `companyId` in their descriptor, which is what
//! [`AnalyticsService::invalidate_company`] matches on.

use std::sync::Arc;

use querycache::{InvalidationReport, QueryCache, classes};
use serde::Serialize;

use crate::model::{
    AdminAnalytics, CompanyAnalytics, CompanyId, CompanyReport, DailyTotal, DashboardMetrics,
    KpiReport, Page, Product, Supplier, TimeRange,
};
use crate::queries::{self, ProductQuery, SupplierQuery};
use crate::store::{AnalyticsStore, StoreError, StoreResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompanyScope {
    company_id: CompanyId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompanyRange {
    company_id: CompanyId,
    range: TimeRange,
}

#[derive(Debug, Serialize)]
struct PlatformRange {
    range: Option<TimeRange>,
}

#[derive(Clone)]
pub struct AnalyticsService {
    store: Arc<dyn AnalyticsStore>,
    cache: Arc<QueryCache>,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn AnalyticsStore>, cache: Arc<QueryCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub async fn dashboard_metrics(&self, company_id: CompanyId) -> StoreResult<DashboardMetrics> {
        let params = CompanyScope { company_id };
        self.cache
            .run_cached(classes::DASHBOARD_METRICS, &params, || async {
                let (products, suppliers, orders) = tokio::try_join!(
                    self.store.products(company_id),
                    self.store.suppliers(company_id),
                    self.store.orders(company_id, None),
                )?;
                Ok::<_, StoreError>(queries::dashboard_metrics(&products, &suppliers, &orders))
            })
            .await
    }

    pub async fn company_analytics(
        &self,
        company_id: CompanyId,
        range: TimeRange,
    ) -> StoreResult<CompanyAnalytics> {
        let params = CompanyRange { company_id, range };
        self.cache
            .run_cached(classes::COMPANY_ANALYTICS, &params, || async {
                let (products, orders) = tokio::try_join!(
                    self.store.products(company_id),
                    self.store.orders(company_id, Some(range)),
                )?;
                Ok::<_, StoreError>(queries::company_analytics(company_id, range, &products, &orders))
            })
            .await
    }

    pub async fn kpis(&self, company_id: CompanyId) -> StoreResult<KpiReport> {
        let params = CompanyScope { company_id };
        self.cache
            .run_cached(classes::KPI_CALCULATIONS, &params, || async {
                let (products, orders) = tokio::try_join!(
                    self.store.products(company_id),
                    self.store.orders(company_id, None),
                )?;
                Ok::<_, StoreError>(queries::kpis(&products, &orders))
            })
            .await
    }

    /// Platform-wide rollup across every company.
    pub async fn admin_analytics(&self, range: Option<TimeRange>) -> StoreResult<AdminAnalytics> {
        let params = PlatformRange { range };
        self.cache
            .run_cached(classes::ADMIN_ANALYTICS, &params, || async {
                let (companies, orders) =
                    tokio::try_join!(self.store.companies(), self.store.all_orders(range))?;
                Ok::<_, StoreError>(queries::admin_analytics(&companies, &orders))
            })
            .await
    }

    pub async fn product_list(&self, query: &ProductQuery) -> StoreResult<Page<Product>> {
        self.cache
            .run_cached(classes::PRODUCT_LIST, query, || async {
                let products = self.store.products(query.company_id).await?;
                Ok::<_, StoreError>(queries::product_list(products, query))
            })
            .await
    }

    pub async fn supplier_list(&self, query: &SupplierQuery) -> StoreResult<Page<Supplier>> {
        self.cache
            .run_cached(classes::SUPPLIER_LIST, query, || async {
                let suppliers = self.store.suppliers(query.company_id).await?;
                Ok::<_, StoreError>(queries::supplier_list(suppliers, query))
            })
            .await
    }

    /// Order count and revenue per day of `range`.
    pub async fn daily_orders(
        &self,
        company_id: CompanyId,
        range: TimeRange,
    ) -> StoreResult<Vec<DailyTotal>> {
        let params = CompanyRange { company_id, range };
        self.cache
            .run_cached(classes::TIME_SERIES, &params, || async {
                let orders = self.store.orders(company_id, Some(range)).await?;
                Ok::<_, StoreError>(queries::daily_order_totals(range, &orders))
            })
            .await
    }

    /// Full report for one company. Fails with `NotFound` for unknown ids;
    /// that failure is not cached.
    pub async fn report(&self, company_id: CompanyId, range: TimeRange) -> StoreResult<CompanyReport> {
        let params = CompanyRange { company_id, range };
        self.cache
            .run_cached(classes::REPORT_DATA, &params, || async {
                let company = self
                    .store
                    .company(company_id)
                    .await?
                    .ok_or_else(|| StoreError::not_found("company", company_id))?;
                let (products, suppliers, orders) = tokio::try_join!(
                    self.store.products(company_id),
                    self.store.suppliers(company_id),
                    self.store.orders(company_id, None),
                )?;
                let in_range: Vec<_> = orders
                    .iter()
                    .filter(|o| range.contains(o.placed_at))
                    .cloned()
                    .collect();

                Ok::<_, StoreError>(CompanyReport {
                    metrics: queries::dashboard_metrics(&products, &suppliers, &in_range),
                    analytics: queries::company_analytics(company_id, range, &products, &orders),
                    kpis: queries::kpis(&products, &in_range),
                    daily: queries::daily_order_totals(range, &orders),
                    company,
                    range,
                })
            })
            .await
    }

    /// Drop every cached result that depends on `company_id`'s data,
    /// including platform-wide rollups. Call after writes to that company.
    pub async fn invalidate_company(&self, company_id: CompanyId) -> InvalidationReport {
        let mut report = self
            .cache
            .invalidate_for_entity(&company_id.to_string())
            .await;
        report.merge(
            self.cache
                .invalidate_query_class(classes::ADMIN_ANALYTICS)
                .await,
        );
        tracing::debug!(company_id, removed = report.total(), "company analytics invalidated");
        report
    }
}
