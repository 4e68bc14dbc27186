//! In-memory [`AnalyticsStore`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::model::{Company, CompanyId, Order, Product, Supplier, TimeRange};
use crate::store::{AnalyticsStore, StoreError, StoreResult};

/// Store backed by ordered maps, keyed by row id.
///
/// Every trait call is counted in [`reads`](Self::reads), which lets callers
/// observe how often the cache actually reached the store.
#[derive(Debug, Default)]
pub struct InMemoryAnalyticsStore {
    companies: RwLock<BTreeMap<CompanyId, Company>>,
    products: RwLock<BTreeMap<i64, Product>>,
    suppliers: RwLock<BTreeMap<i64, Supplier>>,
    orders: RwLock<BTreeMap<i64, Order>>,
    reads: AtomicU64,
    offline: AtomicBool,
}

impl InMemoryAnalyticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_company(&self, company: Company) {
        self.companies.write().insert(company.id, company);
    }

    pub fn insert_product(&self, product: Product) {
        self.products.write().insert(product.id, product);
    }

    pub fn insert_supplier(&self, supplier: Supplier) {
        self.suppliers.write().insert(supplier.id, supplier);
    }

    pub fn insert_order(&self, order: Order) {
        self.orders.write().insert(order.id, order);
    }

    /// Update the stock level of a product. Returns the owning company.
    pub fn set_stock(&self, product_id: i64, stock: i64) -> StoreResult<CompanyId> {
        let mut products = self.products.write();
        let product = products
            .get_mut(&product_id)
            .ok_or_else(|| StoreError::not_found("product", product_id))?;
        product.stock = stock;
        Ok(product.company_id)
    }

    /// Number of trait calls served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Make every subsequent read fail with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    fn begin_read(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::connection("data store is offline"));
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn select_orders(&self, company_id: Option<CompanyId>, range: Option<TimeRange>) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| company_id.is_none_or(|id| o.company_id == id))
            .filter(|o| range.is_none_or(|r| r.contains(o.placed_at)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AnalyticsStore for InMemoryAnalyticsStore {
    async fn companies(&self) -> StoreResult<Vec<Company>> {
        self.begin_read()?;
        Ok(self.companies.read().values().cloned().collect())
    }

    async fn company(&self, id: CompanyId) -> StoreResult<Option<Company>> {
        self.begin_read()?;
        Ok(self.companies.read().get(&id).cloned())
    }

    async fn products(&self, company_id: CompanyId) -> StoreResult<Vec<Product>> {
        self.begin_read()?;
        Ok(self
            .products
            .read()
            .values()
            .filter(|p| p.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn suppliers(&self, company_id: CompanyId) -> StoreResult<Vec<Supplier>> {
        self.begin_read()?;
        Ok(self
            .suppliers
            .read()
            .values()
            .filter(|s| s.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn orders(
        &self,
        company_id: CompanyId,
        range: Option<TimeRange>,
    ) -> StoreResult<Vec<Order>> {
        self.begin_read()?;
        Ok(self.select_orders(Some(company_id), range))
    }

    async fn all_orders(&self, range: Option<TimeRange>) -> StoreResult<Vec<Order>> {
        self.begin_read()?;
        Ok(self.select_orders(None, range))
    }
}
