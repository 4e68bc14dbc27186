//! Rows read from the data store and the aggregates computed from them.

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

pub type CompanyId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub company_id: CompanyId,
    pub supplier_id: Option<i64>,
    pub name: String,
    pub category: String,
    pub price_cents: i64,
    pub stock: i64,
    /// Stock level at or below which the product counts as low on stock.
    pub reorder_level: i64,
}

impl Product {
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.reorder_level
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub id: i64,
    pub company_id: CompanyId,
    pub name: String,
    pub country: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Fulfilled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub company_id: CompanyId,
    pub product_id: i64,
    pub quantity: i64,
    pub total_cents: i64,
    pub status: OrderStatus,
    pub placed_at: OffsetDateTime,
    pub fulfilled_at: Option<OffsetDateTime>,
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl TimeRange {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self { start, end }
    }

    /// The `days` days ending at `end`.
    pub fn last_days(end: OffsetDateTime, days: i64) -> Self {
        Self {
            start: end - time::Duration::days(days),
            end,
        }
    }

    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.start <= at && at < self.end
    }

    /// Calendar days touched by the range, in order.
    pub fn days(&self) -> Vec<Date> {
        if self.end <= self.start {
            return Vec::new();
        }
        let last = (self.end - time::Duration::nanoseconds(1)).date();
        let mut days = Vec::new();
        let mut day = self.start.date();
        while day <= last {
            days.push(day);
            match day.next_day() {
                Some(next) => day = next,
                None => break,
            }
        }
        days
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub total_products: u64,
    pub total_suppliers: u64,
    pub total_orders: u64,
    pub pending_orders: u64,
    pub revenue_cents: i64,
    pub low_stock_products: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSales {
    pub product_id: i64,
    pub name: String,
    pub units: i64,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotal {
    pub category: String,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyAnalytics {
    pub company_id: CompanyId,
    pub range: TimeRange,
    pub order_count: u64,
    pub revenue_cents: i64,
    pub average_order_cents: i64,
    pub top_products: Vec<ProductSales>,
    pub categories: Vec<CategoryTotal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiReport {
    /// Percent of non-cancelled orders that were fulfilled.
    pub fulfillment_rate: f64,
    /// Percent of all orders that were cancelled.
    pub cancellation_rate: f64,
    pub average_fulfillment_hours: Option<f64>,
    /// Percent of products at or below their reorder level.
    pub low_stock_rate: f64,
    /// Revenue per unit of stock on hand.
    pub inventory_turnover: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRevenue {
    pub company_id: CompanyId,
    pub name: String,
    pub revenue_cents: i64,
    pub order_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAnalytics {
    pub total_companies: u64,
    pub active_companies: u64,
    pub total_orders: u64,
    pub total_revenue_cents: i64,
    pub companies: Vec<CompanyRevenue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTotal {
    pub date: Date,
    pub orders: u64,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyReport {
    pub company: Company,
    pub range: TimeRange,
    pub metrics: DashboardMetrics,
    pub analytics: CompanyAnalytics,
    pub kpis: KpiReport,
    pub daily: Vec<DailyTotal>,
}
