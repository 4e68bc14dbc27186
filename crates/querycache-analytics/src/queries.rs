//! Aggregate computations over store rows.
//!
//! These functions are pure; [`AnalyticsService`](crate::AnalyticsService)
//! loads the rows and caches the results.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::{
    AdminAnalytics, CategoryTotal, Company, CompanyAnalytics, CompanyId, CompanyRevenue,
    DailyTotal, DashboardMetrics, KpiReport, Order, OrderStatus, Page, Product, ProductSales,
    Supplier, TimeRange,
};

pub const TOP_PRODUCTS: usize = 5;
pub const MAX_PER_PAGE: u32 = 100;

/// Cancelled orders do not count towards revenue.
fn revenue(orders: &[Order]) -> i64 {
    orders
        .iter()
        .filter(|o| o.status != OrderStatus::Cancelled)
        .map(|o| o.total_cents)
        .sum()
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

pub fn dashboard_metrics(
    products: &[Product],
    suppliers: &[Supplier],
    orders: &[Order],
) -> DashboardMetrics {
    DashboardMetrics {
        total_products: products.len() as u64,
        total_suppliers: suppliers.iter().filter(|s| s.active).count() as u64,
        total_orders: orders.len() as u64,
        pending_orders: orders
            .iter()
            .filter(|o| o.status == OrderStatus::Pending)
            .count() as u64,
        revenue_cents: revenue(orders),
        low_stock_products: products.iter().filter(|p| p.is_low_stock()).count() as u64,
    }
}

pub fn company_analytics(
    company_id: CompanyId,
    range: TimeRange,
    products: &[Product],
    orders: &[Order],
) -> CompanyAnalytics {
    let by_id: HashMap<i64, &Product> = products.iter().map(|p| (p.id, p)).collect();
    let counted: Vec<&Order> = orders
        .iter()
        .filter(|o| o.status != OrderStatus::Cancelled && range.contains(o.placed_at))
        .collect();

    let mut sales: HashMap<i64, ProductSales> = HashMap::new();
    let mut categories: BTreeMap<String, i64> = BTreeMap::new();
    for order in &counted {
        let (name, category) = match by_id.get(&order.product_id) {
            Some(p) => (p.name.clone(), p.category.clone()),
            None => (format!("product #{}", order.product_id), "uncategorized".to_string()),
        };
        let entry = sales.entry(order.product_id).or_insert_with(|| ProductSales {
            product_id: order.product_id,
            name,
            units: 0,
            revenue_cents: 0,
        });
        entry.units += order.quantity;
        entry.revenue_cents += order.total_cents;
        *categories.entry(category).or_default() += order.total_cents;
    }

    let mut top_products: Vec<ProductSales> = sales.into_values().collect();
    top_products.sort_by_key(|s| (Reverse(s.revenue_cents), s.product_id));
    top_products.truncate(TOP_PRODUCTS);

    let mut categories: Vec<CategoryTotal> = categories
        .into_iter()
        .map(|(category, revenue_cents)| CategoryTotal {
            category,
            revenue_cents,
        })
        .collect();
    categories.sort_by_key(|c| Reverse(c.revenue_cents));

    let revenue_cents: i64 = counted.iter().map(|o| o.total_cents).sum();
    let order_count = counted.len() as u64;
    CompanyAnalytics {
        company_id,
        range,
        order_count,
        revenue_cents,
        average_order_cents: if order_count == 0 {
            0
        } else {
            revenue_cents / order_count as i64
        },
        top_products,
        categories,
    }
}

pub fn kpis(products: &[Product], orders: &[Order]) -> KpiReport {
    let total = orders.len() as u64;
    let cancelled = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Cancelled)
        .count() as u64;
    let fulfilled: Vec<&Order> = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Fulfilled)
        .collect();

    let lead_times: Vec<f64> = fulfilled
        .iter()
        .filter_map(|o| o.fulfilled_at.map(|at| (at - o.placed_at).as_seconds_f64() / 3600.0))
        .collect();
    let average_fulfillment_hours = if lead_times.is_empty() {
        None
    } else {
        Some(lead_times.iter().sum::<f64>() / lead_times.len() as f64)
    };

    let stock: i64 = products.iter().map(|p| p.stock.max(0)).sum();
    let low_stock = products.iter().filter(|p| p.is_low_stock()).count() as u64;

    KpiReport {
        fulfillment_rate: percent(fulfilled.len() as u64, total - cancelled),
        cancellation_rate: percent(cancelled, total),
        average_fulfillment_hours,
        low_stock_rate: percent(low_stock, products.len() as u64),
        inventory_turnover: if stock == 0 {
            0.0
        } else {
            revenue(orders) as f64 / stock as f64
        },
    }
}

pub fn admin_analytics(companies: &[Company], orders: &[Order]) -> AdminAnalytics {
    let mut per_company: HashMap<CompanyId, (i64, u64)> = HashMap::new();
    for order in orders.iter().filter(|o| o.status != OrderStatus::Cancelled) {
        let totals = per_company.entry(order.company_id).or_default();
        totals.0 += order.total_cents;
        totals.1 += 1;
    }

    let mut rows: Vec<CompanyRevenue> = companies
        .iter()
        .map(|c| {
            let (revenue_cents, order_count) =
                per_company.get(&c.id).copied().unwrap_or_default();
            CompanyRevenue {
                company_id: c.id,
                name: c.name.clone(),
                revenue_cents,
                order_count,
            }
        })
        .collect();
    rows.sort_by_key(|r| (Reverse(r.revenue_cents), r.company_id));

    AdminAnalytics {
        total_companies: companies.len() as u64,
        active_companies: companies.iter().filter(|c| c.active).count() as u64,
        total_orders: orders.len() as u64,
        total_revenue_cents: revenue(orders),
        companies: rows,
    }
}

/// One row per day of `range`, days without orders included.
pub fn daily_order_totals(range: TimeRange, orders: &[Order]) -> Vec<DailyTotal> {
    let mut totals: BTreeMap<time::Date, (u64, i64)> = range
        .days()
        .into_iter()
        .map(|day| (day, (0, 0)))
        .collect();

    for order in orders
        .iter()
        .filter(|o| o.status != OrderStatus::Cancelled && range.contains(o.placed_at))
    {
        if let Some(day) = totals.get_mut(&order.placed_at.date()) {
            day.0 += 1;
            day.1 += order.total_cents;
        }
    }

    totals
        .into_iter()
        .map(|(date, (orders, revenue_cents))| DailyTotal {
            date,
            orders,
            revenue_cents,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductSort {
    #[default]
    Name,
    Price,
    Stock,
}

/// Parameters of a product list lookup. Also the cache parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuery {
    pub company_id: CompanyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub low_stock_only: bool,
    #[serde(default)]
    pub sort: ProductSort,
    pub page: u32,
    pub per_page: u32,
}

impl ProductQuery {
    pub fn new(company_id: CompanyId) -> Self {
        Self {
            company_id,
            category: None,
            low_stock_only: false,
            sort: ProductSort::Name,
            page: 1,
            per_page: 20,
        }
    }
}

/// Parameters of a supplier list lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierQuery {
    pub company_id: CompanyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
    pub page: u32,
    pub per_page: u32,
}

impl SupplierQuery {
    pub fn new(company_id: CompanyId) -> Self {
        Self {
            company_id,
            country: None,
            include_inactive: false,
            page: 1,
            per_page: 20,
        }
    }
}

fn paginate<T>(items: Vec<T>, page: u32, per_page: u32) -> Page<T> {
    let page = page.max(1);
    let per_page = per_page.clamp(1, MAX_PER_PAGE);
    let total = items.len() as u64;
    let skip = (page as usize - 1) * per_page as usize;
    Page {
        items: items.into_iter().skip(skip).take(per_page as usize).collect(),
        total,
        page,
        per_page,
    }
}

pub fn product_list(mut products: Vec<Product>, query: &ProductQuery) -> Page<Product> {
    products.retain(|p| {
        query
            .category
            .as_deref()
            .is_none_or(|c| p.category.eq_ignore_ascii_case(c))
            && (!query.low_stock_only || p.is_low_stock())
    });
    match query.sort {
        ProductSort::Name => products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
        ProductSort::Price => products.sort_by_key(|p| (p.price_cents, p.id)),
        ProductSort::Stock => products.sort_by_key(|p| (p.stock, p.id)),
    }
    paginate(products, query.page, query.per_page)
}

pub fn supplier_list(mut suppliers: Vec<Supplier>, query: &SupplierQuery) -> Page<Supplier> {
    suppliers.retain(|s| {
        (query.include_inactive || s.active)
            && query
                .country
                .as_deref()
                .is_none_or(|c| s.country.eq_ignore_ascii_case(c))
    });
    suppliers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    paginate(suppliers, query.page, query.per_page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn product(id: i64, category: &str, price_cents: i64, stock: i64) -> Product {
        Product {
            id,
            company_id: 1,
            supplier_id: None,
            name: format!("P{id:02}"),
            category: category.to_string(),
            price_cents,
            stock,
            reorder_level: 5,
        }
    }

    fn order(id: i64, product_id: i64, total_cents: i64, status: OrderStatus) -> Order {
        Order {
            id,
            company_id: 1,
            product_id,
            quantity: 2,
            total_cents,
            status,
            placed_at: datetime!(2024-05-02 09:00 UTC),
            fulfilled_at: (status == OrderStatus::Fulfilled)
                .then_some(datetime!(2024-05-02 21:00 UTC)),
        }
    }

    fn may() -> TimeRange {
        TimeRange::new(datetime!(2024-05-01 00:00 UTC), datetime!(2024-05-04 00:00 UTC))
    }

    #[test]
    fn test_dashboard_metrics() {
        let products = vec![product(1, "tools", 500, 2), product(2, "tools", 900, 50)];
        let orders = vec![
            order(1, 1, 1000, OrderStatus::Pending),
            order(2, 2, 1800, OrderStatus::Fulfilled),
            order(3, 2, 900, OrderStatus::Cancelled),
        ];
        let metrics = dashboard_metrics(&products, &[], &orders);
        assert_eq!(metrics.total_products, 2);
        assert_eq!(metrics.total_orders, 3);
        assert_eq!(metrics.pending_orders, 1);
        assert_eq!(metrics.revenue_cents, 2800);
        assert_eq!(metrics.low_stock_products, 1);
    }

    #[test]
    fn test_company_analytics_ranks_products() {
        let products = vec![product(1, "tools", 500, 20), product(2, "paint", 900, 20)];
        let orders = vec![
            order(1, 1, 1000, OrderStatus::Fulfilled),
            order(2, 2, 1800, OrderStatus::Fulfilled),
            order(3, 2, 1800, OrderStatus::Pending),
            order(4, 1, 9999, OrderStatus::Cancelled),
        ];
        let analytics = company_analytics(1, may(), &products, &orders);
        assert_eq!(analytics.order_count, 3);
        assert_eq!(analytics.revenue_cents, 4600);
        assert_eq!(analytics.average_order_cents, 1533);
        assert_eq!(analytics.top_products[0].product_id, 2);
        assert_eq!(analytics.top_products[0].units, 4);
        assert_eq!(analytics.categories[0].category, "paint");
    }

    #[test]
    fn test_kpis() {
        let products = vec![product(1, "tools", 500, 0), product(2, "tools", 900, 10)];
        let orders = vec![
            order(1, 1, 1000, OrderStatus::Fulfilled),
            order(2, 1, 1000, OrderStatus::Pending),
            order(3, 1, 1000, OrderStatus::Cancelled),
            order(4, 1, 1000, OrderStatus::Cancelled),
        ];
        let kpis = kpis(&products, &orders);
        assert!((kpis.fulfillment_rate - 50.0).abs() < 1e-9);
        assert!((kpis.cancellation_rate - 50.0).abs() < 1e-9);
        assert_eq!(kpis.average_fulfillment_hours, Some(12.0));
        assert!((kpis.low_stock_rate - 50.0).abs() < 1e-9);
        assert!((kpis.inventory_turnover - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_kpis_without_orders() {
        let kpis = kpis(&[], &[]);
        assert_eq!(kpis.fulfillment_rate, 0.0);
        assert_eq!(kpis.average_fulfillment_hours, None);
    }

    #[test]
    fn test_daily_totals_fill_empty_days() {
        let orders = vec![
            order(1, 1, 1000, OrderStatus::Fulfilled),
            order(2, 1, 500, OrderStatus::Pending),
        ];
        let daily = daily_order_totals(may(), &orders);
        assert_eq!(daily.len(), 3);
        assert_eq!(daily[0].orders, 0);
        assert_eq!(daily[1].orders, 2);
        assert_eq!(daily[1].revenue_cents, 1500);
        assert_eq!(daily[2].orders, 0);
    }

    #[test]
    fn test_admin_analytics_orders_companies_by_revenue() {
        let companies = vec![
            Company {
                id: 1,
                name: "Acme".into(),
                active: true,
                created_at: datetime!(2023-01-01 00:00 UTC),
            },
            Company {
                id: 2,
                name: "Globex".into(),
                active: false,
                created_at: datetime!(2023-01-01 00:00 UTC),
            },
        ];
        let mut orders = vec![order(1, 1, 100, OrderStatus::Fulfilled)];
        let mut big = order(2, 1, 5000, OrderStatus::Fulfilled);
        big.company_id = 2;
        orders.push(big);

        let admin = admin_analytics(&companies, &orders);
        assert_eq!(admin.total_companies, 2);
        assert_eq!(admin.active_companies, 1);
        assert_eq!(admin.total_revenue_cents, 5100);
        assert_eq!(admin.companies[0].company_id, 2);
    }

    #[test]
    fn test_product_list_filters_sorts_and_pages() {
        let products: Vec<Product> = (1..=7)
            .map(|id| product(id, if id % 2 == 0 { "paint" } else { "tools" }, 100 * (8 - id), 10))
            .collect();

        let mut query = ProductQuery::new(1);
        query.category = Some("TOOLS".into());
        query.sort = ProductSort::Price;
        query.per_page = 3;
        let page = product_list(products.clone(), &query);
        assert_eq!(page.total, 4);
        assert_eq!(
            page.items.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![7, 5, 3]
        );

        query.page = 2;
        let page = product_list(products, &query);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, 1);
    }

    #[test]
    fn test_supplier_list_hides_inactive() {
        let suppliers = vec![
            Supplier {
                id: 1,
                company_id: 1,
                name: "Beta".into(),
                country: "DE".into(),
                active: true,
            },
            Supplier {
                id: 2,
                company_id: 1,
                name: "Alpha".into(),
                country: "FR".into(),
                active: false,
            },
        ];
        let page = supplier_list(suppliers.clone(), &SupplierQuery::new(1));
        assert_eq!(page.total, 1);

        let mut query = SupplierQuery::new(1);
        query.include_inactive = true;
        let page = supplier_list(suppliers, &query);
        assert_eq!(page.items[0].name, "Alpha");
    }
}
