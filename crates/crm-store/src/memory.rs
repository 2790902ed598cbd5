//! In-memory customer store
//!
//! Customers are keyed by id; orders and carts are indexed by customer id so
//! every trigger query is a single pass over the customer map.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use crm_core::{cart_status, order_status, Cart, Customer, DerivedMetric, Order};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, instrument, trace};

use crate::{CustomerStore, StoreError, StoreResult};

/// Serializable snapshot of a customer store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerData {
    #[serde(default)]
    pub customers: Vec<Customer>,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub carts: Vec<Cart>,
}

/// Customer store backed by concurrent hash maps
///
/// The store is responsible for:
/// - Holding customers, their orders and carts
/// - Answering the trigger queries and derived metrics
/// - Recording tag associations and segment updates
#[derive(Default)]
pub struct InMemoryCustomerStore {
    /// Customers keyed by id
    customers: DashMap<String, Customer>,
    /// Orders indexed by customer id
    orders: DashMap<String, Vec<Order>>,
    /// Carts indexed by customer id
    carts: DashMap<String, Vec<Cart>>,
    /// Tags indexed by customer id
    tags: DashMap<String, BTreeSet<String>>,
}

impl InMemoryCustomerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot
    pub fn from_data(data: CustomerData) -> Self {
        let store = Self::new();
        for customer in data.customers {
            store.insert_customer(customer);
        }
        for order in data.orders {
            store.insert_order(order);
        }
        for cart in data.carts {
            store.insert_cart(cart);
        }
        debug!(customers = store.customer_count(), "Loaded customer store");
        store
    }

    /// Insert or replace a customer
    pub fn insert_customer(&self, customer: Customer) {
        self.customers.insert(customer.id.clone(), customer);
    }

    /// Insert or replace an order (matched by order id)
    pub fn insert_order(&self, order: Order) {
        let mut orders = self.orders.entry(order.customer_id.clone()).or_default();
        match orders.iter_mut().find(|o| o.id == order.id) {
            Some(existing) => *existing = order,
            None => orders.push(order),
        }
    }

    /// Insert or replace a cart (matched by cart id)
    pub fn insert_cart(&self, cart: Cart) {
        let mut carts = self.carts.entry(cart.customer_id.clone()).or_default();
        match carts.iter_mut().find(|c| c.id == cart.id) {
            Some(existing) => *existing = cart,
            None => carts.push(cart),
        }
    }

    /// Remove a customer together with their orders, carts and tags
    pub fn remove_customer(&self, id: &str) -> Option<Customer> {
        self.orders.remove(id);
        self.carts.remove(id);
        self.tags.remove(id);
        self.customers.remove(id).map(|(_, c)| c)
    }

    /// Get the total number of customers
    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }

    /// Snapshot the store contents
    pub fn snapshot(&self) -> CustomerData {
        let mut data = CustomerData {
            customers: self.customers.iter().map(|c| c.value().clone()).collect(),
            orders: self.orders.iter().flat_map(|o| o.value().clone()).collect(),
            carts: self.carts.iter().flat_map(|c| c.value().clone()).collect(),
        };
        data.customers.sort_by(|a, b| a.id.cmp(&b.id));
        data.orders.sort_by(|a, b| a.id.cmp(&b.id));
        data.carts.sort_by(|a, b| a.id.cmp(&b.id));
        data
    }

    fn orders_of(&self, customer_id: &str) -> Vec<Order> {
        self.orders
            .get(customer_id)
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    /// Active customers matching a predicate, oldest first
    fn select<F>(&self, mut predicate: F) -> Vec<Customer>
    where
        F: FnMut(&Customer) -> bool,
    {
        let mut selected: Vec<Customer> = self
            .customers
            .iter()
            .filter(|c| c.is_active)
            .filter(|c| predicate(c.value()))
            .map(|c| c.value().clone())
            .collect();
        selected.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        selected
    }
}

/// Start of a lookback window ending at `now`
fn window_start(now: DateTime<Utc>, window: Duration) -> StoreResult<DateTime<Utc>> {
    now.checked_sub_signed(window)
        .ok_or_else(|| StoreError::Query(format!("lookback window of {} is out of range", window)))
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>> {
        Ok(self.customers.get(id).map(|c| c.clone()))
    }

    #[instrument(skip(self))]
    async fn find_created_within(
        &self,
        hours: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>> {
        let since = window_start(now, Duration::hours(i64::from(hours)))?;
        Ok(self.select(|c| c.created_at >= since))
    }

    #[instrument(skip(self))]
    async fn find_first_order(
        &self,
        window_hours: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>> {
        let since = window_start(now, Duration::hours(i64::from(window_hours)))?;
        Ok(self.select(|c| {
            let orders = self.orders_of(&c.id);
            let completed = orders
                .iter()
                .filter(|o| o.has_status(order_status::COMPLETED))
                .count();
            completed == 1 && orders.iter().any(|o| o.created_at >= since)
        }))
    }

    #[instrument(skip(self))]
    async fn find_abandoned_cart(
        &self,
        hours: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>> {
        let since = window_start(now, Duration::hours(i64::from(hours)))?;
        Ok(self.select(|c| {
            let carts = self.carts.get(&c.id).map(|v| v.clone()).unwrap_or_default();
            let orders = self.orders_of(&c.id);
            carts.iter().any(|cart| {
                cart.status == cart_status::ABANDONED
                    && cart.updated_at >= since
                    && cart.updated_at <= now
                    && !orders.iter().any(|o| o.created_at > cart.updated_at)
            })
        }))
    }

    #[instrument(skip(self))]
    async fn find_no_purchase(
        &self,
        days: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>> {
        let cutoff = window_start(now, Duration::days(i64::from(days)))?;
        Ok(self.select(|c| {
            match self.orders_of(&c.id).iter().map(|o| o.created_at).max() {
                None => true,
                Some(latest) => latest < cutoff,
            }
        }))
    }

    #[instrument(skip(self))]
    async fn find_birthday(&self, today: NaiveDate) -> StoreResult<Vec<Customer>> {
        Ok(self.select(|c| {
            c.birthday
                .map(|b| b.month() == today.month() && b.day() == today.day())
                .unwrap_or(false)
        }))
    }

    #[instrument(skip(self))]
    async fn find_order_status_change(
        &self,
        status: &str,
        within_hours: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>> {
        let since = window_start(now, Duration::hours(i64::from(within_hours)))?;
        Ok(self.select(|c| {
            self.orders_of(&c.id)
                .iter()
                .any(|o| o.has_status(status) && o.updated_at >= since)
        }))
    }

    async fn derived_metric(
        &self,
        customer_id: &str,
        metric: DerivedMetric,
    ) -> StoreResult<Option<Value>> {
        if !self.customers.contains_key(customer_id) {
            return Err(StoreError::CustomerNotFound(customer_id.to_string()));
        }

        let orders = self.orders_of(customer_id);
        let value = match metric {
            DerivedMetric::TotalOrders => Some(Value::from(orders.len() as u64)),
            DerivedMetric::TotalSpent => {
                let total: f64 = orders
                    .iter()
                    .filter(|o| o.has_status(order_status::COMPLETED))
                    .map(|o| o.total_amount)
                    .sum();
                Some(Value::from(total))
            }
            DerivedMetric::LastOrderDate => orders
                .iter()
                .map(|o| o.created_at)
                .max()
                .map(|t| Value::String(t.to_rfc3339())),
        };

        trace!(customer_id, %metric, ?value, "Computed derived metric");
        Ok(value)
    }

    #[instrument(skip(self))]
    async fn tag_customer(&self, customer_id: &str, tag: &str) -> StoreResult<bool> {
        if !self.customers.contains_key(customer_id) {
            return Err(StoreError::CustomerNotFound(customer_id.to_string()));
        }
        let inserted = self
            .tags
            .entry(customer_id.to_string())
            .or_default()
            .insert(tag.to_string());
        Ok(inserted)
    }

    #[instrument(skip(self, customer_ids), fields(count = customer_ids.len()))]
    async fn update_segment(&self, customer_ids: &[String], segment: &str) -> StoreResult<usize> {
        let mut updated = 0;
        for id in customer_ids {
            if let Some(mut customer) = self.customers.get_mut(id) {
                customer.segment = Some(segment.to_string());
                updated += 1;
            }
        }
        debug!(updated, segment, "Updated customer segment");
        Ok(updated)
    }

    async fn customer_tags(&self, customer_id: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .tags
            .get(customer_id)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default())
    }
}
