//! Customer and order store
//!
//! The automation engine never talks to a database directly. Everything it
//! needs from the customer/order record store goes through the
//! [`CustomerStore`] trait: the trigger queries, derived metrics for
//! conditions, and the tag/segment writes performed by actions.
//!
//! [`InMemoryCustomerStore`] is the implementation used by the standalone
//! server and by tests.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use crm_core::{Customer, DerivedMetric};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub use memory::{CustomerData, InMemoryCustomerStore};

/// Errors returned by a customer store
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("customer not found: {0}")]
    CustomerNotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Query and update operations the engine needs from the record store
///
/// Every query returns active customers only, each customer at most once.
/// Time-relative queries take `now` explicitly so callers control the clock.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Fetch one customer regardless of active status
    async fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>>;

    /// Customers created within the last `hours`
    async fn find_created_within(
        &self,
        hours: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>>;

    /// Customers with exactly one completed order and an order placed
    /// within the last `window_hours`
    async fn find_first_order(
        &self,
        window_hours: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>>;

    /// Customers with an abandoned cart updated within the last `hours` and
    /// no order placed after that update
    async fn find_abandoned_cart(
        &self,
        hours: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>>;

    /// Customers with no orders or whose latest order is older than `days`
    async fn find_no_purchase(&self, days: u32, now: DateTime<Utc>)
        -> StoreResult<Vec<Customer>>;

    /// Customers whose birthday month and day equal `today`
    async fn find_birthday(&self, today: NaiveDate) -> StoreResult<Vec<Customer>>;

    /// Customers with an order in `status` updated within `within_hours`
    async fn find_order_status_change(
        &self,
        status: &str,
        within_hours: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>>;

    /// Compute a derived metric; `None` when it has no value (no orders for
    /// `last_order_date`)
    async fn derived_metric(
        &self,
        customer_id: &str,
        metric: DerivedMetric,
    ) -> StoreResult<Option<Value>>;

    /// Associate a tag with a customer; returns false if it was already set
    async fn tag_customer(&self, customer_id: &str, tag: &str) -> StoreResult<bool>;

    /// Set the segment on every listed customer in one batch; returns the
    /// number of customers updated
    async fn update_segment(&self, customer_ids: &[String], segment: &str) -> StoreResult<usize>;

    /// Tags currently set on a customer
    async fn customer_tags(&self, customer_id: &str) -> StoreResult<Vec<String>>;
}

/// Thread-safe store handle
pub type SharedCustomerStore = Arc<dyn CustomerStore>;
