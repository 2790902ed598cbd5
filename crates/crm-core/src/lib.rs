//! Core types for CRM automation
//!
//! This crate provides the fundamental types shared by every other crate in
//! the workspace: Customer, Order, Cart, the derived customer metrics, the
//! execution Context and the Clock abstraction.

mod clock;
mod context;
mod customer;
mod metric;

pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use context::{Context, Origin};
pub use customer::{Cart, Customer, Order};
pub use metric::DerivedMetric;

/// Well-known order statuses
pub mod order_status {
    /// Order has been paid and fulfilled
    pub const COMPLETED: &str = "completed";

    /// Order is awaiting payment or fulfilment
    pub const PENDING: &str = "pending";

    /// Order was cancelled before completion
    pub const CANCELLED: &str = "cancelled";
}

/// Well-known cart statuses
pub mod cart_status {
    /// Cart is still being filled
    pub const ACTIVE: &str = "active";

    /// Cart was left without checkout
    pub const ABANDONED: &str = "abandoned";

    /// Cart was checked out into an order
    pub const CONVERTED: &str = "converted";
}
