//! Trigger types
//!
//! A trigger selects the candidate customers a rule runs against. Each
//! variant carries its own lookback configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rule::{RuleError, RuleResult};

/// Longest hour-based lookback window (ten years)
pub const MAX_WINDOW_HOURS: u32 = 87_600;

/// Longest day-based lookback window (ten years)
pub const MAX_WINDOW_DAYS: u32 = 3_650;

/// Trigger definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger_type", rename_all = "snake_case")]
pub enum Trigger {
    /// Customers created recently
    NewCustomer {
        #[serde(default = "default_hours")]
        hours: u32,
    },

    /// Customers who just completed their first order
    FirstOrder {
        #[serde(default = "default_hours")]
        hours: u32,
    },

    /// Customers who left a cart behind
    AbandonedCart {
        #[serde(default = "default_hours")]
        hours: u32,
    },

    /// Customers who have not ordered for a while
    NoPurchase {
        #[serde(default = "default_days")]
        days: u32,
    },

    /// Customers whose birthday is today
    Birthday,

    /// Customers with an order that recently moved to a status
    OrderStatusChange {
        #[serde(default = "default_status")]
        status: String,
        #[serde(default = "default_within_hours")]
        within_hours: u32,
    },
}

fn default_hours() -> u32 {
    24
}

fn default_days() -> u32 {
    30
}

fn default_status() -> String {
    crm_core::order_status::COMPLETED.to_string()
}

fn default_within_hours() -> u32 {
    1
}

impl Trigger {
    /// Trigger type name as stored
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewCustomer { .. } => "new_customer",
            Self::FirstOrder { .. } => "first_order",
            Self::AbandonedCart { .. } => "abandoned_cart",
            Self::NoPurchase { .. } => "no_purchase",
            Self::Birthday => "birthday",
            Self::OrderStatusChange { .. } => "order_status_change",
        }
    }

    /// Create a new-customer trigger
    pub fn new_customer(hours: u32) -> Self {
        Self::NewCustomer { hours }
    }

    /// Create a no-purchase trigger
    pub fn no_purchase(days: u32) -> Self {
        Self::NoPurchase { days }
    }

    /// Check the lookback windows are usable
    pub fn validate(&self) -> RuleResult<()> {
        match self {
            Self::NewCustomer { hours }
            | Self::FirstOrder { hours }
            | Self::AbandonedCart { hours } => {
                check_window(self.kind(), "hours", *hours, MAX_WINDOW_HOURS)
            }
            Self::NoPurchase { days } => check_window(self.kind(), "days", *days, MAX_WINDOW_DAYS),
            Self::Birthday => Ok(()),
            Self::OrderStatusChange {
                status,
                within_hours,
            } => {
                if status.trim().is_empty() {
                    return Err(RuleError::Validation(
                        "order_status_change trigger requires a status".to_string(),
                    ));
                }
                check_window(self.kind(), "within_hours", *within_hours, MAX_WINDOW_HOURS)
            }
        }
    }
}

fn check_window(kind: &str, field: &str, value: u32, max: u32) -> RuleResult<()> {
    if value == 0 || value > max {
        return Err(RuleError::Validation(format!(
            "{} trigger requires {} between 1 and {}",
            kind, field, max
        )));
    }
    Ok(())
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}
