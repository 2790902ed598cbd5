//! Derived customer metrics
//!
//! Metrics are aggregates over a customer's orders that conditions may
//! reference by name as if they were customer fields.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate computed from a customer's orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedMetric {
    /// Count of all orders
    TotalOrders,

    /// Sum of completed order totals
    TotalSpent,

    /// Creation time of the most recent order
    LastOrderDate,
}

impl DerivedMetric {
    /// Resolve a condition field name to a metric
    pub fn from_field(field: &str) -> Option<Self> {
        match field {
            "total_orders" => Some(Self::TotalOrders),
            "total_spent" => Some(Self::TotalSpent),
            "last_order_date" => Some(Self::LastOrderDate),
            _ => None,
        }
    }

    /// Field name of the metric
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalOrders => "total_orders",
            Self::TotalSpent => "total_spent",
            Self::LastOrderDate => "last_order_date",
        }
    }
}

impl fmt::Display for DerivedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_field_roundtrip() {
        for metric in [
            DerivedMetric::TotalOrders,
            DerivedMetric::TotalSpent,
            DerivedMetric::LastOrderDate,
        ] {
            assert_eq!(DerivedMetric::from_field(metric.as_str()), Some(metric));
        }
        assert_eq!(DerivedMetric::from_field("email"), None);
    }
}
