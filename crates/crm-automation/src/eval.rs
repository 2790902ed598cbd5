//! Condition evaluation
//!
//! Resolves condition fields against a customer, computing derived metrics
//! through the customer store only when a condition actually needs them.

use chrono::DateTime;
use crm_core::{Customer, DerivedMetric};
use crm_store::{SharedCustomerStore, StoreResult};
use serde_json::Value;
use tracing::trace;

use crate::condition::{Condition, Operator};

/// Evaluates rule conditions against customers
#[derive(Clone)]
pub struct ConditionEvaluator {
    store: SharedCustomerStore,
}

impl ConditionEvaluator {
    /// Create a new evaluator
    pub fn new(store: SharedCustomerStore) -> Self {
        Self { store }
    }

    /// Check whether a customer satisfies every condition
    ///
    /// Stops at the first failing condition; an empty list is always
    /// satisfied.
    pub async fn is_eligible(
        &self,
        customer: &Customer,
        conditions: &[Condition],
    ) -> StoreResult<bool> {
        for condition in conditions {
            let actual = self.resolve_field(customer, &condition.field).await?;
            let passed = evaluate_operator(condition.operator, actual.as_ref(), &condition.value);
            trace!(
                customer_id = %customer.id,
                field = %condition.field,
                operator = %condition.operator,
                passed,
                "Evaluated condition"
            );
            if !passed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Keep the customers that satisfy every condition, preserving order
    pub async fn filter_eligible(
        &self,
        customers: Vec<Customer>,
        conditions: &[Condition],
    ) -> StoreResult<Vec<Customer>> {
        if conditions.is_empty() {
            return Ok(customers);
        }

        let mut eligible = Vec::with_capacity(customers.len());
        for customer in customers {
            if self.is_eligible(&customer, conditions).await? {
                eligible.push(customer);
            }
        }
        Ok(eligible)
    }

    async fn resolve_field(&self, customer: &Customer, field: &str) -> StoreResult<Option<Value>> {
        match DerivedMetric::from_field(field) {
            Some(metric) => self.store.derived_metric(&customer.id, metric).await,
            None => Ok(customer.field(field)),
        }
    }
}

/// Apply an operator to a resolved field value
///
/// `actual` is `None` when the customer has no such field.
pub fn evaluate_operator(operator: Operator, actual: Option<&Value>, expected: &Value) -> bool {
    let actual = actual.filter(|v| !v.is_null());

    match operator {
        Operator::Equals => values_equal(actual, expected),
        Operator::NotEquals => !values_equal(actual, expected),
        Operator::GreaterThan => compare(actual, expected, |a, b| a > b),
        Operator::LessThan => compare(actual, expected, |a, b| a < b),
        Operator::GreaterThanOrEqual => compare(actual, expected, |a, b| a >= b),
        Operator::LessThanOrEqual => compare(actual, expected, |a, b| a <= b),
        Operator::Contains => text(actual).contains(&text(Some(expected))),
        Operator::NotContains => !text(actual).contains(&text(Some(expected))),
        Operator::StartsWith => text(actual).starts_with(&text(Some(expected))),
        Operator::EndsWith => text(actual).ends_with(&text(Some(expected))),
        Operator::IsNull => actual.is_none(),
        Operator::IsNotNull => actual.is_some(),
        Operator::Unknown => false,
    }
}

fn values_equal(actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return expected.is_null();
    };
    if expected.is_null() {
        return false;
    }

    match (to_number(actual), to_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => plain_string(actual) == plain_string(expected),
    }
}

fn compare(actual: Option<&Value>, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(to_number), to_number(expected)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

/// Coerce a value to a number; RFC 3339 timestamps become epoch milliseconds
fn to_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<f64>().ok().or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|t| t.timestamp_millis() as f64)
            })
        }
        _ => None,
    };
    number.filter(|n| !n.is_nan())
}

fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Lowercased string form; absent and null become the empty string
fn text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v) => plain_string(v).to_lowercase(),
    }
}
