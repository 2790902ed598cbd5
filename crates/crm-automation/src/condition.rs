//! Condition types
//!
//! A condition is a field/operator/value triple tested against a customer.
//! A rule's conditions are combined with AND.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::rule::{RuleError, RuleResult};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,

    /// Any operator name this engine does not know; always evaluates false
    #[serde(other)]
    Unknown,
}

impl Operator {
    /// Operator name as stored
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThanOrEqual => "less_than_or_equal",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the operator ignores the comparison value
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single eligibility test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Customer attribute or derived metric name
    pub field: String,

    /// Comparison operator
    pub operator: Operator,

    /// Value to compare against (unused by `is_null`/`is_not_null`)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl Condition {
    /// Create a condition
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Reject conditions without a field name
    pub fn validate(&self) -> RuleResult<()> {
        if self.field.trim().is_empty() {
            return Err(RuleError::Validation(
                "condition field must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
