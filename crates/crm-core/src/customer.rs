//! Customer, order and cart records

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A customer record as held by the customer store
///
/// Well-known columns are typed fields; anything else the store carries for
/// a customer lives in `attributes` and is still addressable by condition
/// field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Unique identifier
    pub id: String,

    /// Full display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Phone number in E.164 form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// Birth date (the year is ignored by birthday triggers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<NaiveDate>,

    /// Marketing segment label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,

    /// Inactive customers are never selected by triggers
    #[serde(default = "default_active")]
    pub is_active: bool,

    /// When the customer record was created
    pub created_at: DateTime<Utc>,

    /// Additional store columns
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Value>,
}

fn default_active() -> bool {
    true
}

impl Customer {
    /// Create an active customer with only the required fields set
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
            phone: None,
            birthday: None,
            segment: None,
            is_active: true,
            created_at,
            attributes: HashMap::new(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the email address
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the phone number
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Set the birth date
    pub fn with_birthday(mut self, birthday: NaiveDate) -> Self {
        self.birthday = Some(birthday);
        self
    }

    /// Add an extra attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Mark the customer inactive
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Look up a field by its condition name
    ///
    /// Returns `None` when the field is absent. Timestamps are rendered as
    /// RFC 3339 strings and dates as `YYYY-MM-DD`.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "name" => self.name.clone().map(Value::String),
            "email" => self.email.clone().map(Value::String),
            "phone" => self.phone.clone().map(Value::String),
            "birthday" => self
                .birthday
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
            "segment" => self.segment.clone().map(Value::String),
            "is_active" => Some(Value::Bool(self.is_active)),
            "created_at" => Some(Value::String(self.created_at.to_rfc3339())),
            other => self.attributes.get(other).cloned(),
        }
    }

    /// Email address if present and non-empty
    pub fn email_address(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.trim().is_empty())
    }

    /// Phone number if present and non-empty
    pub fn phone_number(&self) -> Option<&str> {
        self.phone.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// First word of the name
    pub fn first_name(&self) -> Option<&str> {
        self.name.as_deref().and_then(|n| n.split_whitespace().next())
    }
}

/// An order placed by a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique identifier
    pub id: String,

    /// Owning customer
    pub customer_id: String,

    /// Order status (see [`crate::order_status`])
    pub status: String,

    /// Order total in the store currency
    #[serde(default)]
    pub total_amount: f64,

    /// When the order was placed
    pub created_at: DateTime<Utc>,

    /// When the order last changed (status transitions included)
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create an order whose `updated_at` equals its `created_at`
    pub fn new(
        id: impl Into<String>,
        customer_id: impl Into<String>,
        status: impl Into<String>,
        total_amount: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            customer_id: customer_id.into(),
            status: status.into(),
            total_amount,
            created_at,
            updated_at: created_at,
        }
    }

    /// Check the order status
    pub fn has_status(&self, status: &str) -> bool {
        self.status == status
    }
}

/// A shopping cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    /// Unique identifier
    pub id: String,

    /// Owning customer
    pub customer_id: String,

    /// Cart status (see [`crate::cart_status`])
    pub status: String,

    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Create a cart
    pub fn new(
        id: impl Into<String>,
        customer_id: impl Into<String>,
        status: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            customer_id: customer_id.into(),
            status: status.into(),
            updated_at,
        }
    }
}
