//! Message personalization
//!
//! Message bodies use `{{key}}` placeholders. Keys resolve against the
//! recipient's standard fields and custom attributes; unknown keys are left
//! in place.

use crm_core::Customer;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Fallback for `{{name}}` and `{{first_name}}`
pub const DEFAULT_NAME: &str = "Customer";

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
static HTML_TAG: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid placeholder pattern")
    })
}

fn html_tag() -> &'static Regex {
    HTML_TAG.get_or_init(|| Regex::new(r"<[^>]*>?").expect("valid tag pattern"))
}

/// Placeholder values for a customer
pub fn placeholder_values(customer: &Customer) -> HashMap<String, String> {
    let mut values: HashMap<String, String> = customer
        .attributes
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect();

    let name = customer
        .name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(DEFAULT_NAME);
    values.insert("name".to_string(), name.to_string());
    values.insert(
        "first_name".to_string(),
        customer.first_name().unwrap_or(DEFAULT_NAME).to_string(),
    );
    values.insert(
        "email".to_string(),
        customer.email.clone().unwrap_or_default(),
    );
    values.insert(
        "phone".to_string(),
        customer.phone.clone().unwrap_or_default(),
    );
    values.insert("customer_id".to_string(), customer.id.clone());
    values
}

/// Substitute placeholders
pub fn render(template: &str, values: &HashMap<String, String>) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Plain-text form of an HTML body
pub fn strip_html(html: &str) -> String {
    html_tag().replace_all(html, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn customer() -> Customer {
        Customer::new("c42", Utc::now())
            .with_name("Grace Brewster Hopper")
            .with_phone("+15551234567")
            .with_attribute("coupon", Value::String("SAVE10".into()))
            .with_attribute("points", serde_json::json!(120))
    }

    #[test]
    fn test_render_standard_fields() {
        let values = placeholder_values(&customer());
        let out = render("Hi {{first_name}} ({{name}}), call {{ phone }}", &values);
        assert_eq!(out, "Hi Grace (Grace Brewster Hopper), call +15551234567");
    }

    #[test]
    fn test_render_attributes_and_unknown() {
        let values = placeholder_values(&customer());
        let out = render("Use {{coupon}} for {{points}} points {{missing}}", &values);
        assert_eq!(out, "Use SAVE10 for 120 points {{missing}}");
    }

    #[test]
    fn test_default_name() {
        let values = placeholder_values(&Customer::new("c1", Utc::now()));
        assert_eq!(render("Dear {{name}}/{{first_name}}", &values), "Dear Customer/Customer");
        assert_eq!(render("{{email}}", &values), "");
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hello <b>Ada</b></p>"), "Hello Ada");
        assert_eq!(strip_html("plain"), "plain");
    }
}
