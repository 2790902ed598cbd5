//! Notification delivery for automation actions
//!
//! The engine never speaks a provider protocol. It renders an
//! [`OutboundMessage`] per recipient and hands it to the [`Transport`]
//! registered for the message's [`Channel`].

mod log_transport;
pub mod phone;
mod registry;
pub mod template;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use log_transport::LogTransport;
pub use phone::is_e164;
pub use registry::TransportRegistry;
pub use template::{placeholder_values, render, strip_html};

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    #[serde(rename = "whatsapp")]
    WhatsApp,
}

impl Channel {
    /// Channel name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::WhatsApp => "whatsapp",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by transports
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("no transport registered for channel: {0}")]
    NotRegistered(Channel),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A fully rendered message for one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: Channel,

    /// Email address or E.164 phone number
    pub to: String,

    /// Customer the message is for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,

    /// Email subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Rendered body (HTML for email)
    pub body: String,

    /// Plain-text alternative for email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Provider-side template id; `template_data` then replaces `body`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_data: Option<Value>,

    /// Sender override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Attached media for WhatsApp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl OutboundMessage {
    /// Create a message with only a recipient and body
    pub fn new(channel: Channel, to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            channel,
            to: to.into(),
            customer_id: None,
            subject: None,
            body: body.into(),
            text: None,
            template_id: None,
            template_data: None,
            from: None,
            media_url: None,
        }
    }

    /// Set the customer the message is for
    pub fn for_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    /// Set the subject
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Provider acknowledgement of one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub status: String,
}

impl SendReceipt {
    /// Create a receipt
    pub fn new(message_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            status: status.into(),
        }
    }
}

/// A notification provider
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message
    async fn send(&self, message: &OutboundMessage) -> TransportResult<SendReceipt>;

    /// Send several messages in one call
    ///
    /// The outer error means the whole batch failed; otherwise each message
    /// has its own result, in order.
    async fn send_batch(
        &self,
        messages: &[OutboundMessage],
    ) -> TransportResult<Vec<TransportResult<SendReceipt>>> {
        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            results.push(self.send(message).await);
        }
        Ok(results)
    }
}

/// Thread-safe transport handle
pub type SharedTransport = Arc<dyn Transport>;
