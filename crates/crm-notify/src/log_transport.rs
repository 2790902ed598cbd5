//! Transport that only writes messages to the log

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use ulid::Ulid;

use crate::{OutboundMessage, SendReceipt, Transport, TransportResult};

/// Logs every message instead of delivering it
///
/// Used by the standalone server when no provider is configured.
#[derive(Debug, Default)]
pub struct LogTransport {
    sent: AtomicU64,
}

impl LogTransport {
    /// Create a new log transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages logged so far
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, message: &OutboundMessage) -> TransportResult<SendReceipt> {
        let message_id = Ulid::new().to_string();
        self.sent.fetch_add(1, Ordering::Relaxed);
        info!(
            channel = %message.channel,
            to = %message.to,
            customer_id = message.customer_id.as_deref().unwrap_or("-"),
            subject = message.subject.as_deref().unwrap_or("-"),
            template_id = message.template_id.as_deref().unwrap_or("-"),
            %message_id,
            "{}",
            message.body
        );
        Ok(SendReceipt::new(message_id, "logged"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Channel;

    #[tokio::test]
    async fn test_batch_uses_send() {
        let transport = LogTransport::new();
        let messages = vec![
            OutboundMessage::new(Channel::Email, "a@example.com", "<p>a</p>"),
            OutboundMessage::new(Channel::Email, "b@example.com", "<p>b</p>"),
        ];

        let results = transport.send_batch(&messages).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(transport.sent(), 2);
    }
}
