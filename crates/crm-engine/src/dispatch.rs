//! Action dispatch
//!
//! Every [`ActionKind`] has exactly one [`ActionHandler`] in the
//! dispatcher's table. Actions run in rule order; a failing action is
//! recorded and the next one still runs.

use async_trait::async_trait;
use crm_automation::{
    Action, ActionKind, ActionResults, AutomationRule, ChannelCounts, FailedAction,
};
use crm_core::{Context, Customer};
use crm_notify::{
    is_e164, placeholder_values, render, strip_html, Channel, OutboundMessage, SendReceipt,
    TransportRegistry, TransportResult,
};
use crm_store::SharedCustomerStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::{EngineError, EngineResult, EngineSettings};

/// What a successful action did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Message action counts
    Delivered(ChannelCounts),

    /// Customers tagged
    Tagged(u64),

    /// Customers moved to a segment
    Segmented(u64),
}

/// Executes one kind of action against a set of customers
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run the action
    ///
    /// An error means the action failed as a whole; per-recipient failures
    /// are reported through the outcome counts instead.
    async fn handle(
        &self,
        action: &Action,
        customers: &[Customer],
        context: &Context,
    ) -> EngineResult<ActionOutcome>;
}

/// Lookup table of action handlers
#[derive(Default, Clone)]
pub struct ActionDispatcher {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionDispatcher {
    /// Create a dispatcher with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dispatcher with the standard handler for every action kind
    pub fn with_defaults(
        store: SharedCustomerStore,
        transports: Arc<TransportRegistry>,
        settings: &EngineSettings,
    ) -> Self {
        let messages = Arc::new(MessageHandler::new(transports, settings));
        let mut dispatcher = Self::new();
        dispatcher.register_shared(ActionKind::SendEmail, messages.clone());
        dispatcher.register_shared(ActionKind::SendSms, messages.clone());
        dispatcher.register_shared(ActionKind::SendWhatsApp, messages);
        dispatcher.register(ActionKind::AddTag, TagHandler::new(store.clone()));
        dispatcher.register(ActionKind::UpdateSegment, SegmentHandler::new(store));
        dispatcher
    }

    /// Register the handler for an action kind, replacing any previous one
    pub fn register<H>(&mut self, kind: ActionKind, handler: H)
    where
        H: ActionHandler + 'static,
    {
        self.register_shared(kind, Arc::new(handler));
    }

    /// Register an already shared handler
    pub fn register_shared(&mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Check if a kind has a handler
    pub fn has_handler(&self, kind: ActionKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Run a rule's actions against the eligible customers
    pub async fn dispatch(
        &self,
        rule: &AutomationRule,
        customers: &[Customer],
        context: &Context,
    ) -> ActionResults {
        let mut results = ActionResults::default();

        for (index, action) in rule.actions.iter().enumerate() {
            let kind = action.kind();
            let outcome = match self.handlers.get(&kind) {
                Some(handler) => handler.handle(action, customers, context).await,
                None => Err(EngineError::NoHandler(kind.to_string())),
            };

            match outcome {
                Ok(ActionOutcome::Delivered(counts)) => {
                    if let Some(channel) = results.channel_mut(kind) {
                        channel.merge(counts);
                    }
                }
                Ok(ActionOutcome::Tagged(n)) => results.tags_added += n,
                Ok(ActionOutcome::Segmented(n)) => results.segments_updated += n,
                Err(e) => {
                    warn!(
                        rule_id = %rule.id,
                        context_id = %context.id,
                        action = %kind,
                        index,
                        error = %e,
                        "Action failed"
                    );
                    if let Some(channel) = results.channel_mut(kind) {
                        channel.failed += customers.len() as u64;
                    }
                    results.failed_actions.push(FailedAction {
                        index,
                        action_type: kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        results
    }
}

/// Sends email, SMS and WhatsApp actions through the transport registry
pub struct MessageHandler {
    transports: Arc<TransportRegistry>,
    email_batch_size: usize,
    sms_delay: Duration,
    whatsapp_delay: Duration,
}

impl MessageHandler {
    /// Create a new message handler
    pub fn new(transports: Arc<TransportRegistry>, settings: &EngineSettings) -> Self {
        Self {
            transports,
            email_batch_size: settings.email_batch_size.max(1),
            sms_delay: settings.sms_delay,
            whatsapp_delay: settings.whatsapp_delay,
        }
    }

    async fn send_email(
        &self,
        subject: &str,
        html_content: Option<&str>,
        template_id: Option<&str>,
        customers: &[Customer],
    ) -> EngineResult<ChannelCounts> {
        let transport = self.transports.get(Channel::Email)?;
        let mut counts = ChannelCounts::default();

        let mut messages = Vec::with_capacity(customers.len());
        for customer in customers {
            let Some(email) = customer.email_address() else {
                counts.skipped += 1;
                continue;
            };
            let values = placeholder_values(customer);
            let html = html_content.map(|h| render(h, &values)).unwrap_or_default();

            let mut message = OutboundMessage::new(Channel::Email, email, html.clone())
                .for_customer(&customer.id)
                .with_subject(render(subject, &values));
            if !html.is_empty() {
                message.text = Some(strip_html(&html));
            }
            if let Some(template_id) = template_id {
                message.template_id = Some(template_id.to_string());
                message.template_data = Some(Value::Object(
                    values.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
                ));
            }
            messages.push(message);
        }

        for chunk in messages.chunks(self.email_batch_size) {
            match transport.send_batch(chunk).await {
                Ok(results) => {
                    for result in &results {
                        tally(&mut counts, result, Channel::Email);
                    }
                    counts.failed += chunk.len().saturating_sub(results.len()) as u64;
                }
                Err(e) => {
                    warn!(error = %e, batch = chunk.len(), "Email batch failed");
                    counts.failed += chunk.len() as u64;
                }
            }
        }

        Ok(counts)
    }

    async fn send_paced(
        &self,
        channel: Channel,
        message: &str,
        from: Option<&str>,
        media_url: Option<&str>,
        customers: &[Customer],
    ) -> EngineResult<ChannelCounts> {
        let transport = self.transports.get(channel)?;
        let delay = match channel {
            Channel::WhatsApp => self.whatsapp_delay,
            _ => self.sms_delay,
        };
        let mut counts = ChannelCounts::default();
        let mut called = false;

        for customer in customers {
            let Some(phone) = customer.phone_number() else {
                counts.skipped += 1;
                continue;
            };
            if !is_e164(phone) {
                trace!(customer_id = %customer.id, %channel, "Invalid phone number");
                counts.failed += 1;
                continue;
            }

            let values = placeholder_values(customer);
            let mut outbound = OutboundMessage::new(channel, phone, render(message, &values))
                .for_customer(&customer.id);
            outbound.from = from.map(str::to_string);
            outbound.media_url = media_url.map(str::to_string);

            if called && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            called = true;

            let result = transport.send(&outbound).await;
            tally(&mut counts, &result, channel);
        }

        Ok(counts)
    }
}

fn tally(counts: &mut ChannelCounts, result: &TransportResult<SendReceipt>, channel: Channel) {
    match result {
        Ok(receipt) => {
            trace!(%channel, message_id = %receipt.message_id, "Message sent");
            counts.sent += 1;
        }
        Err(e) => {
            warn!(%channel, error = %e, "Message failed");
            counts.failed += 1;
        }
    }
}

#[async_trait]
impl ActionHandler for MessageHandler {
    async fn handle(
        &self,
        action: &Action,
        customers: &[Customer],
        context: &Context,
    ) -> EngineResult<ActionOutcome> {
        let counts = match action {
            Action::SendEmail {
                subject,
                html_content,
                template_id,
            } => {
                self.send_email(subject, html_content.as_deref(), template_id.as_deref(), customers)
                    .await?
            }
            Action::SendSms { message, from } => {
                self.send_paced(Channel::Sms, message, from.as_deref(), None, customers)
                    .await?
            }
            Action::SendWhatsApp { message, media_url } => {
                self.send_paced(Channel::WhatsApp, message, None, media_url.as_deref(), customers)
                    .await?
            }
            other => return Err(EngineError::NoHandler(other.kind().to_string())),
        };

        debug!(
            context_id = %context.id,
            action = %action.kind(),
            sent = counts.sent,
            failed = counts.failed,
            skipped = counts.skipped,
            "Message action finished"
        );
        Ok(ActionOutcome::Delivered(counts))
    }
}

/// Tags customers through the customer store
pub struct TagHandler {
    store: SharedCustomerStore,
}

impl TagHandler {
    /// Create a new tag handler
    pub fn new(store: SharedCustomerStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActionHandler for TagHandler {
    async fn handle(
        &self,
        action: &Action,
        customers: &[Customer],
        _context: &Context,
    ) -> EngineResult<ActionOutcome> {
        let Action::AddTag { tag } = action else {
            return Err(EngineError::NoHandler(action.kind().to_string()));
        };

        let mut tagged = 0;
        for customer in customers {
            self.store.tag_customer(&customer.id, tag).await?;
            tagged += 1;
        }
        Ok(ActionOutcome::Tagged(tagged))
    }
}

/// Updates customer segments through the customer store
pub struct SegmentHandler {
    store: SharedCustomerStore,
}

impl SegmentHandler {
    /// Create a new segment handler
    pub fn new(store: SharedCustomerStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActionHandler for SegmentHandler {
    async fn handle(
        &self,
        action: &Action,
        customers: &[Customer],
        _context: &Context,
    ) -> EngineResult<ActionOutcome> {
        let Action::UpdateSegment { segment } = action else {
            return Err(EngineError::NoHandler(action.kind().to_string()));
        };

        let ids: Vec<String> = customers.iter().map(|c| c.id.clone()).collect();
        let updated = self.store.update_segment(&ids, segment).await?;
        Ok(ActionOutcome::Segmented(updated as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crm_automation::{RuleConfig, Trigger};
    use crm_notify::{Transport, TransportError};
    use crm_store::{CustomerStore, InMemoryCustomerStore};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<OutboundMessage>>,
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, message: &OutboundMessage) -> TransportResult<SendReceipt> {
            if message.to.contains("reject") {
                return Err(TransportError::Rejected(message.to.clone()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(SendReceipt::new("id", "queued"))
        }

        async fn send_batch(
            &self,
            messages: &[OutboundMessage],
        ) -> TransportResult<Vec<TransportResult<SendReceipt>>> {
            self.batches.lock().unwrap().push(messages.len());
            let mut results = Vec::new();
            for message in messages {
                results.push(self.send(message).await);
            }
            Ok(results)
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            email_batch_size: 2,
            sms_delay: Duration::ZERO,
            whatsapp_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn customers() -> Vec<Customer> {
        vec![
            Customer::new("a", Utc::now())
                .with_name("Ann Lee")
                .with_email("ann@example.com")
                .with_phone("+15550000001"),
            Customer::new("b", Utc::now())
                .with_email("reject@example.com")
                .with_phone("5550000002"),
            Customer::new("c", Utc::now()).with_email("cy@example.com"),
            Customer::new("d", Utc::now()).with_phone("+15550000004"),
        ]
    }

    fn messaging(registry: Arc<TransportRegistry>) -> ActionDispatcher {
        let store = Arc::new(InMemoryCustomerStore::new());
        ActionDispatcher::with_defaults(store, registry, &settings())
    }

    fn rule(actions: Vec<Action>) -> AutomationRule {
        AutomationRule::from_config(RuleConfig::new("r", Trigger::Birthday, actions), Utc::now())
    }

    #[tokio::test]
    async fn test_email_batches_and_counts() {
        let recorder = Arc::new(Recorder::default());
        let registry = Arc::new(TransportRegistry::new());
        registry.register_shared(Channel::Email, recorder.clone());
        let dispatcher = messaging(registry);

        let email = Action::email("Hi {{first_name}}", "<p>Hello {{name}}</p>");
        let results = dispatcher
            .dispatch(&rule(vec![email]), &customers(), &Context::manual())
            .await;

        assert_eq!(
            results.emails,
            ChannelCounts {
                sent: 2,
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(*recorder.batches.lock().unwrap(), vec![2, 1]);
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent[0].subject.as_deref(), Some("Hi Ann"));
        assert_eq!(sent[0].text.as_deref(), Some("Hello Ann Lee"));
    }

    #[tokio::test]
    async fn test_sms_skips_and_rejects_invalid_numbers() {
        let recorder = Arc::new(Recorder::default());
        let registry = Arc::new(TransportRegistry::new());
        registry.register_shared(Channel::Sms, recorder.clone());
        let dispatcher = messaging(registry);

        let results = dispatcher
            .dispatch(&rule(vec![Action::sms("Hi {{name}}")]), &customers(), &Context::manual())
            .await;

        assert_eq!(
            results.sms,
            ChannelCounts {
                sent: 2,
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(recorder.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_transport_fails_whole_action() {
        let recorder = Arc::new(Recorder::default());
        let registry = Arc::new(TransportRegistry::new());
        registry.register_shared(Channel::Sms, recorder.clone());
        let dispatcher = messaging(registry);

        let results = dispatcher
            .dispatch(
                &rule(vec![Action::whatsapp("Hi"), Action::sms("Hello")]),
                &customers(),
                &Context::manual(),
            )
            .await;

        assert_eq!(results.whatsapp.failed, 4);
        assert_eq!(results.failed_actions.len(), 1);
        assert_eq!(results.failed_actions[0].action_type, ActionKind::SendWhatsApp);
        assert_eq!(results.sms.sent, 2);
    }

    #[tokio::test]
    async fn test_tag_and_segment() {
        let store = Arc::new(InMemoryCustomerStore::new());
        for customer in customers() {
            store.insert_customer(customer);
        }
        let registry = Arc::new(TransportRegistry::new());
        let dispatcher = ActionDispatcher::with_defaults(store.clone(), registry, &settings());

        let results = dispatcher
            .dispatch(
                &rule(vec![Action::add_tag("vip"), Action::update_segment("gold")]),
                &customers()[..2],
                &Context::manual(),
            )
            .await;

        assert_eq!(results.tags_added, 2);
        assert_eq!(results.segments_updated, 2);
        assert_eq!(store.customer_tags("a").await.unwrap(), vec!["vip"]);
    }

    #[tokio::test]
    async fn test_unregistered_handler_is_recorded() {
        let dispatcher = ActionDispatcher::new();
        assert!(!dispatcher.has_handler(ActionKind::AddTag));
        let results = dispatcher
            .dispatch(&rule(vec![Action::add_tag("x")]), &customers(), &Context::manual())
            .await;
        assert_eq!(results.failed_actions.len(), 1);
    }
}
