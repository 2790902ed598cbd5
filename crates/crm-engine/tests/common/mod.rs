//! Common test utilities for engine integration tests
//!
//! Provides a fully wired [`Harness`] around a mock clock, in-memory
//! stores and recording transports.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use crm_automation::{
    AutomationRule, ExecutionLog, ExecutionLogEntry, InMemoryExecutionLog, RuleError, RuleManager,
    RulePatch, RuleResult, RuleStore, SharedExecutionLog, SharedRuleStore,
};
use crm_core::{Clock, Customer, DerivedMetric, MockClock, Order};
use crm_engine::{AutomationService, EngineSettings, ScheduleZone};
use crm_notify::{
    Channel, OutboundMessage, SendReceipt, Transport, TransportError, TransportRegistry,
    TransportResult,
};
use crm_store::{
    CustomerStore, InMemoryCustomerStore, SharedCustomerStore, StoreError, StoreResult,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Monday 2024-06-03 09:05 UTC
pub fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 5, 0).unwrap()
}

/// Engine settings with no pacing and UTC calendar
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        max_concurrent_rules: 2,
        email_batch_size: 1000,
        sms_delay: std::time::Duration::ZERO,
        whatsapp_delay: std::time::Duration::ZERO,
        zone: ScheduleZone::from_offset_minutes(0).unwrap(),
    }
}

/// Transport that records every message it accepts
#[derive(Default)]
pub struct RecordingTransport {
    pub messages: Mutex<Vec<OutboundMessage>>,
    pub calls: AtomicUsize,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: &OutboundMessage) -> TransportResult<SendReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(message.clone());
        Ok(SendReceipt::new(format!("msg-{}", self.call_count()), "sent"))
    }

    async fn send_batch(
        &self,
        messages: &[OutboundMessage],
    ) -> TransportResult<Vec<TransportResult<SendReceipt>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().extend(messages.iter().cloned());
        Ok(messages
            .iter()
            .map(|_| Ok(SendReceipt::new("batch", "sent")))
            .collect())
    }
}

/// Transport whose every call fails
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn send(&self, _message: &OutboundMessage) -> TransportResult<SendReceipt> {
        Err(TransportError::Unavailable("provider down".into()))
    }

    async fn send_batch(
        &self,
        _messages: &[OutboundMessage],
    ) -> TransportResult<Vec<TransportResult<SendReceipt>>> {
        Err(TransportError::Unavailable("provider down".into()))
    }
}

/// Transport that blocks each send until released
#[derive(Default)]
pub struct GatedTransport {
    pub entered: Notify,
    pub release: Notify,
    pub calls: AtomicUsize,
}

impl GatedTransport {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, _message: &OutboundMessage) -> TransportResult<SendReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(SendReceipt::new("gated", "sent"))
    }
}

/// Execution log whose appends always fail
pub struct FailingLog;

#[async_trait]
impl ExecutionLog for FailingLog {
    async fn append(&self, _entries: Vec<ExecutionLogEntry>) -> RuleResult<()> {
        Err(RuleError::Persistence("disk full".into()))
    }

    async fn for_rule(&self, _rule_id: &str) -> RuleResult<Vec<ExecutionLogEntry>> {
        Ok(Vec::new())
    }

    async fn all(&self) -> RuleResult<Vec<ExecutionLogEntry>> {
        Ok(Vec::new())
    }

    async fn discard_run(&self, _context_id: &str) -> RuleResult<usize> {
        Ok(0)
    }
}

/// Rule store that cannot save execution counters
pub struct CounterlessRuleStore {
    pub inner: Arc<RuleManager>,
}

#[async_trait]
impl RuleStore for CounterlessRuleStore {
    async fn insert(&self, rule: AutomationRule) -> RuleResult<AutomationRule> {
        self.inner.insert(rule).await
    }
    async fn get(&self, id: &str) -> RuleResult<Option<AutomationRule>> {
        RuleStore::get(self.inner.as_ref(), id).await
    }
    async fn list(&self) -> RuleResult<Vec<AutomationRule>> {
        self.inner.list().await
    }
    async fn update(
        &self,
        id: &str,
        patch: RulePatch,
        now: DateTime<Utc>,
    ) -> RuleResult<AutomationRule> {
        RuleStore::update(self.inner.as_ref(), id, patch, now).await
    }
    async fn remove(&self, id: &str) -> RuleResult<AutomationRule> {
        RuleStore::remove(self.inner.as_ref(), id).await
    }
    async fn toggle(&self, id: &str, now: DateTime<Utc>) -> RuleResult<AutomationRule> {
        RuleStore::toggle(self.inner.as_ref(), id, now).await
    }
    async fn record_execution(
        &self,
        _id: &str,
        _customers: u64,
        _at: DateTime<Utc>,
    ) -> RuleResult<AutomationRule> {
        Err(RuleError::Persistence("read-only volume".into()))
    }
}

/// Customer store whose birthday query fails
pub struct BrokenBirthdayStore {
    pub inner: Arc<InMemoryCustomerStore>,
}

#[async_trait]
impl CustomerStore for BrokenBirthdayStore {
    async fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>> {
        self.inner.get_customer(id).await
    }
    async fn find_created_within(
        &self,
        hours: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>> {
        self.inner.find_created_within(hours, now).await
    }
    async fn find_first_order(&self, hours: u32, now: DateTime<Utc>) -> StoreResult<Vec<Customer>> {
        self.inner.find_first_order(hours, now).await
    }
    async fn find_abandoned_cart(
        &self,
        hours: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>> {
        self.inner.find_abandoned_cart(hours, now).await
    }
    async fn find_no_purchase(&self, days: u32, now: DateTime<Utc>) -> StoreResult<Vec<Customer>> {
        self.inner.find_no_purchase(days, now).await
    }
    async fn find_birthday(&self, _today: NaiveDate) -> StoreResult<Vec<Customer>> {
        Err(StoreError::Unavailable("replica lag".into()))
    }
    async fn find_order_status_change(
        &self,
        status: &str,
        within_hours: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Customer>> {
        self.inner.find_order_status_change(status, within_hours, now).await
    }
    async fn derived_metric(
        &self,
        customer_id: &str,
        metric: DerivedMetric,
    ) -> StoreResult<Option<Value>> {
        self.inner.derived_metric(customer_id, metric).await
    }
    async fn tag_customer(&self, customer_id: &str, tag: &str) -> StoreResult<bool> {
        self.inner.tag_customer(customer_id, tag).await
    }
    async fn update_segment(&self, customer_ids: &[String], segment: &str) -> StoreResult<usize> {
        self.inner.update_segment(customer_ids, segment).await
    }
    async fn customer_tags(&self, customer_id: &str) -> StoreResult<Vec<String>> {
        self.inner.customer_tags(customer_id).await
    }
}

/// A wired engine with handles to every collaborator
pub struct Harness {
    pub clock: MockClock,
    pub customers: Arc<InMemoryCustomerStore>,
    pub rules: Arc<RuleManager>,
    pub logs: Arc<InMemoryExecutionLog>,
    pub email: Arc<RecordingTransport>,
    pub sms: Arc<RecordingTransport>,
    pub transports: Arc<TransportRegistry>,
    pub service: AutomationService,
}

pub struct HarnessBuilder {
    now: DateTime<Utc>,
    log: Option<SharedExecutionLog>,
    store: Option<SharedCustomerStore>,
    customers: Arc<InMemoryCustomerStore>,
    whatsapp: Option<Arc<dyn Transport>>,
    counterless: bool,
}

impl HarnessBuilder {
    /// Serve rules through a store whose counter updates fail
    pub fn counterless_rules(mut self) -> Self {
        self.counterless = true;
        self
    }

    pub fn log(mut self, log: SharedExecutionLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn store(mut self, store: SharedCustomerStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn customers(mut self, customers: Arc<InMemoryCustomerStore>) -> Self {
        self.customers = customers;
        self
    }

    pub fn whatsapp(mut self, transport: Arc<dyn Transport>) -> Self {
        self.whatsapp = Some(transport);
        self
    }

    pub fn build(self) -> Harness {
        let clock = MockClock::at(self.now);
        let rules = Arc::new(RuleManager::new());
        let logs = Arc::new(InMemoryExecutionLog::new());
        let email = Arc::new(RecordingTransport::default());
        let sms = Arc::new(RecordingTransport::default());

        let transports = Arc::new(TransportRegistry::new());
        transports.register_shared(Channel::Email, email.clone());
        transports.register_shared(Channel::Sms, sms.clone());
        if let Some(whatsapp) = self.whatsapp {
            transports.register_shared(Channel::WhatsApp, whatsapp);
        }

        let store: SharedCustomerStore = match self.store {
            Some(store) => store,
            None => self.customers.clone(),
        };
        let log: SharedExecutionLog = match self.log {
            Some(log) => log,
            None => logs.clone(),
        };

        let rule_store: SharedRuleStore = if self.counterless {
            Arc::new(CounterlessRuleStore {
                inner: rules.clone(),
            })
        } else {
            rules.clone()
        };

        let service = AutomationService::builder(rule_store, log, store, transports.clone())
            .clock(Arc::new(clock.clone()))
            .settings(test_settings())
            .build();

        Harness {
            clock,
            customers: self.customers,
            rules,
            logs,
            email,
            sms,
            transports,
            service,
        }
    }
}

impl Harness {
    pub fn builder(now: DateTime<Utc>) -> HarnessBuilder {
        HarnessBuilder {
            now,
            log: None,
            store: None,
            customers: Arc::new(InMemoryCustomerStore::new()),
            whatsapp: None,
            counterless: false,
        }
    }

    pub fn new(now: DateTime<Utc>) -> Self {
        Self::builder(now).build()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Add an active customer created `hours_ago` with email and phone
    pub fn add_customer(&self, id: &str, hours_ago: i64) -> Customer {
        let customer = Customer::new(id, self.now() - Duration::hours(hours_ago))
            .with_name(format!("{} Tester", id))
            .with_email(format!("{}@example.com", id))
            .with_phone("+15550001111");
        self.customers.insert_customer(customer.clone());
        customer
    }

    /// Add a completed order placed `days_ago`
    pub fn add_order(&self, id: &str, customer_id: &str, total: f64, days_ago: i64) {
        self.customers.insert_order(Order::new(
            id,
            customer_id,
            "completed",
            total,
            self.now() - Duration::days(days_ago),
        ));
    }
}
