//! Automation rule execution
//!
//! Control flow for a scheduled run:
//!
//! ```text
//! Poller -> schedule gate -> Orchestrator -> TriggerResolver
//!        -> ConditionEvaluator -> ActionDispatcher -> log + counters
//! ```
//!
//! Manual runs enter at the [`Orchestrator`], bypassing the schedule gate.
//! [`AutomationService`] is the facade exposing rule management, execution
//! and reporting.

pub mod dispatch;
pub mod orchestrator;
pub mod poller;
pub mod resolver;
pub mod service;
mod zone;

use crm_automation::RuleError;
use crm_notify::TransportError;
use crm_store::StoreError;
use std::time::Duration;
use thiserror::Error;

pub use dispatch::{
    ActionDispatcher, ActionHandler, ActionOutcome, MessageHandler, SegmentHandler, TagHandler,
};
pub use orchestrator::{ExecutionSummary, Orchestrator};
pub use poller::{PollReport, Poller};
pub use resolver::TriggerResolver;
pub use service::{
    Analytics, AnalyticsOverview, AutomationService, ConditionTestResult, Page, RuleDetails,
    RuleQuery, ServiceBuilder, SortField, SortOrder, TopRule,
};
pub use zone::ScheduleZone;

/// Engine errors
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Customer store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No handler registered for action: {0}")]
    NoHandler(String),
}

impl EngineError {
    /// Whether the error means the requested rule or customer does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Rule(RuleError::NotFound(_)) | Self::CustomerNotFound(_)
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Tunables for execution and delivery
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Rules executed concurrently by one poll
    pub max_concurrent_rules: usize,

    /// Messages per email batch call
    pub email_batch_size: usize,

    /// Minimum gap between SMS transport calls
    pub sms_delay: Duration,

    /// Minimum gap between WhatsApp transport calls
    pub whatsapp_delay: Duration,

    /// Time zone for schedules and birthdays
    pub zone: ScheduleZone,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_rules: 4,
            email_batch_size: 1000,
            sms_delay: Duration::from_millis(100),
            whatsapp_delay: Duration::from_millis(1000),
            zone: ScheduleZone::Local,
        }
    }
}
