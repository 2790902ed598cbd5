//! Marketing automation rules
//!
//! This crate provides:
//! - Rule definitions (triggers, conditions, actions, schedules)
//! - Validation of rule payloads
//! - Condition evaluation against customers
//! - The schedule gate used by the poller
//! - Rule and execution log stores
//!
//! # Example
//!
//! ```ignore
//! use crm_automation::{Action, RuleConfig, Schedule, Trigger};
//!
//! let config = RuleConfig::new(
//!     "Win-back",
//!     Trigger::no_purchase(60),
//!     vec![Action::sms("We miss you, {{first_name}}!")],
//! )
//! .with_schedule(Some(Schedule::daily(10)));
//! ```

pub mod action;
pub mod condition;
pub mod eval;
pub mod log;
pub mod manager;
pub mod rule;
pub mod schedule;
pub mod trigger;

pub use action::{sms_segments, Action, ActionKind};
pub use condition::{Condition, Operator};
pub use eval::{evaluate_operator, ConditionEvaluator};
pub use log::{
    daily_trend, ActionResults, ChannelCounts, DailyTrend, ExecutionLog, ExecutionLogEntry,
    ExecutionStats, FailedAction, InMemoryExecutionLog,
};
pub use manager::{RuleManager, RuleStore, SharedRuleStore};
pub use rule::{AutomationRule, RuleConfig, RuleError, RulePatch, RuleResult};
pub use schedule::Schedule;
pub use trigger::Trigger;

/// Shared execution log handle
pub type SharedExecutionLog = std::sync::Arc<dyn ExecutionLog>;
