//! Automation rules
//!
//! A rule ties together a trigger, conditions, ordered actions and an
//! optional recurrence schedule, and carries its own execution counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::action::Action;
use crate::condition::Condition;
use crate::schedule::Schedule;
use crate::trigger::Trigger;

/// Rule errors
#[derive(Debug, Clone, Error)]
pub enum RuleError {
    #[error("Automation rule not found: {0}")]
    NotFound(String),

    #[error("Automation rule is not active: {0}")]
    Inactive(String),

    #[error("Invalid automation rule: {0}")]
    Validation(String),

    #[error("Rule persistence failed: {0}")]
    Persistence(String),
}

/// Result type for rule operations
pub type RuleResult<T> = Result<T, RuleError>;

/// Payload for creating a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Candidate selection
    pub trigger: Trigger,

    /// Eligibility tests, combined with AND
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Actions executed in order
    #[serde(default)]
    pub actions: Vec<Action>,

    /// Recurrence; `null` means the poller never fires the rule
    #[serde(default = "default_schedule")]
    pub schedule: Option<Schedule>,

    /// Whether the rule starts active
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_schedule() -> Option<Schedule> {
    Some(Schedule::Immediate)
}

fn default_active() -> bool {
    true
}

impl RuleConfig {
    /// Create a config with the default schedule and no conditions
    pub fn new(name: impl Into<String>, trigger: Trigger, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            description: None,
            trigger,
            conditions: Vec::new(),
            actions,
            schedule: default_schedule(),
            is_active: true,
        }
    }

    /// Add a condition
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Replace the schedule
    pub fn with_schedule(mut self, schedule: Option<Schedule>) -> Self {
        self.schedule = schedule;
        self
    }

    /// Parse a JSON payload, reporting shape errors as validation errors
    pub fn from_json(value: serde_json::Value) -> RuleResult<Self> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| RuleError::Validation(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the config describes a runnable rule
    pub fn validate(&self) -> RuleResult<()> {
        if self.name.trim().is_empty() {
            return Err(RuleError::Validation("name is required".to_string()));
        }
        validate_parts(
            &self.trigger,
            &self.conditions,
            &self.actions,
            self.schedule.as_ref(),
        )
    }
}

fn validate_parts(
    trigger: &Trigger,
    conditions: &[Condition],
    actions: &[Action],
    schedule: Option<&Schedule>,
) -> RuleResult<()> {
    trigger.validate()?;
    if actions.is_empty() {
        return Err(RuleError::Validation(
            "at least one action is required".to_string(),
        ));
    }
    for condition in conditions {
        condition.validate()?;
    }
    for action in actions {
        action.validate()?;
    }
    if let Some(schedule) = schedule {
        schedule.validate()?;
    }
    Ok(())
}

/// A stored automation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    /// Unique identifier (ULID)
    pub id: String,

    /// Display name
    pub name: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Candidate selection
    pub trigger: Trigger,

    /// Eligibility tests, combined with AND
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Actions executed in order
    pub actions: Vec<Action>,

    /// Recurrence
    #[serde(default)]
    pub schedule: Option<Schedule>,

    /// Inactive rules are neither polled nor manually executable
    pub is_active: bool,

    /// Runs that processed at least one customer
    #[serde(default)]
    pub total_executions: u64,

    /// Sum of eligible customers over all runs
    #[serde(default)]
    pub total_customers_processed: u64,

    /// When the rule last processed customers
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl AutomationRule {
    /// Create a rule from a validated config
    pub fn from_config(config: RuleConfig, now: DateTime<Utc>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            name: config.name,
            description: config.description,
            trigger: config.trigger,
            conditions: config.conditions,
            actions: config.actions,
            schedule: config.schedule,
            is_active: config.is_active,
            total_executions: 0,
            total_customers_processed: 0,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the poller should consider this rule at all
    pub fn is_pollable(&self) -> bool {
        self.is_active && self.schedule.is_some()
    }

    /// Record a run that processed `customers` eligible customers
    ///
    /// `last_executed_at` never moves backwards.
    pub fn record_execution(&mut self, customers: u64, at: DateTime<Utc>) {
        self.total_executions += 1;
        self.total_customers_processed += customers;
        self.last_executed_at = Some(match self.last_executed_at {
            Some(last) if last > at => last,
            _ => at,
        });
    }

    /// Apply a partial update, re-validating the result
    pub fn apply(&mut self, patch: RulePatch, now: DateTime<Utc>) -> RuleResult<()> {
        if patch.is_empty() {
            return Err(RuleError::Validation("no fields to update".to_string()));
        }

        let mut updated = self.clone();
        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(RuleError::Validation("name must not be empty".to_string()));
            }
            updated.name = name;
        }
        if let Some(description) = patch.description {
            updated.description = Some(description);
        }
        if let Some(trigger) = patch.trigger {
            updated.trigger = trigger;
        }
        if let Some(conditions) = patch.conditions {
            updated.conditions = conditions;
        }
        if let Some(actions) = patch.actions {
            updated.actions = actions;
        }
        if let Some(schedule) = patch.schedule {
            updated.schedule = schedule;
        }
        if let Some(is_active) = patch.is_active {
            updated.is_active = is_active;
        }

        validate_parts(
            &updated.trigger,
            &updated.conditions,
            &updated.actions,
            updated.schedule.as_ref(),
        )?;

        updated.updated_at = now;
        *self = updated;
        Ok(())
    }
}

/// Partial update of a rule; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,

    /// `Some(None)` clears the schedule
    #[serde(
        default,
        deserialize_with = "present_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub schedule: Option<Option<Schedule>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Distinguish an explicit `null` from an absent key
fn present_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl RulePatch {
    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.trigger.is_none()
            && self.conditions.is_none()
            && self.actions.is_none()
            && self.schedule.is_none()
            && self.is_active.is_none()
    }

    /// Parse a JSON payload, reporting shape errors as validation errors
    pub fn from_json(value: serde_json::Value) -> RuleResult<Self> {
        serde_json::from_value(value).map_err(|e| RuleError::Validation(e.to_string()))
    }
}
