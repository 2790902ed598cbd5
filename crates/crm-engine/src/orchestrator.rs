//! Execution orchestrator
//!
//! Runs one rule end to end: candidates, conditions, actions, log entries
//! and counters. Manual and scheduled executions share this path.

use chrono::{DateTime, Utc};
use crm_automation::{
    ActionResults, AutomationRule, ConditionEvaluator, ExecutionLogEntry, RuleError,
    SharedExecutionLog, SharedRuleStore,
};
use crm_core::{Context, Customer, SharedClock};
use crm_store::SharedCustomerStore;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use crate::dispatch::ActionDispatcher;
use crate::resolver::TriggerResolver;
use crate::{EngineError, EngineResult, ScheduleZone};

/// Outcome of one rule execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub rule_id: String,
    pub context_id: String,

    /// False when the run hit an orchestration failure
    pub success: bool,

    /// Customers the actions were dispatched to
    pub executed: u64,

    /// Candidates before condition filtering
    pub candidates: u64,

    pub results: ActionResults,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,
}

impl ExecutionSummary {
    fn empty(rule_id: &str, context: &Context, started_at: DateTime<Utc>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            context_id: context.id.clone(),
            success: true,
            executed: 0,
            candidates: 0,
            results: ActionResults::default(),
            error: None,
            started_at,
        }
    }

    fn failed(mut self, error: impl ToString) -> Self {
        self.success = false;
        self.executed = 0;
        self.error = Some(error.to_string());
        self
    }
}

/// Runs rules
pub struct Orchestrator {
    rules: SharedRuleStore,
    logs: SharedExecutionLog,
    customers: SharedCustomerStore,
    resolver: TriggerResolver,
    evaluator: ConditionEvaluator,
    dispatcher: ActionDispatcher,
    clock: SharedClock,
    /// Per-rule execution locks
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        rules: SharedRuleStore,
        logs: SharedExecutionLog,
        customers: SharedCustomerStore,
        resolver: TriggerResolver,
        dispatcher: ActionDispatcher,
        clock: SharedClock,
    ) -> Self {
        Self {
            evaluator: ConditionEvaluator::new(customers.clone()),
            rules,
            logs,
            customers,
            resolver,
            dispatcher,
            clock,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, rule_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(rule_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Execute a rule, optionally against one explicit customer
    ///
    /// Fails with not-found or inactive before anything runs. Failures after
    /// that point are reported in the summary with `success = false` and
    /// leave the rule's counters unchanged.
    #[instrument(skip(self, context), fields(context_id = %context.id, origin = ?context.origin))]
    pub async fn execute(
        &self,
        rule_id: &str,
        customer_id: Option<&str>,
        context: Context,
    ) -> EngineResult<ExecutionSummary> {
        let rule = self.load_active(rule_id).await?;

        let lock = self.lock_for(rule_id);
        let _guard = lock.lock().await;

        self.execute_locked(rule, customer_id, context).await
    }

    /// Execute a scheduled rule if its schedule still fires at `now`
    ///
    /// The gate is checked again under the rule's lock, so a slot already
    /// served by a run that held the lock is not served twice. Returns `None`
    /// when the rule is not due once the lock is held.
    #[instrument(skip(self, zone, context), fields(context_id = %context.id))]
    pub async fn execute_scheduled(
        &self,
        rule_id: &str,
        zone: &ScheduleZone,
        now: DateTime<Utc>,
        context: Context,
    ) -> EngineResult<Option<ExecutionSummary>> {
        let lock = self.lock_for(rule_id);
        let _guard = lock.lock().await;

        let rule = match self.rules.get(rule_id).await? {
            Some(rule) if rule.is_pollable() => rule,
            _ => {
                debug!(rule_id, "Rule no longer scheduled, skipping");
                return Ok(None);
            }
        };
        let due = rule
            .schedule
            .as_ref()
            .is_some_and(|s| zone.should_fire(s, rule.last_executed_at, now));
        if !due {
            debug!(rule_id, last_executed_at = ?rule.last_executed_at, "Slot already served");
            return Ok(None);
        }

        self.execute_locked(rule, None, context).await.map(Some)
    }

    async fn execute_locked(
        &self,
        rule: AutomationRule,
        customer_id: Option<&str>,
        context: Context,
    ) -> EngineResult<ExecutionSummary> {
        let started_at = self.clock.now();
        let summary = ExecutionSummary::empty(&rule.id, &context, started_at);

        let candidates = match customer_id {
            Some(id) => match self.customers.get_customer(id).await {
                Ok(Some(customer)) if customer.is_active => vec![customer],
                Ok(Some(_)) => Vec::new(),
                Ok(None) => return Err(EngineError::CustomerNotFound(id.to_string())),
                Err(e) => return Ok(self.orchestration_failure(summary, e)),
            },
            None => match self.resolver.resolve(&rule.trigger, started_at).await {
                Ok(candidates) => candidates,
                Err(e) => return Ok(self.orchestration_failure(summary, e)),
            },
        };

        self.run(rule, candidates, context, summary).await
    }

    async fn load_active(&self, rule_id: &str) -> EngineResult<AutomationRule> {
        let rule = self
            .rules
            .get(rule_id)
            .await?
            .ok_or_else(|| RuleError::NotFound(rule_id.to_string()))?;
        if !rule.is_active {
            return Err(RuleError::Inactive(rule_id.to_string()).into());
        }
        Ok(rule)
    }

    async fn run(
        &self,
        rule: AutomationRule,
        candidates: Vec<Customer>,
        context: Context,
        mut summary: ExecutionSummary,
    ) -> EngineResult<ExecutionSummary> {
        summary.candidates = candidates.len() as u64;
        if candidates.is_empty() {
            debug!(rule_id = %rule.id, "No candidates");
            return Ok(summary);
        }

        let eligible = match self.evaluator.filter_eligible(candidates, &rule.conditions).await {
            Ok(eligible) => eligible,
            Err(e) => return Ok(self.orchestration_failure(summary, e)),
        };
        if eligible.is_empty() {
            debug!(rule_id = %rule.id, candidates = summary.candidates, "No eligible customers");
            return Ok(summary);
        }

        // Deactivation between load and dispatch cancels the run
        match self.rules.get(&rule.id).await {
            Ok(Some(current)) if current.is_active => {}
            Ok(_) => {
                info!(rule_id = %rule.id, "Rule deactivated before dispatch, skipping");
                return Ok(summary);
            }
            Err(e) => return Ok(self.orchestration_failure(summary, e)),
        }

        let results = self.dispatcher.dispatch(&rule, &eligible, &context).await;

        let entries = eligible
            .iter()
            .map(|c| {
                ExecutionLogEntry::new(
                    &rule.id,
                    &c.id,
                    &context.id,
                    summary.started_at,
                    results.clone(),
                )
            })
            .collect();
        summary.results = results;

        if let Err(e) = self.logs.append(entries).await {
            return Ok(self.orchestration_failure(summary, e));
        }

        let processed = eligible.len() as u64;
        if let Err(e) = self
            .rules
            .record_execution(&rule.id, processed, summary.started_at)
            .await
        {
            // Counters were not recorded, so the run's log entries go too
            if let Err(discard) = self.logs.discard_run(&context.id).await {
                error!(
                    rule_id = %rule.id,
                    context_id = %context.id,
                    error = %discard,
                    "Failed to discard log entries of an unrecorded run"
                );
            }
            return Ok(self.orchestration_failure(summary, e));
        }

        summary.executed = processed;
        info!(
            rule_id = %rule.id,
            name = %rule.name,
            customers = processed,
            sent = summary.results.total_sent(),
            failed = summary.results.total_failed(),
            "Automation rule executed"
        );
        Ok(summary)
    }

    fn orchestration_failure(
        &self,
        summary: ExecutionSummary,
        error: impl std::fmt::Display,
    ) -> ExecutionSummary {
        error!(
            rule_id = %summary.rule_id,
            context_id = %summary.context_id,
            error = %error,
            "Rule execution failed"
        );
        summary.failed(error)
    }
}
