//! Automation service
//!
//! Facade over the rule store, execution log, orchestrator and poller. This
//! is the surface an API layer calls.

use crm_automation::{
    daily_trend, AutomationRule, Condition, ConditionEvaluator, DailyTrend, ExecutionLogEntry,
    ExecutionStats, RuleConfig, RuleError, RulePatch, SharedExecutionLog, SharedRuleStore,
};
use crm_core::{Context, SharedClock, SystemClock};
use crm_notify::TransportRegistry;
use crm_store::SharedCustomerStore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::dispatch::ActionDispatcher;
use crate::orchestrator::{ExecutionSummary, Orchestrator};
use crate::poller::{PollReport, Poller};
use crate::resolver::TriggerResolver;
use crate::{EngineError, EngineResult, EngineSettings};

/// Default page size for rule listings
pub const DEFAULT_RULE_PAGE_SIZE: usize = 20;

/// Default page size for execution logs
pub const DEFAULT_LOG_PAGE_SIZE: usize = 50;

/// Days of execution trend reported by analytics
const TREND_DAYS: usize = 30;

/// Rules reported as top performers
const TOP_RULES: usize = 10;

/// Sort key for rule listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    Name,
    LastExecutedAt,
    TotalExecutions,
}

impl SortField {
    /// Parse a sort key; unknown keys fall back to `created_at`
    pub fn parse(key: &str) -> Self {
        match key {
            "name" => Self::Name,
            "last_executed_at" => Self::LastExecutedAt,
            "total_executions" => Self::TotalExecutions,
            _ => Self::CreatedAt,
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter, sort and pagination for rule listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleQuery {
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

impl<T> Page<T> {
    fn slice(
        all: Vec<T>,
        page: Option<usize>,
        limit: Option<usize>,
        default_limit: usize,
    ) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.filter(|l| *l > 0).unwrap_or(default_limit);
        let total = all.len();
        // Pages past the end are empty
        let offset = (page - 1).saturating_mul(limit);
        let items = all.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            page,
            limit,
            total,
            pages: total.div_ceil(limit),
        }
    }
}

/// A rule with its execution stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDetails {
    pub rule: AutomationRule,
    pub stats: ExecutionStats,
}

/// Totals across all rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsOverview {
    pub total_rules: u64,
    pub active_rules: u64,
    pub total_executions: u64,
    pub total_customers_processed: u64,
}

/// Rule ranked by executions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopRule {
    pub id: String,
    pub name: String,
    pub trigger_type: String,
    pub total_executions: u64,
    pub total_customers_processed: u64,
}

/// Automation analytics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub overview: AnalyticsOverview,
    pub execution_trend: Vec<DailyTrend>,
    pub top_rules: Vec<TopRule>,
}

/// Result of evaluating conditions against one customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionTestResult {
    pub customer_id: String,
    pub customer_name: Option<String>,
    pub meets_conditions: bool,
    pub conditions_count: usize,
}

/// Builds an [`AutomationService`]
pub struct ServiceBuilder {
    rules: SharedRuleStore,
    logs: SharedExecutionLog,
    customers: SharedCustomerStore,
    transports: Arc<TransportRegistry>,
    clock: SharedClock,
    settings: EngineSettings,
    dispatcher: Option<ActionDispatcher>,
}

impl ServiceBuilder {
    /// Use a specific clock
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Use specific engine settings
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the standard action handlers
    pub fn dispatcher(mut self, dispatcher: ActionDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Build the service
    pub fn build(self) -> AutomationService {
        let dispatcher = self.dispatcher.unwrap_or_else(|| {
            ActionDispatcher::with_defaults(
                self.customers.clone(),
                self.transports.clone(),
                &self.settings,
            )
        });
        let resolver = TriggerResolver::new(self.customers.clone(), self.settings.zone);
        let orchestrator = Arc::new(Orchestrator::new(
            self.rules.clone(),
            self.logs.clone(),
            self.customers.clone(),
            resolver,
            dispatcher,
            self.clock.clone(),
        ));
        let poller = Arc::new(Poller::new(
            self.rules.clone(),
            orchestrator.clone(),
            self.clock.clone(),
            self.settings.zone,
            self.settings.max_concurrent_rules,
        ));

        AutomationService {
            evaluator: ConditionEvaluator::new(self.customers.clone()),
            rules: self.rules,
            logs: self.logs,
            customers: self.customers,
            clock: self.clock,
            orchestrator,
            poller,
        }
    }
}

/// Rule management, execution and reporting
pub struct AutomationService {
    rules: SharedRuleStore,
    logs: SharedExecutionLog,
    customers: SharedCustomerStore,
    clock: SharedClock,
    evaluator: ConditionEvaluator,
    orchestrator: Arc<Orchestrator>,
    poller: Arc<Poller>,
}

impl AutomationService {
    /// Start building a service with the system clock and default settings
    pub fn builder(
        rules: SharedRuleStore,
        logs: SharedExecutionLog,
        customers: SharedCustomerStore,
        transports: Arc<TransportRegistry>,
    ) -> ServiceBuilder {
        ServiceBuilder {
            rules,
            logs,
            customers,
            transports,
            clock: Arc::new(SystemClock),
            settings: EngineSettings::default(),
            dispatcher: None,
        }
    }

    /// Validate and store a new rule
    pub async fn create_rule(&self, config: RuleConfig) -> EngineResult<AutomationRule> {
        config.validate()?;
        let rule = AutomationRule::from_config(config, self.clock.now());
        Ok(self.rules.insert(rule).await?)
    }

    /// Apply a partial update to a rule
    pub async fn update_rule(&self, id: &str, patch: RulePatch) -> EngineResult<AutomationRule> {
        Ok(self.rules.update(id, patch, self.clock.now()).await?)
    }

    /// Delete a rule; its execution log is kept
    pub async fn delete_rule(&self, id: &str) -> EngineResult<AutomationRule> {
        Ok(self.rules.remove(id).await?)
    }

    /// Flip a rule's active flag
    pub async fn toggle_active(&self, id: &str) -> EngineResult<AutomationRule> {
        Ok(self.rules.toggle(id, self.clock.now()).await?)
    }

    /// Execute a rule now, bypassing its schedule
    pub async fn execute_rule(
        &self,
        rule_id: &str,
        customer_id: Option<&str>,
    ) -> EngineResult<ExecutionSummary> {
        self.execute_rule_with_context(rule_id, customer_id, Context::manual())
            .await
    }

    /// Execute a rule now with a caller-supplied context
    pub async fn execute_rule_with_context(
        &self,
        rule_id: &str,
        customer_id: Option<&str>,
        context: Context,
    ) -> EngineResult<ExecutionSummary> {
        self.orchestrator.execute(rule_id, customer_id, context).await
    }

    /// Run one poll of the scheduled rules
    pub async fn poll_once(&self) -> EngineResult<PollReport> {
        self.poller.poll_once().await
    }

    /// Start the background poller
    pub fn start(&self, interval: Duration) {
        self.poller.start(interval);
    }

    /// Stop the background poller
    pub async fn stop(&self) {
        self.poller.stop().await;
    }

    /// Whether the background poller is running
    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }

    async fn require_rule(&self, id: &str) -> EngineResult<AutomationRule> {
        self.rules
            .get(id)
            .await?
            .ok_or_else(|| RuleError::NotFound(id.to_string()).into())
    }

    /// Execution stats for a rule, computed from its log
    pub async fn execution_stats(&self, rule_id: &str) -> EngineResult<ExecutionStats> {
        self.require_rule(rule_id).await?;
        let entries = self.logs.for_rule(rule_id).await?;
        Ok(ExecutionStats::from_entries(&entries))
    }

    /// A rule with its execution stats
    pub async fn get_rule(&self, id: &str) -> EngineResult<RuleDetails> {
        let rule = self.require_rule(id).await?;
        let entries = self.logs.for_rule(id).await?;
        Ok(RuleDetails {
            rule,
            stats: ExecutionStats::from_entries(&entries),
        })
    }

    /// Filter, sort and paginate rules
    pub async fn list_rules(&self, query: &RuleQuery) -> EngineResult<Page<AutomationRule>> {
        let mut rules: Vec<AutomationRule> = self
            .rules
            .list()
            .await?
            .into_iter()
            .filter(|r| query.is_active.map_or(true, |active| r.is_active == active))
            .filter(|r| {
                query
                    .trigger_type
                    .as_deref()
                    .map_or(true, |t| r.trigger.kind() == t)
            })
            .collect();

        let field = query.sort_by.as_deref().map(SortField::parse).unwrap_or_default();
        rules.sort_by(|a, b| {
            let ordering = compare_rules(a, b, field);
            match query.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        Ok(Page::slice(rules, query.page, query.limit, DEFAULT_RULE_PAGE_SIZE))
    }

    /// Execution log of a rule, newest first
    pub async fn execution_logs(
        &self,
        rule_id: &str,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> EngineResult<Page<ExecutionLogEntry>> {
        self.require_rule(rule_id).await?;
        let entries = self.logs.for_rule(rule_id).await?;
        Ok(Page::slice(entries, page, limit, DEFAULT_LOG_PAGE_SIZE))
    }

    /// Overview, daily trend and top rules
    pub async fn analytics(&self) -> EngineResult<Analytics> {
        let rules = self.rules.list().await?;
        let entries = self.logs.all().await?;

        let overview = AnalyticsOverview {
            total_rules: rules.len() as u64,
            active_rules: rules.iter().filter(|r| r.is_active).count() as u64,
            total_executions: rules.iter().map(|r| r.total_executions).sum(),
            total_customers_processed: rules.iter().map(|r| r.total_customers_processed).sum(),
        };

        let mut ranked: Vec<&AutomationRule> =
            rules.iter().filter(|r| r.total_executions > 0).collect();
        ranked.sort_by(|a, b| b.total_executions.cmp(&a.total_executions));
        let top_rules = ranked
            .into_iter()
            .take(TOP_RULES)
            .map(|r| TopRule {
                id: r.id.clone(),
                name: r.name.clone(),
                trigger_type: r.trigger.kind().to_string(),
                total_executions: r.total_executions,
                total_customers_processed: r.total_customers_processed,
            })
            .collect();

        Ok(Analytics {
            overview,
            execution_trend: daily_trend(&entries, TREND_DAYS),
            top_rules,
        })
    }

    /// Evaluate conditions against one customer without side effects
    pub async fn test_conditions(
        &self,
        customer_id: &str,
        conditions: &[Condition],
    ) -> EngineResult<ConditionTestResult> {
        let customer = self
            .customers
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| EngineError::CustomerNotFound(customer_id.to_string()))?;

        let meets_conditions = self.evaluator.is_eligible(&customer, conditions).await?;
        info!(customer_id, meets_conditions, "Tested conditions");

        Ok(ConditionTestResult {
            customer_id: customer.id,
            customer_name: customer.name,
            meets_conditions,
            conditions_count: conditions.len(),
        })
    }
}

fn compare_rules(a: &AutomationRule, b: &AutomationRule, field: SortField) -> Ordering {
    let primary = match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        // never-executed rules sort first
        SortField::LastExecutedAt => a.last_executed_at.cmp(&b.last_executed_at),
        SortField::TotalExecutions => a.total_executions.cmp(&b.total_executions),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}
