//! Execution log
//!
//! Append-only record of rule runs: one entry per processed customer per
//! run, each carrying the aggregated results of that run.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use ulid::Ulid;

use crate::action::ActionKind;
use crate::rule::RuleResult;

/// Per-channel delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounts {
    pub sent: u64,
    pub failed: u64,
    /// Recipients without the needed contact field
    #[serde(default)]
    pub skipped: u64,
}

impl ChannelCounts {
    /// Add another set of counts
    pub fn merge(&mut self, other: ChannelCounts) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// An action that failed as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAction {
    /// Position in the rule's action list
    pub index: usize,
    pub action_type: ActionKind,
    pub error: String,
}

/// Aggregated outcome of dispatching a rule's actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResults {
    pub emails: ChannelCounts,
    pub sms: ChannelCounts,
    pub whatsapp: ChannelCounts,
    #[serde(default)]
    pub tags_added: u64,
    #[serde(default)]
    pub segments_updated: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_actions: Vec<FailedAction>,
}

impl ActionResults {
    /// Counts for a message action kind
    pub fn channel_mut(&mut self, kind: ActionKind) -> Option<&mut ChannelCounts> {
        match kind {
            ActionKind::SendEmail => Some(&mut self.emails),
            ActionKind::SendSms => Some(&mut self.sms),
            ActionKind::SendWhatsApp => Some(&mut self.whatsapp),
            ActionKind::AddTag | ActionKind::UpdateSegment => None,
        }
    }

    /// Total messages sent across channels
    pub fn total_sent(&self) -> u64 {
        self.emails.sent + self.sms.sent + self.whatsapp.sent
    }

    /// Total messages failed across channels
    pub fn total_failed(&self) -> u64 {
        self.emails.failed + self.sms.failed + self.whatsapp.failed
    }
}

/// One processed customer in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Unique identifier (ULID)
    pub id: String,
    pub rule_id: String,
    pub customer_id: String,
    /// Execution context the run belonged to
    pub context_id: String,
    pub executed_at: DateTime<Utc>,
    pub results: ActionResults,
}

impl ExecutionLogEntry {
    /// Create an entry with a fresh id
    pub fn new(
        rule_id: impl Into<String>,
        customer_id: impl Into<String>,
        context_id: impl Into<String>,
        executed_at: DateTime<Utc>,
        results: ActionResults,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            rule_id: rule_id.into(),
            customer_id: customer_id.into(),
            context_id: context_id.into(),
            executed_at,
            results,
        }
    }
}

/// Execution statistics for one rule, computed from its log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Number of log entries
    pub total_executions: u64,
    pub unique_customers: u64,
    pub first_execution: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
}

impl ExecutionStats {
    /// Compute stats over a set of entries
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ExecutionLogEntry>) -> Self {
        let mut stats = Self::default();
        let mut customers = HashSet::new();
        for entry in entries {
            stats.total_executions += 1;
            customers.insert(entry.customer_id.as_str());
            stats.first_execution = Some(match stats.first_execution {
                Some(first) if first <= entry.executed_at => first,
                _ => entry.executed_at,
            });
            stats.last_execution = Some(match stats.last_execution {
                Some(last) if last >= entry.executed_at => last,
                _ => entry.executed_at,
            });
        }
        stats.unique_customers = customers.len() as u64;
        stats
    }
}

/// Executions on one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub executions: u64,
    pub unique_customers: u64,
}

/// Group entries by UTC day, newest day first, keeping at most `days` days
pub fn daily_trend<'a>(
    entries: impl IntoIterator<Item = &'a ExecutionLogEntry>,
    days: usize,
) -> Vec<DailyTrend> {
    let mut by_day: BTreeMap<NaiveDate, (u64, HashSet<&'a str>)> = BTreeMap::new();
    for entry in entries {
        let day = by_day.entry(entry.executed_at.date_naive()).or_default();
        day.0 += 1;
        day.1.insert(entry.customer_id.as_str());
    }
    by_day
        .into_iter()
        .rev()
        .take(days)
        .map(|(date, (executions, customers))| DailyTrend {
            date,
            executions,
            unique_customers: customers.len() as u64,
        })
        .collect()
}

/// Append-only store of execution log entries
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    /// Append the entries of one run
    async fn append(&self, entries: Vec<ExecutionLogEntry>) -> RuleResult<()>;

    /// Entries for a rule, newest first
    async fn for_rule(&self, rule_id: &str) -> RuleResult<Vec<ExecutionLogEntry>>;

    /// Every entry, newest first
    async fn all(&self) -> RuleResult<Vec<ExecutionLogEntry>>;

    /// Remove the entries written by one execution context
    async fn discard_run(&self, context_id: &str) -> RuleResult<usize>;
}

/// Execution log held in memory
#[derive(Debug, Default)]
pub struct InMemoryExecutionLog {
    entries: RwLock<Vec<ExecutionLogEntry>>,
}

impl InMemoryExecutionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log holding existing entries
    pub fn from_entries(entries: Vec<ExecutionLogEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Append entries
    pub fn push(&self, entries: Vec<ExecutionLogEntry>) {
        let mut log = self.entries.write().unwrap_or_else(|e| e.into_inner());
        log.extend(entries);
    }

    /// Copy of every entry in insertion order
    pub fn snapshot(&self) -> Vec<ExecutionLogEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop the entries of one execution context, returning how many went
    pub fn remove_context(&self, context_id: &str) -> usize {
        let mut log = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = log.len();
        log.retain(|e| e.context_id != context_id);
        before - log.len()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn newest_first(&self, rule_id: Option<&str>) -> Vec<ExecutionLogEntry> {
        let log = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<ExecutionLogEntry> = log
            .iter()
            .filter(|e| rule_id.map_or(true, |id| e.rule_id == id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.executed_at.cmp(&a.executed_at).then(b.id.cmp(&a.id)));
        entries
    }
}

#[async_trait]
impl ExecutionLog for InMemoryExecutionLog {
    async fn append(&self, entries: Vec<ExecutionLogEntry>) -> RuleResult<()> {
        self.push(entries);
        Ok(())
    }

    async fn for_rule(&self, rule_id: &str) -> RuleResult<Vec<ExecutionLogEntry>> {
        Ok(self.newest_first(Some(rule_id)))
    }

    async fn all(&self) -> RuleResult<Vec<ExecutionLogEntry>> {
        Ok(self.newest_first(None))
    }

    async fn discard_run(&self, context_id: &str) -> RuleResult<usize> {
        Ok(self.remove_context(context_id))
    }
}
