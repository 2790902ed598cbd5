//! Rule management
//!
//! The [`RuleStore`] trait is the engine's view of rule persistence.
//! [`RuleManager`] keeps rules in memory and is also the state behind the
//! persistent store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::rule::{AutomationRule, RuleError, RulePatch, RuleResult};

/// Rule persistence operations
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Store a new rule
    async fn insert(&self, rule: AutomationRule) -> RuleResult<AutomationRule>;

    /// Fetch a rule by id
    async fn get(&self, id: &str) -> RuleResult<Option<AutomationRule>>;

    /// Every rule
    async fn list(&self) -> RuleResult<Vec<AutomationRule>>;

    /// Apply a partial update
    async fn update(
        &self,
        id: &str,
        patch: RulePatch,
        now: DateTime<Utc>,
    ) -> RuleResult<AutomationRule>;

    /// Delete a rule
    async fn remove(&self, id: &str) -> RuleResult<AutomationRule>;

    /// Flip the active flag
    async fn toggle(&self, id: &str, now: DateTime<Utc>) -> RuleResult<AutomationRule>;

    /// Atomically bump counters and advance `last_executed_at`
    async fn record_execution(
        &self,
        id: &str,
        customers: u64,
        at: DateTime<Utc>,
    ) -> RuleResult<AutomationRule>;
}

/// Thread-safe rule store handle
pub type SharedRuleStore = Arc<dyn RuleStore>;

/// In-memory rule registry
#[derive(Debug, Default)]
pub struct RuleManager {
    /// All rules by ID
    rules: DashMap<String, AutomationRule>,
}

impl RuleManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Load existing rules
    pub fn load(&self, rules: Vec<AutomationRule>) {
        for rule in rules {
            debug!(rule_id = %rule.id, name = %rule.name, "Loaded automation rule");
            self.rules.insert(rule.id.clone(), rule);
        }
    }

    /// Get a rule by ID
    pub fn get(&self, id: &str) -> Option<AutomationRule> {
        self.rules.get(id).map(|r| r.value().clone())
    }

    /// Get all rules, oldest first
    pub fn all(&self) -> Vec<AutomationRule> {
        let mut rules: Vec<AutomationRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rules
    }

    /// Get rule count
    pub fn count(&self) -> usize {
        self.rules.len()
    }

    /// Add a new rule
    pub fn add(&self, rule: AutomationRule) -> RuleResult<AutomationRule> {
        if self.rules.contains_key(&rule.id) {
            return Err(RuleError::Validation(format!(
                "Automation rule with ID {} already exists",
                rule.id
            )));
        }
        info!(
            rule_id = %rule.id,
            name = %rule.name,
            trigger = %rule.trigger,
            "Added automation rule"
        );
        self.rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    /// Apply a partial update
    pub fn update(
        &self,
        id: &str,
        patch: RulePatch,
        now: DateTime<Utc>,
    ) -> RuleResult<AutomationRule> {
        let mut rule = self
            .rules
            .get_mut(id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;

        rule.apply(patch, now)?;
        info!(rule_id = %id, name = %rule.name, "Updated automation rule");
        Ok(rule.clone())
    }

    /// Remove a rule
    pub fn remove(&self, id: &str) -> RuleResult<AutomationRule> {
        let (_, rule) = self
            .rules
            .remove(id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;
        info!(rule_id = %id, name = %rule.name, "Removed automation rule");
        Ok(rule)
    }

    /// Toggle a rule
    pub fn toggle(&self, id: &str, now: DateTime<Utc>) -> RuleResult<AutomationRule> {
        let mut rule = self
            .rules
            .get_mut(id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;

        rule.is_active = !rule.is_active;
        rule.updated_at = now;
        info!(
            rule_id = %id,
            "{} automation rule: {}",
            if rule.is_active { "Activated" } else { "Deactivated" },
            rule.name
        );
        Ok(rule.clone())
    }

    /// Record a completed run
    pub fn record_execution(
        &self,
        id: &str,
        customers: u64,
        at: DateTime<Utc>,
    ) -> RuleResult<AutomationRule> {
        let mut rule = self
            .rules
            .get_mut(id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;

        rule.record_execution(customers, at);
        debug!(
            rule_id = %id,
            customers,
            total_executions = rule.total_executions,
            "Recorded rule execution"
        );
        Ok(rule.clone())
    }
}

#[async_trait]
impl RuleStore for RuleManager {
    async fn insert(&self, rule: AutomationRule) -> RuleResult<AutomationRule> {
        self.add(rule)
    }

    async fn get(&self, id: &str) -> RuleResult<Option<AutomationRule>> {
        Ok(RuleManager::get(self, id))
    }

    async fn list(&self) -> RuleResult<Vec<AutomationRule>> {
        Ok(self.all())
    }

    async fn update(
        &self,
        id: &str,
        patch: RulePatch,
        now: DateTime<Utc>,
    ) -> RuleResult<AutomationRule> {
        RuleManager::update(self, id, patch, now)
    }

    async fn remove(&self, id: &str) -> RuleResult<AutomationRule> {
        RuleManager::remove(self, id)
    }

    async fn toggle(&self, id: &str, now: DateTime<Utc>) -> RuleResult<AutomationRule> {
        RuleManager::toggle(self, id, now)
    }

    async fn record_execution(
        &self,
        id: &str,
        customers: u64,
        at: DateTime<Utc>,
    ) -> RuleResult<AutomationRule> {
        RuleManager::record_execution(self, id, customers, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::rule::RuleConfig;
    use crate::trigger::Trigger;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
    }

    fn rule(name: &str) -> AutomationRule {
        AutomationRule::from_config(
            RuleConfig::new(name, Trigger::Birthday, vec![Action::add_tag("birthday")]),
            now(),
        )
    }

    #[test]
    fn test_add_and_get() {
        let manager = RuleManager::new();
        let added = manager.add(rule("a")).unwrap();
        assert_eq!(manager.get(&added.id), Some(added.clone()));
        assert!(manager.add(added).is_err());
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn test_toggle() {
        let manager = RuleManager::new();
        let added = manager.add(rule("a")).unwrap();
        assert!(!manager.toggle(&added.id, now()).unwrap().is_active);
        assert!(manager.toggle(&added.id, now()).unwrap().is_active);
        assert!(matches!(
            manager.toggle("missing", now()),
            Err(RuleError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove() {
        let manager = RuleManager::new();
        let added = manager.add(rule("a")).unwrap();
        manager.remove(&added.id).unwrap();
        assert!(manager.get(&added.id).is_none());
        assert!(manager.remove(&added.id).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_record_execution() {
        let manager = Arc::new(RuleManager::new());
        let id = manager.add(rule("a")).unwrap().id;

        let mut handles = Vec::new();
        for i in 0..16 {
            let manager = manager.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .record_execution(&id, 2, now() + chrono::Duration::minutes(i))
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let rule = manager.get(&id).unwrap();
        assert_eq!(rule.total_executions, 16);
        assert_eq!(rule.total_customers_processed, 32);
        assert_eq!(rule.last_executed_at, Some(now() + chrono::Duration::minutes(15)));
    }
}
