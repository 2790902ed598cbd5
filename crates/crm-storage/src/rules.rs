//! Rule store persisted to a storage file
//!
//! Every mutation is applied in memory, then the whole rule set is saved.
//! When the save fails the mutation is rolled back and the caller gets a
//! persistence error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crm_automation::{AutomationRule, RuleError, RuleManager, RulePatch, RuleResult, RuleStore};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::storage::{Storable, Storage, StorageResult};

/// Stored rule set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<AutomationRule>,
}

impl Storable for RuleSet {
    const KEY: &'static str = "crm.automation_rules";
    const VERSION: u32 = 1;
    const MINOR_VERSION: u32 = 1;
}

/// Undo step for a failed save
enum Rollback {
    Remove(String),
    Restore(AutomationRule),
}

/// [`RuleStore`] backed by a [`RuleManager`] and a storage file
pub struct PersistentRuleStore {
    storage: Storage,
    rules: RuleManager,
    /// Serializes mutate-then-save so files are written in mutation order
    write_lock: Mutex<()>,
}

impl PersistentRuleStore {
    /// Load the stored rule set, starting empty when none exists
    pub async fn load(storage: Storage) -> StorageResult<Self> {
        let rules = RuleManager::new();
        if let Some(set) = storage.load_data::<RuleSet>().await? {
            info!(count = set.rules.len(), "Loaded automation rules");
            rules.load(set.rules);
        }
        Ok(Self {
            storage,
            rules,
            write_lock: Mutex::new(()),
        })
    }

    /// In-memory view of the stored rules
    pub fn manager(&self) -> &RuleManager {
        &self.rules
    }

    async fn persist(&self, rollback: Rollback) -> RuleResult<()> {
        let set = RuleSet {
            rules: self.rules.all(),
        };
        if let Err(e) = self.storage.save_data(&set).await {
            error!(error = %e, "Failed to save automation rules");
            match rollback {
                Rollback::Remove(id) => {
                    let _ = self.rules.remove(&id);
                }
                Rollback::Restore(rule) => self.rules.load(vec![rule]),
            }
            return Err(RuleError::Persistence(e.to_string()));
        }
        Ok(())
    }

    fn previous(&self, id: &str) -> RuleResult<AutomationRule> {
        self.rules
            .get(id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl RuleStore for PersistentRuleStore {
    async fn insert(&self, rule: AutomationRule) -> RuleResult<AutomationRule> {
        let _guard = self.write_lock.lock().await;
        let rule = self.rules.add(rule)?;
        self.persist(Rollback::Remove(rule.id.clone())).await?;
        Ok(rule)
    }

    async fn get(&self, id: &str) -> RuleResult<Option<AutomationRule>> {
        Ok(self.rules.get(id))
    }

    async fn list(&self) -> RuleResult<Vec<AutomationRule>> {
        Ok(self.rules.all())
    }

    async fn update(
        &self,
        id: &str,
        patch: RulePatch,
        now: DateTime<Utc>,
    ) -> RuleResult<AutomationRule> {
        let _guard = self.write_lock.lock().await;
        let previous = self.previous(id)?;
        let updated = self.rules.update(id, patch, now)?;
        self.persist(Rollback::Restore(previous)).await?;
        Ok(updated)
    }

    async fn remove(&self, id: &str) -> RuleResult<AutomationRule> {
        let _guard = self.write_lock.lock().await;
        let removed = self.rules.remove(id)?;
        self.persist(Rollback::Restore(removed.clone())).await?;
        Ok(removed)
    }

    async fn toggle(&self, id: &str, now: DateTime<Utc>) -> RuleResult<AutomationRule> {
        let _guard = self.write_lock.lock().await;
        let previous = self.previous(id)?;
        let toggled = self.rules.toggle(id, now)?;
        self.persist(Rollback::Restore(previous)).await?;
        Ok(toggled)
    }

    async fn record_execution(
        &self,
        id: &str,
        customers: u64,
        at: DateTime<Utc>,
    ) -> RuleResult<AutomationRule> {
        let _guard = self.write_lock.lock().await;
        let previous = self.previous(id)?;
        let recorded = self.rules.record_execution(id, customers, at)?;
        self.persist(Rollback::Restore(previous)).await?;
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crm_automation::{Action, RuleConfig, Schedule, Trigger};
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap()
    }

    fn rule(name: &str) -> AutomationRule {
        AutomationRule::from_config(
            RuleConfig::new(name, Trigger::no_purchase(45), vec![Action::sms("Come back!")])
                .with_schedule(Some(Schedule::weekly(2, 11))),
            now(),
        )
    }

    #[tokio::test]
    async fn test_mutations_survive_reload() {
        let temp_dir = TempDir::new().unwrap();
        let store = PersistentRuleStore::load(Storage::new(temp_dir.path()))
            .await
            .unwrap();

        let kept = store.insert(rule("Win-back")).await.unwrap();
        let dropped = store.insert(rule("Old promo")).await.unwrap();
        store.toggle(&kept.id, now()).await.unwrap();
        store.record_execution(&kept.id, 12, now()).await.unwrap();
        store.remove(&dropped.id).await.unwrap();

        let reloaded = PersistentRuleStore::load(Storage::new(temp_dir.path()))
            .await
            .unwrap();
        let rules = reloaded.list().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, kept.id);
        assert!(!rules[0].is_active);
        assert_eq!(rules[0].total_customers_processed, 12);
        assert_eq!(rules[0].schedule, Some(Schedule::weekly(2, 11)));
    }

    #[tokio::test]
    async fn test_failed_save_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("storage");
        let store = PersistentRuleStore::load(Storage::new(&dir)).await.unwrap();
        // A plain file where the storage directory should be
        std::fs::write(&dir, "").unwrap();

        let rule = rule("Unsaved");
        let err = store.insert(rule.clone()).await.unwrap_err();
        assert!(matches!(err, RuleError::Persistence(_)));
        assert!(store.get(&rule.id).await.unwrap().is_none());

        store.manager().load(vec![rule.clone()]);
        let err = store.record_execution(&rule.id, 3, now()).await.unwrap_err();
        assert!(matches!(err, RuleError::Persistence(_)));
        assert_eq!(store.manager().get(&rule.id).unwrap().total_executions, 0);
    }

    #[tokio::test]
    async fn test_missing_rule_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = PersistentRuleStore::load(Storage::new(temp_dir.path()))
            .await
            .unwrap();
        assert!(matches!(
            store.toggle("nope", now()).await,
            Err(RuleError::NotFound(_))
        ));
        assert!(!Storage::new(temp_dir.path()).exists(RuleSet::KEY).await);
    }
}
