//! Execution log persisted to a storage file

use async_trait::async_trait;
use crm_automation::{
    ExecutionLog, ExecutionLogEntry, InMemoryExecutionLog, RuleError, RuleResult,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::storage::{Storable, Storage, StorageResult};

/// Stored execution history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionHistory {
    #[serde(default)]
    pub entries: Vec<ExecutionLogEntry>,
}

impl Storable for ExecutionHistory {
    const KEY: &'static str = "crm.automation_executions";
    const VERSION: u32 = 1;
    const MINOR_VERSION: u32 = 1;
}

/// [`ExecutionLog`] that saves the full history on every append
///
/// Entries only become visible once they are on disk.
pub struct PersistentExecutionLog {
    storage: Storage,
    log: InMemoryExecutionLog,
    write_lock: Mutex<()>,
}

impl PersistentExecutionLog {
    /// Load the stored history, starting empty when none exists
    pub async fn load(storage: Storage) -> StorageResult<Self> {
        let entries = storage
            .load_data::<ExecutionHistory>()
            .await?
            .map(|history| history.entries)
            .unwrap_or_default();
        info!(count = entries.len(), "Loaded execution history");

        Ok(Self {
            storage,
            log: InMemoryExecutionLog::from_entries(entries),
            write_lock: Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

#[async_trait]
impl ExecutionLog for PersistentExecutionLog {
    async fn append(&self, entries: Vec<ExecutionLogEntry>) -> RuleResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut history = ExecutionHistory {
            entries: self.log.snapshot(),
        };
        history.entries.extend(entries.iter().cloned());

        if let Err(e) = self.storage.save_data(&history).await {
            error!(error = %e, "Failed to save execution history");
            return Err(RuleError::Persistence(e.to_string()));
        }
        self.log.push(entries);
        Ok(())
    }

    async fn for_rule(&self, rule_id: &str) -> RuleResult<Vec<ExecutionLogEntry>> {
        self.log.for_rule(rule_id).await
    }

    async fn all(&self) -> RuleResult<Vec<ExecutionLogEntry>> {
        self.log.all().await
    }

    async fn discard_run(&self, context_id: &str) -> RuleResult<usize> {
        let _guard = self.write_lock.lock().await;
        let history = ExecutionHistory {
            entries: self
                .log
                .snapshot()
                .into_iter()
                .filter(|e| e.context_id != context_id)
                .collect(),
        };
        if history.entries.len() == self.log.len() {
            return Ok(0);
        }

        if let Err(e) = self.storage.save_data(&history).await {
            error!(error = %e, context_id, "Failed to save execution history");
            return Err(RuleError::Persistence(e.to_string()));
        }
        Ok(self.log.remove_context(context_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crm_automation::ActionResults;
    use tempfile::TempDir;

    fn entry(rule: &str, customer: &str, hour: u32) -> ExecutionLogEntry {
        let mut results = ActionResults::default();
        results.emails.sent = 1;
        ExecutionLogEntry::new(
            rule,
            customer,
            "ctx-1",
            Utc.with_ymd_and_hms(2024, 8, 1, hour, 0, 0).unwrap(),
            results,
        )
    }

    #[tokio::test]
    async fn test_history_survives_reload() {
        let temp_dir = TempDir::new().unwrap();
        let log = PersistentExecutionLog::load(Storage::new(temp_dir.path()))
            .await
            .unwrap();
        log.append(vec![entry("r1", "a", 9), entry("r1", "b", 9)])
            .await
            .unwrap();
        log.append(vec![entry("r2", "a", 10)]).await.unwrap();

        let reloaded = PersistentExecutionLog::load(Storage::new(temp_dir.path()))
            .await
            .unwrap();
        assert_eq!(reloaded.len(), 3);
        let r1 = reloaded.for_rule("r1").await.unwrap();
        assert_eq!(r1.len(), 2);
        assert_eq!(r1[0].results.emails.sent, 1);
        assert_eq!(reloaded.all().await.unwrap()[0].rule_id, "r2");
    }

    #[tokio::test]
    async fn test_failed_save_keeps_entries_out() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("storage");
        let log = PersistentExecutionLog::load(Storage::new(&dir)).await.unwrap();
        std::fs::write(&dir, "").unwrap();

        let err = log.append(vec![entry("r1", "a", 9)]).await.unwrap_err();
        assert!(matches!(err, RuleError::Persistence(_)));
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_discard_run_is_saved() {
        let temp_dir = TempDir::new().unwrap();
        let log = PersistentExecutionLog::load(Storage::new(temp_dir.path()))
            .await
            .unwrap();
        let mut retried = entry("r1", "b", 10);
        retried.context_id = "ctx-2".to_string();
        log.append(vec![entry("r1", "a", 9), retried]).await.unwrap();

        assert_eq!(log.discard_run("ctx-1").await.unwrap(), 1);
        assert_eq!(log.discard_run("ctx-1").await.unwrap(), 0);

        let reloaded = PersistentExecutionLog::load(Storage::new(temp_dir.path()))
            .await
            .unwrap();
        let entries = reloaded.all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].context_id, "ctx-2");
    }
}
