//! JSON persistence for the automation engine
//!
//! Rules, execution history and customer data are kept as versioned JSON
//! files in one storage directory.

pub mod customers;
pub mod logs;
pub mod rules;
pub mod storage;

pub use customers::{load_customers, save_customers};
pub use logs::{ExecutionHistory, PersistentExecutionLog};
pub use rules::{PersistentRuleStore, RuleSet};
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};
