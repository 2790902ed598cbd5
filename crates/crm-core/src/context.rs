//! Context type for tracking the origin of a rule execution

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// What started an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Invoked through the API
    #[default]
    Manual,

    /// Fired by the polling loop
    Schedule,
}

/// Context carried through a single rule execution
///
/// Every execution gets a fresh ULID so that log lines, log entries and
/// transport calls belonging to the same run can be correlated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this execution (ULID)
    pub id: String,

    /// What started the execution
    #[serde(default)]
    pub origin: Origin,

    /// User that requested a manual execution (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Context {
    /// Create a new context with a fresh ULID
    pub fn new(origin: Origin) -> Self {
        Self {
            id: Ulid::new().to_string(),
            origin,
            user_id: None,
        }
    }

    /// Context for an API-invoked execution
    pub fn manual() -> Self {
        Self::new(Origin::Manual)
    }

    /// Context for a poller-fired execution
    pub fn scheduled() -> Self {
        Self::new(Origin::Schedule)
    }

    /// Attach the requesting user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::manual()
    }
}
