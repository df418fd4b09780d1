//! Policy rules and the matcher

use serde::{Deserialize, Serialize};

/// Object pattern matching any object
pub const WILDCARD: &str = "*";

/// Action names checked by the HTTP layer
pub mod actions {
    pub const ACCOUNTS_CREATE: &str = "accounts:create";
    pub const ACCOUNTS_READ: &str = "accounts:read";
    pub const ACCOUNTS_LIST: &str = "accounts:list";
    pub const TRANSFERS_CREATE: &str = "transfers:create";
    pub const USERS_UPDATE: &str = "users:update";
    /// Held in addition to `USERS_UPDATE` to modify another user's record
    pub const USERS_UPDATE_OTHERS: &str = "users:update_others";
    pub const POLICIES_MANAGE: &str = "policies:manage";
    pub const TASKS_INSPECT: &str = "tasks:inspect";
}

/// A stored (subject, object, action) triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct PolicyRule {
    /// Role name or principal name
    pub subject: String,
    /// Concrete object identity or `*`
    pub object: String,
    pub action: String,
}

impl PolicyRule {
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    /// Subject matches by exact role or exact name, object by `*` or
    /// equality, action by equality.
    pub fn matches(&self, subject: &Subject, object: &str, action: &str) -> bool {
        (self.subject == subject.role || self.subject == subject.name)
            && (self.object == WILDCARD || self.object == object)
            && self.action == action
    }

    pub fn is_complete(&self) -> bool {
        !self.subject.is_empty() && !self.object.is_empty() && !self.action.is_empty()
    }
}

/// The principal asking for permission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub name: String,
    pub role: String,
}

impl Subject {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }
}
