//! Policy engine
//!
//! Holds the rule set in memory behind a read-write lock. `enforce` only
//! takes the read side; mutations persist through the adapter first and
//! then hold the write side just long enough to update the set.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{PolicyAdapter, PolicyError, PolicyRule, Subject};

pub struct PolicyEngine {
    adapter: Arc<dyn PolicyAdapter>,
    rules: RwLock<HashSet<PolicyRule>>,
    /// Serializes add/remove so the store and the cache apply them in the same order
    write_lock: tokio::sync::Mutex<()>,
}

impl PolicyEngine {
    /// Create an engine with an empty rule set; call `load` before serving.
    pub fn new(adapter: Arc<dyn PolicyAdapter>) -> Self {
        Self {
            adapter,
            rules: RwLock::new(HashSet::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the in-memory rule set with the stored one
    pub async fn load(&self) -> Result<usize, PolicyError> {
        let _guard = self.write_lock.lock().await;
        let stored: HashSet<PolicyRule> = self.adapter.load_policy().await?.into_iter().collect();
        let count = stored.len();
        *self.rules.write() = stored;

        tracing::info!(rules = count, "Policy rules loaded");
        Ok(count)
    }

    /// Allow if at least one rule matches; deny otherwise.
    pub fn enforce(&self, subject: &Subject, object: &str, action: &str) -> Result<bool, PolicyError> {
        if action.is_empty() {
            return Err(PolicyError::InvalidRequest("action must not be empty".to_string()));
        }
        if object.is_empty() {
            return Err(PolicyError::InvalidRequest("object must not be empty".to_string()));
        }

        let allowed = self
            .rules
            .read()
            .iter()
            .any(|rule| rule.matches(subject, object, action));

        tracing::debug!(
            subject = %subject.name,
            role = %subject.role,
            object = %object,
            action = %action,
            allowed,
            "Policy enforced"
        );
        Ok(allowed)
    }

    /// Add a rule; returns `false` if it was already effective.
    pub async fn add_policy(&self, rule: PolicyRule) -> Result<bool, PolicyError> {
        if !rule.is_complete() {
            return Err(PolicyError::InvalidRequest(
                "subject, object and action are required".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        self.adapter.add_policy(&rule).await?;
        let added = self.rules.write().insert(rule.clone());

        if added {
            tracing::info!(subject = %rule.subject, object = %rule.object, action = %rule.action, "Policy added");
        }
        Ok(added)
    }

    /// Remove a rule; returns `false` if it was not present.
    pub async fn remove_policy(&self, rule: &PolicyRule) -> Result<bool, PolicyError> {
        if !rule.is_complete() {
            return Err(PolicyError::InvalidRequest(
                "subject, object and action are required".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        self.adapter.remove_policy(rule).await?;
        let removed = self.rules.write().remove(rule);

        if removed {
            tracing::info!(subject = %rule.subject, object = %rule.object, action = %rule.action, "Policy removed");
        }
        Ok(removed)
    }

    /// Snapshot of the effective rules
    pub fn rules(&self) -> Vec<PolicyRule> {
        let mut rules: Vec<PolicyRule> = self.rules.read().iter().cloned().collect();
        rules.sort_by(|a, b| {
            (&a.subject, &a.object, &a.action).cmp(&(&b.subject, &b.object, &b.action))
        });
        rules
    }
}
