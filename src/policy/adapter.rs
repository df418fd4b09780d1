//! Policy persistence
//!
//! The engine writes every mutation through a `PolicyAdapter` before it
//! touches its in-memory rule set.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::PgPool;

use crate::db::StoreError;

use super::PolicyRule;

#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    /// Every stored rule
    async fn load_policy(&self) -> Result<Vec<PolicyRule>, StoreError>;

    /// Store a rule; `false` when it already existed
    async fn add_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError>;

    /// Delete a rule; `false` when it was absent
    async fn remove_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError>;
}

/// Rules stored in the `policy_rules` table
#[derive(Debug, Clone)]
pub struct PgPolicyAdapter {
    pool: PgPool,
}

impl PgPolicyAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyAdapter for PgPolicyAdapter {
    async fn load_policy(&self) -> Result<Vec<PolicyRule>, StoreError> {
        let rules = sqlx::query_as::<_, PolicyRule>(
            "SELECT subject, object, action FROM policy_rules ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    async fn add_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO policy_rules (subject, object, action)
            VALUES ($1, $2, $3)
            ON CONFLICT (subject, object, action) DO NOTHING
            "#,
        )
        .bind(&rule.subject)
        .bind(&rule.object)
        .bind(&rule.action)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM policy_rules WHERE subject = $1 AND object = $2 AND action = $3",
        )
        .bind(&rule.subject)
        .bind(&rule.object)
        .bind(&rule.action)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Rules kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryPolicyAdapter {
    rules: Mutex<Vec<PolicyRule>>,
    fail_writes: AtomicBool,
}

impl InMemoryPolicyAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        let adapter = Self::default();
        {
            let mut stored = adapter.rules.lock();
            let mut seen = HashSet::new();
            for rule in rules {
                if seen.insert(rule.clone()) {
                    stored.push(rule);
                }
            }
        }
        adapter
    }

    /// Make subsequent writes fail as if the store were unreachable
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("policy store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyAdapter for InMemoryPolicyAdapter {
    async fn load_policy(&self) -> Result<Vec<PolicyRule>, StoreError> {
        Ok(self.rules.lock().clone())
    }

    async fn add_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut rules = self.rules.lock();
        if rules.contains(rule) {
            return Ok(false);
        }
        rules.push(rule.clone());
        Ok(true)
    }

    async fn remove_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut rules = self.rules.lock();
        let before = rules.len();
        rules.retain(|r| r != rule);
        Ok(rules.len() != before)
    }
}
