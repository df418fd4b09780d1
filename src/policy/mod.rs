//! Policy Engine
//!
//! Runtime-mutable (subject, object, action) authorization rules. Unknown
//! subjects match nothing and are denied.

mod adapter;
mod engine;
mod rule;
mod seed;

pub use adapter::{InMemoryPolicyAdapter, PgPolicyAdapter, PolicyAdapter};
pub use engine::PolicyEngine;
pub use rule::{actions, PolicyRule, Subject, WILDCARD};
pub use seed::{default_policies, seed_policies};

use crate::db::StoreError;

/// Policy engine error types
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Invalid policy request: {0}")]
    InvalidRequest(String),

    #[error("Policy store error: {0}")]
    Store(#[from] StoreError),
}
