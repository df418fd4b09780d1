//! Startup policy seeding

use crate::domain::user::{BANKER_ROLE, DEPOSITOR_ROLE};

use super::{actions, PolicyEngine, PolicyError, PolicyRule, WILDCARD};

/// Actions every authenticated role may attempt
const COMMON_ACTIONS: [&str; 5] = [
    actions::ACCOUNTS_CREATE,
    actions::ACCOUNTS_READ,
    actions::ACCOUNTS_LIST,
    actions::USERS_UPDATE,
    actions::TRANSFERS_CREATE,
];

const BANKER_ACTIONS: [&str; 3] = [
    actions::USERS_UPDATE_OTHERS,
    actions::POLICIES_MANAGE,
    actions::TASKS_INSPECT,
];

/// Rules the service expects to exist
pub fn default_policies() -> Vec<PolicyRule> {
    let mut rules = Vec::new();
    for role in [BANKER_ROLE, DEPOSITOR_ROLE] {
        for action in COMMON_ACTIONS {
            rules.push(PolicyRule::new(role, WILDCARD, action));
        }
    }
    for action in BANKER_ACTIONS {
        rules.push(PolicyRule::new(BANKER_ROLE, WILDCARD, action));
    }
    rules
}

/// Add the default rules; existing rules are left alone.
pub async fn seed_policies(engine: &PolicyEngine) -> Result<usize, PolicyError> {
    let mut added = 0;
    for rule in default_policies() {
        if engine.add_policy(rule).await? {
            added += 1;
        }
    }

    tracing::info!(added, "Default policies seeded");
    Ok(added)
}
