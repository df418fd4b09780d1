//! Shared handler state

use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthService;
use crate::ledger::LedgerService;
use crate::policy::PolicyEngine;
use crate::tasks::{TaskBroker, TaskDistributor};
use crate::users::UserService;

/// Services every handler can reach. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerService>,
    pub users: Arc<UserService>,
    pub auth: Arc<AuthService>,
    pub policies: Arc<PolicyEngine>,
    pub distributor: TaskDistributor,
    pub tasks: Arc<dyn TaskBroker>,
    /// Deadline given to each request's `OperationContext`
    pub request_timeout: Duration,
    /// Honor `X-Forwarded-For` when recording the client address
    pub trust_forwarded_for: bool,
}
