//! Queue transport port

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{NewTask, Task, TaskError, TaskOptions};

/// Durable task storage with leases.
///
/// A dequeued task is `active` until its lease expires. Expired leases are
/// returned to `pending` by `recover_expired_leases`, which is how a task
/// held by a crashed consumer is delivered again.
///
/// `complete`, `retry` and `kill` take the task as it was dequeued and only
/// apply while that delivery still holds the task (`active`, same
/// `retried`); otherwise they fail with `TaskError::LeaseLost`.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Store a pending task; durable once this returns `Ok`
    async fn enqueue(&self, task: NewTask, options: &TaskOptions) -> Result<Task, TaskError>;

    /// Lease the next ready task: highest priority first, then earliest
    /// `not_before`
    async fn dequeue(&self, lease: Duration) -> Result<Option<Task>, TaskError>;

    async fn complete(&self, task: &Task) -> Result<(), TaskError>;

    /// Count a failed attempt and make the task ready again at `run_at`
    async fn retry(&self, task: &Task, run_at: DateTime<Utc>, error: &str) -> Result<(), TaskError>;

    /// Move to the dead-letter state
    async fn kill(&self, task: &Task, error: &str) -> Result<(), TaskError>;

    /// Return an active task to pending without counting a failure;
    /// `false` if the task was not active
    async fn requeue(&self, id: Uuid) -> Result<bool, TaskError>;

    /// Return every task whose lease has expired to pending, counting the
    /// lost attempt. Tasks with no retries left are dead-lettered instead.
    async fn recover_expired_leases(&self) -> Result<u64, TaskError>;

    /// Delete completed tasks last touched before `before`
    async fn purge_completed(&self, before: DateTime<Utc>) -> Result<u64, TaskError>;

    /// Dead-lettered tasks, most recent first
    async fn list_dead(&self, limit: i64) -> Result<Vec<Task>, TaskError>;

    async fn get(&self, id: Uuid) -> Result<Option<Task>, TaskError>;
}

pub(crate) fn lease_until(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    match chrono::Duration::from_std(lease) {
        Ok(lease) => now + lease,
        Err(_) => now,
    }
}
