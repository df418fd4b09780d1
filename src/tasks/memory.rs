//! In-memory task broker

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::broker::lease_until;
use super::{NewTask, Task, TaskBroker, TaskError, TaskOptions, TaskState};

#[derive(Debug, Default)]
pub struct InMemoryTaskBroker {
    tasks: Mutex<HashMap<Uuid, Task>>,
    unavailable: AtomicBool,
}

impl InMemoryTaskBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the broker were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every stored task, oldest first
    pub fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.lock().values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    fn check_available(&self) -> Result<(), TaskError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TaskError::Broker("task broker unavailable".to_string()));
        }
        Ok(())
    }

    /// Apply `apply` to the stored task if `leased` is still its active delivery
    fn settle<F>(&self, leased: &Task, apply: F) -> Result<(), TaskError>
    where
        F: FnOnce(&mut Task),
    {
        self.check_available()?;
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(&leased.id)
            .ok_or(TaskError::NotFound(leased.id))?;
        if task.state != TaskState::Active || task.retried != leased.retried {
            return Err(TaskError::LeaseLost(leased.id));
        }
        apply(task);
        task.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TaskBroker for InMemoryTaskBroker {
    async fn enqueue(&self, task: NewTask, options: &TaskOptions) -> Result<Task, TaskError> {
        self.check_available()?;
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            task_type: task.task_type,
            payload: task.payload,
            queue: options.queue,
            state: TaskState::Pending,
            max_retries: options.max_retries,
            retried: 0,
            not_before: options.not_before(now),
            lease_expires_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.tasks.lock().insert(task.id, task.clone());
        Ok(task)
    }

    async fn dequeue(&self, lease: Duration) -> Result<Option<Task>, TaskError> {
        self.check_available()?;
        let now = Utc::now();
        let mut tasks = self.tasks.lock();

        let next = tasks
            .values()
            .filter(|t| t.state == TaskState::Pending && t.not_before <= now)
            .max_by_key(|t| (t.queue.priority(), Reverse(t.not_before), Reverse(t.created_at)))
            .map(|t| t.id);

        Ok(next.and_then(|id| tasks.get_mut(&id)).map(|task| {
            task.state = TaskState::Active;
            task.lease_expires_at = Some(lease_until(now, lease));
            task.updated_at = now;
            task.clone()
        }))
    }

    async fn complete(&self, leased: &Task) -> Result<(), TaskError> {
        self.settle(leased, |task| {
            task.state = TaskState::Completed;
            task.lease_expires_at = None;
        })
    }

    async fn retry(&self, leased: &Task, run_at: DateTime<Utc>, error: &str) -> Result<(), TaskError> {
        self.settle(leased, |task| {
            task.state = TaskState::Pending;
            task.retried += 1;
            task.not_before = run_at;
            task.lease_expires_at = None;
            task.last_error = Some(error.to_string());
        })
    }

    async fn kill(&self, leased: &Task, error: &str) -> Result<(), TaskError> {
        self.settle(leased, |task| {
            task.state = TaskState::Dead;
            task.lease_expires_at = None;
            task.last_error = Some(error.to_string());
        })
    }

    async fn requeue(&self, id: Uuid) -> Result<bool, TaskError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
        if task.state != TaskState::Active {
            return Ok(false);
        }
        task.state = TaskState::Pending;
        task.lease_expires_at = None;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn recover_expired_leases(&self) -> Result<u64, TaskError> {
        self.check_available()?;
        let now = Utc::now();
        let mut recovered = 0;

        for task in self.tasks.lock().values_mut() {
            let expired = task.state == TaskState::Active
                && task.lease_expires_at.map_or(true, |until| until < now);
            if !expired {
                continue;
            }

            task.state = if task.can_retry() {
                TaskState::Pending
            } else {
                TaskState::Dead
            };
            task.retried += 1;
            task.lease_expires_at = None;
            task.last_error = Some("lease expired".to_string());
            task.updated_at = now;
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn purge_completed(&self, before: DateTime<Utc>) -> Result<u64, TaskError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock();
        let count = tasks.len();
        tasks.retain(|_, t| !(t.state == TaskState::Completed && t.updated_at < before));
        Ok((count - tasks.len()) as u64)
    }

    async fn list_dead(&self, limit: i64) -> Result<Vec<Task>, TaskError> {
        self.check_available()?;
        let mut dead: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.state == TaskState::Dead)
            .cloned()
            .collect();
        dead.sort_by_key(|t| Reverse(t.updated_at));
        dead.truncate(limit.max(0) as usize);
        Ok(dead)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, TaskError> {
        self.check_available()?;
        Ok(self.tasks.lock().get(&id).cloned())
    }
}
