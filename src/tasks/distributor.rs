//! Task producer
//!
//! Turns post-commit events into enqueued tasks. Called only after the
//! originating transaction has committed.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::PostCommitEvent;

use super::{
    NewTask, PayloadSendVerifyEmail, QueueClass, Task, TaskBroker, TaskError, TaskOptions,
    TASK_SEND_VERIFY_EMAIL,
};

/// Options used for `task:send_verify_email`
pub fn verify_email_options() -> TaskOptions {
    TaskOptions::default()
        .max_retries(10)
        .process_in(Duration::from_secs(10))
        .queue(QueueClass::Critical)
}

#[derive(Clone)]
pub struct TaskDistributor {
    broker: Arc<dyn TaskBroker>,
}

impl TaskDistributor {
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        Self { broker }
    }

    pub async fn distribute_task_send_verify_email(
        &self,
        payload: &PayloadSendVerifyEmail,
        options: &TaskOptions,
    ) -> Result<Task, TaskError> {
        let task = NewTask::json(TASK_SEND_VERIFY_EMAIL, payload)?;
        let task = self.broker.enqueue(task, options).await?;

        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            queue = %task.queue,
            max_retries = task.max_retries,
            "Enqueued task"
        );
        Ok(task)
    }

    /// Enqueue the task for every event and return how many were accepted.
    ///
    /// An enqueue failure is logged and skipped; it never undoes the
    /// committed operation that produced the event.
    pub async fn dispatch_events(&self, events: Vec<PostCommitEvent>) -> usize {
        let mut enqueued = 0;
        for event in events {
            let result = match &event {
                PostCommitEvent::UserCreated { username } => {
                    let payload = PayloadSendVerifyEmail {
                        username: username.clone(),
                    };
                    self.distribute_task_send_verify_email(&payload, &verify_email_options())
                        .await
                }
            };

            match result {
                Ok(_) => enqueued += 1,
                Err(e) => tracing::error!(
                    event_type = event.event_type(),
                    error = %e,
                    "Failed to enqueue task for committed event"
                ),
            }
        }
        enqueued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{InMemoryTaskBroker, TaskState};

    fn user_created(name: &str) -> PostCommitEvent {
        PostCommitEvent::UserCreated {
            username: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_user_created_enqueues_verify_email() {
        let broker = Arc::new(InMemoryTaskBroker::new());
        let distributor = TaskDistributor::new(broker.clone());

        assert_eq!(distributor.dispatch_events(vec![user_created("alice")]).await, 1);

        let tasks = broker.snapshot();
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.task_type, TASK_SEND_VERIFY_EMAIL);
        assert_eq!(task.queue, QueueClass::Critical);
        assert_eq!(task.max_retries, 10);
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.not_before >= task.created_at + chrono::Duration::seconds(10));

        let payload: PayloadSendVerifyEmail = serde_json::from_slice(&task.payload).unwrap();
        assert_eq!(payload.username, "alice");
    }

    #[tokio::test]
    async fn test_enqueue_failure_is_swallowed() {
        let broker = Arc::new(InMemoryTaskBroker::new());
        broker.set_unavailable(true);
        let distributor = TaskDistributor::new(broker.clone());

        assert_eq!(distributor.dispatch_events(vec![user_created("alice")]).await, 0);
        broker.set_unavailable(false);
        assert!(broker.snapshot().is_empty());
    }
}
