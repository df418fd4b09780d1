//! Task Queue
//!
//! At-least-once delivery of side effects that must not run inside the
//! originating database transaction. Producers enqueue only after commit;
//! a consumer pool runs the handlers, retries failures with backoff and
//! dead-letters tasks that exhaust their retry budget.

mod broker;
mod distributor;
mod mailer;
mod memory;
mod postgres;
mod processor;
mod retry;
mod task;
mod verify_email;

use std::time::Duration;

use uuid::Uuid;

pub use broker::TaskBroker;
pub use distributor::{verify_email_options, TaskDistributor};
pub use mailer::{EmailMessage, LogMailer, Mailer};
pub use memory::InMemoryTaskBroker;
pub use postgres::PgTaskBroker;
pub use processor::{ProcessorConfig, ProcessorHandle, ShutdownReport, TaskHandler, TaskProcessor};
pub use retry::{RetryPolicy, RetryStrategy};
pub use task::{NewTask, QueueClass, Task, TaskOptions, TaskState, DEFAULT_MAX_RETRIES};
pub use verify_email::{PayloadSendVerifyEmail, SendVerifyEmailHandler, TASK_SEND_VERIFY_EMAIL};

/// Task queue error types
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task broker error: {0}")]
    Broker(String),

    #[error("Task not found: {0}")]
    NotFound(Uuid),

    /// The delivery being settled is no longer the active one
    #[error("Task {0} is no longer leased by this delivery")]
    LeaseLost(Uuid),

    #[error("Invalid task payload: {0}")]
    Payload(String),

    #[error("No handler registered for task type {0}")]
    UnknownType(String),

    /// Handler failure; retried while the budget lasts
    #[error("{0}")]
    Handler(String),

    /// Handler failure that no retry can fix; dead-lettered at once
    #[error("{0}")]
    SkipRetry(String),

    #[error("Task timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid task processor configuration: {0}")]
    InvalidConfig(String),
}

impl From<sqlx::Error> for TaskError {
    fn from(err: sqlx::Error) -> Self {
        TaskError::Broker(err.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::Payload(err.to_string())
    }
}
