//! Task records and enqueue options

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TaskError;

/// Retry budget when the producer does not set one
pub const DEFAULT_MAX_RETRIES: i32 = 25;

/// Priority tier; higher tiers are always drained first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    Critical,
    #[default]
    Default,
    Low,
}

impl QueueClass {
    pub fn priority(&self) -> i32 {
        match self {
            QueueClass::Critical => 6,
            QueueClass::Default => 3,
            QueueClass::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueClass::Critical => "critical",
            QueueClass::Default => "default",
            QueueClass::Low => "low",
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(QueueClass::Critical),
            "default" => Ok(QueueClass::Default),
            "low" => Ok(QueueClass::Low),
            other => Err(format!("unknown queue: {}", other)),
        }
    }
}

/// Task lifecycle: pending -> active -> completed | pending (retry) | dead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Active,
    Completed,
    /// Retry budget exhausted; kept for operator inspection
    Dead,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::Completed => "completed",
            TaskState::Dead => "dead",
        }
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "active" => Ok(TaskState::Active),
            "completed" => Ok(TaskState::Completed),
            "dead" => Ok(TaskState::Dead),
            other => Err(format!("unknown task state: {}", other)),
        }
    }
}

/// A stored task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    /// Opaque to the queue; handlers decode it
    pub payload: Vec<u8>,
    pub queue: QueueClass,
    pub state: TaskState,
    pub max_retries: i32,
    /// Failed attempts so far
    pub retried: i32,
    /// Earliest time the task may be handed to a consumer
    pub not_before: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether one more failure still leaves a retry
    pub fn can_retry(&self) -> bool {
        self.retried < self.max_retries
    }
}

/// Type and payload of a task about to be enqueued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub task_type: String,
    pub payload: Vec<u8>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
        }
    }

    /// Encode `payload` as JSON
    pub fn json<T: Serialize>(task_type: impl Into<String>, payload: &T) -> Result<Self, TaskError> {
        Ok(Self::new(task_type, serde_json::to_vec(payload)?))
    }
}

/// Scheduling options for `TaskBroker::enqueue`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    pub max_retries: i32,
    /// Delay before the first attempt
    pub process_in: Duration,
    pub queue: QueueClass,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            process_in: Duration::ZERO,
            queue: QueueClass::Default,
        }
    }
}

impl TaskOptions {
    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(0);
        self
    }

    pub fn process_in(mut self, delay: Duration) -> Self {
        self.process_in = delay;
        self
    }

    pub fn queue(mut self, queue: QueueClass) -> Self {
        self.queue = queue;
        self
    }

    /// Absolute earliest processing time relative to `now`
    pub fn not_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.process_in) {
            Ok(delay) => now + delay,
            Err(_) => now,
        }
    }
}
