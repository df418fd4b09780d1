//! Operation Context
//!
//! Contains metadata about the current operation for tracing, plus the
//! caller-supplied deadline every core operation must honor.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// Context for an operation, used for tracing and deadline propagation.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Correlation ID for request tracing
    pub correlation_id: Option<Uuid>,

    /// Client IP address
    pub client_ip: Option<IpAddr>,

    /// Client user agent
    pub user_agent: Option<String>,

    /// Point in time after which in-flight work is abandoned
    pub deadline: Option<Instant>,
}

/// Returned when an operation outlives its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Deadline exceeded")]
pub struct DeadlineExceeded;

impl OperationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Create context with client IP
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Create context with user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Create context that expires `timeout` from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    /// Drive `fut` to completion unless the deadline passes first.
    ///
    /// On expiry the future is dropped; an open `sqlx::Transaction` inside it
    /// is rolled back by its destructor.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, DeadlineExceeded>
    where
        F: Future<Output = T>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| DeadlineExceeded),
            None => Ok(fut.await),
        }
    }
}
