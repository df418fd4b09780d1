//! Scheduled Jobs
//!
//! Background jobs for periodic task queue maintenance.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::interval;

use crate::tasks::{TaskBroker, TaskError};

// =========================================================================
// Lease recovery
// =========================================================================

/// Return tasks held by a consumer that stopped renewing its lease.
/// Recovered tasks are delivered again, which is where duplicate handler
/// invocations come from.
pub async fn recover_expired_leases(broker: &dyn TaskBroker) -> Result<u64, JobError> {
    let recovered = broker.recover_expired_leases().await?;

    if recovered > 0 {
        tracing::warn!(recovered, "Recovered tasks with expired leases");
    }

    Ok(recovered)
}

// =========================================================================
// Completed task purge
// =========================================================================

/// Delete completed tasks older than `retention`
pub async fn purge_completed_tasks(
    broker: &dyn TaskBroker,
    retention: Duration,
) -> Result<u64, JobError> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| JobError::InvalidConfig(e.to_string()))?;
    let rows_deleted = broker.purge_completed(Utc::now() - retention).await?;

    if rows_deleted > 0 {
        tracing::info!(rows_deleted, "Purged completed tasks");
    }

    Ok(rows_deleted)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for lease recovery (default: 30 seconds)
    pub lease_recovery_interval: Duration,
    /// Interval for completed task purge (default: 1 hour)
    pub purge_interval: Duration,
    /// How long completed tasks are kept (default: 24 hours)
    pub completed_retention: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            lease_recovery_interval: Duration::from_secs(30),
            purge_interval: Duration::from_secs(3600),
            completed_retention: Duration::from_secs(86_400),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    broker: Arc<dyn TaskBroker>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        Self {
            broker,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(broker: Arc<dyn TaskBroker>, config: JobSchedulerConfig) -> Self {
        Self { broker, config }
    }

    /// Start the job scheduler in the background.
    /// The loop exits on the first value sent on `shutdown` or when its sender is dropped.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Job scheduler started");

        let mut recovery_interval = interval(self.config.lease_recovery_interval);
        let mut purge_interval = interval(self.config.purge_interval);

        loop {
            tokio::select! {
                _ = recovery_interval.tick() => {
                    if let Err(e) = recover_expired_leases(self.broker.as_ref()).await {
                        tracing::error!(error = %e, "Lease recovery failed");
                    }
                }
                _ = purge_interval.tick() => {
                    if let Err(e) = purge_completed_tasks(self.broker.as_ref(), self.config.completed_retention).await {
                        tracing::error!(error = %e, "Completed task purge failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Job scheduler stopped");
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match recover_expired_leases(self.broker.as_ref()).await {
            Ok(count) => report.leases_recovered = count,
            Err(e) => report.errors.push(format!("Lease recovery: {}", e)),
        }

        match purge_completed_tasks(self.broker.as_ref(), self.config.completed_retention).await {
            Ok(count) => report.completed_tasks_purged = count,
            Err(e) => report.errors.push(format!("Completed task purge: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub leases_recovered: u64,
    pub completed_tasks_purged: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Task broker error: {0}")]
    Task(#[from] TaskError),

    #[error("Invalid job configuration: {0}")]
    InvalidConfig(String),
}

// =========================================================================
// Tests
// =========================================================================
