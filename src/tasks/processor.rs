//! Task consumer pool
//!
//! A fixed number of workers lease tasks from the broker, run the handler
//! registered for the task type and settle the outcome: complete, retry
//! with backoff, or dead-letter once the retry budget is spent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::{RetryPolicy, Task, TaskBroker, TaskError};

/// Code run for one task type.
///
/// Delivery is at least once: a task whose consumer dies between running
/// the handler and acknowledging it is delivered again.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process(&self, task: &Task) -> Result<(), TaskError>;
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Number of workers
    pub concurrency: usize,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// How long a dequeued task stays leased before it may be recovered
    pub lease: Duration,
    /// A handler running longer than this counts as failed
    pub handler_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ProcessorConfig {
    /// The lease must outlive the handler, or a task still being worked on
    /// could be recovered and handed to a second consumer.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.handler_timeout >= self.lease {
            return Err(TaskError::InvalidConfig(format!(
                "lease ({:?}) must be longer than handler_timeout ({:?})",
                self.lease, self.handler_timeout
            )));
        }
        Ok(())
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(60),
            handler_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct TaskProcessor {
    broker: Arc<dyn TaskBroker>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    config: ProcessorConfig,
}

impl TaskProcessor {
    pub fn new(broker: Arc<dyn TaskBroker>, config: ProcessorConfig) -> Result<Self, TaskError> {
        config.validate()?;
        Ok(Self {
            broker,
            handlers: HashMap::new(),
            config,
        })
    }

    /// Route tasks of `task_type` to `handler`
    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.into(), handler);
    }

    /// Spawn the workers
    pub fn start(self) -> ProcessorHandle {
        let concurrency = self.config.concurrency.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Arc::new(Worker {
            broker: self.broker,
            handlers: self.handlers,
            config: self.config,
            in_flight: Mutex::new(HashSet::new()),
        });

        let workers = (0..concurrency)
            .map(|n| {
                let worker = worker.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { worker.run(n, shutdown).await })
            })
            .collect();

        tracing::info!(concurrency, "Task processor started");
        ProcessorHandle {
            shutdown_tx,
            workers,
            worker,
        }
    }
}

/// Outcome of `ProcessorHandle::shutdown`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every worker finished its current task within the timeout
    pub drained: bool,
    /// Workers cut off at the timeout
    pub aborted: usize,
    /// In-flight tasks returned to pending
    pub requeued: usize,
}

pub struct ProcessorHandle {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    worker: Arc<Worker>,
}

impl ProcessorHandle {
    /// Stop dequeuing, wait up to `timeout` for in-flight tasks, then abort
    /// the remaining workers and requeue what they held.
    pub async fn shutdown(self, timeout: Duration) -> ShutdownReport {
        let _ = self.shutdown_tx.send(true);
        let deadline = Instant::now() + timeout;
        let mut pending = self.workers;
        let mut report = ShutdownReport {
            drained: true,
            ..Default::default()
        };

        while let Some(handle) = pending.last_mut() {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                report.drained = false;
                break;
            }
            pending.pop();
        }

        for handle in &pending {
            handle.abort();
        }
        for handle in pending {
            let _ = handle.await;
            report.aborted += 1;
        }

        let stranded: Vec<Uuid> = self.worker.in_flight.lock().drain().collect();
        for id in stranded {
            match self.worker.broker.requeue(id).await {
                Ok(true) => report.requeued += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(task_id = %id, error = %e, "Failed to requeue task on shutdown"),
            }
        }

        tracing::info!(
            drained = report.drained,
            aborted = report.aborted,
            requeued = report.requeued,
            "Task processor stopped"
        );
        report
    }
}

struct Worker {
    broker: Arc<dyn TaskBroker>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    config: ProcessorConfig,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl Worker {
    async fn run(&self, n: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let stop = match self.broker.dequeue(self.config.lease).await {
                Ok(Some(task)) => {
                    self.execute(task).await;
                    false
                }
                Ok(None) => self.idle(&mut shutdown).await,
                Err(e) => {
                    tracing::warn!(worker = n, error = %e, "Failed to dequeue task");
                    self.idle(&mut shutdown).await
                }
            };
            if stop {
                break;
            }
        }
        tracing::debug!(worker = n, "Task worker stopped");
    }

    /// Wait one poll interval; `true` if the shutdown channel is gone
    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            changed = shutdown.changed() => changed.is_err(),
            _ = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }

    async fn execute(&self, task: Task) {
        self.in_flight.lock().insert(task.id);

        let outcome = match self.handlers.get(&task.task_type) {
            None => Err(TaskError::UnknownType(task.task_type.clone())),
            Some(handler) => {
                match tokio::time::timeout(self.config.handler_timeout, handler.process(&task)).await {
                    Ok(result) => result,
                    Err(_) => Err(TaskError::Timeout(self.config.handler_timeout)),
                }
            }
        };

        match self.settle(&task, outcome).await {
            Ok(()) => {}
            Err(e @ TaskError::LeaseLost(_)) => {
                tracing::warn!(task_id = %task.id, error = %e, "Task outcome discarded, lease lost");
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "Failed to record task outcome");
            }
        }

        self.in_flight.lock().remove(&task.id);
    }

    async fn settle(&self, task: &Task, outcome: Result<(), TaskError>) -> Result<(), TaskError> {
        match outcome {
            Ok(()) => {
                self.broker.complete(task).await?;
                tracing::debug!(task_id = %task.id, task_type = %task.task_type, "Task completed");
            }
            Err(e @ (TaskError::SkipRetry(_) | TaskError::UnknownType(_))) => {
                tracing::error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    error = %e,
                    "Task is not retryable, moved to dead letter"
                );
                self.broker.kill(task, &e.to_string()).await?;
            }
            Err(e) if task.can_retry() => {
                let attempt = (task.retried + 1) as u32;
                let delay = self.config.retry.delay(attempt);
                let run_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

                tracing::warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt,
                    max_retries = task.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Task failed, retry scheduled"
                );
                self.broker.retry(task, run_at, &e.to_string()).await?;
            }
            Err(e) => {
                tracing::error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    retried = task.retried,
                    error = %e,
                    "Task exhausted its retries, moved to dead letter"
                );
                self.broker.kill(task, &e.to_string()).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::tasks::{InMemoryTaskBroker, NewTask, RetryStrategy, TaskOptions, TaskState};

    fn fast_config() -> ProcessorConfig {
        ProcessorConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(5),
            lease: Duration::from_secs(30),
            handler_timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                strategy: RetryStrategy::Linear,
                base: Duration::from_millis(1),
                max: Duration::from_millis(5),
            },
        }
    }

    /// Fails until it has been called `succeed_on` times
    struct CountingHandler {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn process(&self, _task: &Task) -> Result<(), TaskError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < self.succeed_on {
                return Err(TaskError::Handler(format!("attempt {} failed", call)));
            }
            Ok(())
        }
    }

    struct SleepyHandler(Duration);

    #[async_trait]
    impl TaskHandler for SleepyHandler {
        async fn process(&self, _task: &Task) -> Result<(), TaskError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    async fn wait_for_state(broker: &InMemoryTaskBroker, id: Uuid, state: TaskState) -> Task {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let task = broker.get(id).await.unwrap().unwrap();
            if task.state == state {
                return task;
            }
            assert!(Instant::now() < deadline, "task stuck in {:?}", task.state);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_retried_until_success_then_stops() {
        let broker = Arc::new(InMemoryTaskBroker::new());
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        });
        let mut processor = TaskProcessor::new(broker.clone(), fast_config()).unwrap();
        processor.register("task:flaky", handler.clone());
        let handle = processor.start();

        let task = broker
            .enqueue(NewTask::new("task:flaky", Vec::new()), &TaskOptions::default().max_retries(5))
            .await
            .unwrap();
        let done = wait_for_state(&broker, task.id, TaskState::Completed).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(done.retried, 2);
        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_exhausted_task_is_dead_lettered() {
        let broker = Arc::new(InMemoryTaskBroker::new());
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            succeed_on: u32::MAX,
        });
        let mut processor = TaskProcessor::new(broker.clone(), fast_config()).unwrap();
        processor.register("task:broken", handler.clone());
        let handle = processor.start();

        let task = broker
            .enqueue(NewTask::new("task:broken", Vec::new()), &TaskOptions::default().max_retries(2))
            .await
            .unwrap();
        let dead = wait_for_state(&broker, task.id, TaskState::Dead).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(dead.last_error.as_deref(), Some("attempt 3 failed"));
        assert_eq!(broker.list_dead(10).await.unwrap().len(), 1);
        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_unknown_type_is_dead_lettered() {
        let broker = Arc::new(InMemoryTaskBroker::new());
        let handle = TaskProcessor::new(broker.clone(), fast_config()).unwrap().start();

        let task = broker
            .enqueue(NewTask::new("task:nobody", Vec::new()), &TaskOptions::default())
            .await
            .unwrap();
        let dead = wait_for_state(&broker, task.id, TaskState::Dead).await;
        assert_eq!(dead.retried, 0);
        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_handler_timeout_counts_as_failure() {
        let broker = Arc::new(InMemoryTaskBroker::new());
        let mut processor = TaskProcessor::new(broker.clone(), fast_config()).unwrap();
        processor.register("task:slow", Arc::new(SleepyHandler(Duration::from_secs(10))));
        let handle = processor.start();

        let task = broker
            .enqueue(NewTask::new("task:slow", Vec::new()), &TaskOptions::default().max_retries(0))
            .await
            .unwrap();
        let dead = wait_for_state(&broker, task.id, TaskState::Dead).await;
        assert!(dead.last_error.unwrap().contains("timed out"));
        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_task() {
        let broker = Arc::new(InMemoryTaskBroker::new());
        let mut processor = TaskProcessor::new(broker.clone(), fast_config()).unwrap();
        processor.register("task:short", Arc::new(SleepyHandler(Duration::from_millis(50))));
        let handle = processor.start();

        let task = broker
            .enqueue(NewTask::new("task:short", Vec::new()), &TaskOptions::default())
            .await
            .unwrap();
        wait_for_state(&broker, task.id, TaskState::Active).await;

        let report = handle.shutdown(Duration::from_secs(2)).await;
        assert!(report.drained);
        assert_eq!(report.requeued, 0);
        assert_eq!(broker.get(task.id).await.unwrap().unwrap().state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_shutdown_timeout_requeues_in_flight_task() {
        let broker = Arc::new(InMemoryTaskBroker::new());
        let config = ProcessorConfig {
            lease: Duration::from_secs(60),
            handler_timeout: Duration::from_secs(30),
            ..fast_config()
        };
        let mut processor = TaskProcessor::new(broker.clone(), config).unwrap();
        processor.register("task:long", Arc::new(SleepyHandler(Duration::from_secs(10))));
        let handle = processor.start();

        let task = broker
            .enqueue(NewTask::new("task:long", Vec::new()), &TaskOptions::default())
            .await
            .unwrap();
        wait_for_state(&broker, task.id, TaskState::Active).await;

        let report = handle.shutdown(Duration::from_millis(50)).await;
        assert!(!report.drained);
        assert_eq!(report.requeued, 1);

        let stored = broker.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Pending);
        assert_eq!(stored.retried, 0);
    }

    #[test]
    fn test_lease_must_outlive_handler() {
        assert!(ProcessorConfig::default().validate().is_ok());

        let config = ProcessorConfig {
            lease: Duration::from_secs(10),
            handler_timeout: Duration::from_secs(10),
            ..fast_config()
        };
        let broker = Arc::new(InMemoryTaskBroker::new());
        assert!(matches!(
            TaskProcessor::new(broker, config),
            Err(TaskError::InvalidConfig(_))
        ));
    }

    /// Holds the task until the lease has been recovered and redelivered
    struct OutlivedHandler {
        broker: Arc<InMemoryTaskBroker>,
    }

    #[async_trait]
    impl TaskHandler for OutlivedHandler {
        async fn process(&self, task: &Task) -> Result<(), TaskError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.broker.recover_expired_leases().await?;
            let redelivered = self.broker.dequeue(Duration::from_secs(30)).await?;
            assert_eq!(redelivered.map(|t| t.id), Some(task.id));
            Err(TaskError::SkipRetry("stale failure".to_string()))
        }
    }

    #[tokio::test]
    async fn test_stale_worker_outcome_is_discarded() {
        let broker = Arc::new(InMemoryTaskBroker::new());
        // Built directly: `new` refuses a lease shorter than the handler timeout
        let mut processor = TaskProcessor {
            broker: broker.clone(),
            handlers: HashMap::new(),
            config: ProcessorConfig {
                concurrency: 1,
                lease: Duration::from_millis(10),
                handler_timeout: Duration::from_secs(1),
                ..fast_config()
            },
        };
        processor.register(
            "task:outlived",
            Arc::new(OutlivedHandler {
                broker: broker.clone(),
            }),
        );
        let handle = processor.start();

        let task = broker
            .enqueue(NewTask::new("task:outlived", Vec::new()), &TaskOptions::default())
            .await
            .unwrap();
        wait_for_state(&broker, task.id, TaskState::Active).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown(Duration::from_secs(1)).await;

        // The redelivery's lease is untouched by the stale SkipRetry
        let stored = broker.get(task.id).await.unwrap().unwrap();
        assert_ne!(stored.state, TaskState::Dead);
        assert_eq!(stored.retried, 1);
        assert_eq!(stored.last_error.as_deref(), Some("lease expired"));
    }
}
