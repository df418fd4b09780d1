//! PostgreSQL task broker
//!
//! Consumers claim work with `FOR UPDATE SKIP LOCKED`, so concurrent
//! dequeues never hand out the same task twice.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgQueryResult;
use sqlx::PgPool;
use uuid::Uuid;

use super::broker::lease_until;
use super::{NewTask, QueueClass, Task, TaskBroker, TaskError, TaskOptions, TaskState};

const TASK_COLUMNS: &str = "id, task_type, payload, queue, state, max_retries, retried, \
     not_before, lease_expires_at, last_error, created_at, updated_at";

/// Row shape of the `tasks` table
#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    task_type: String,
    payload: Vec<u8>,
    queue: String,
    state: String,
    max_retries: i32,
    retried: i32,
    not_before: DateTime<Utc>,
    lease_expires_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = TaskError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: row.id,
            task_type: row.task_type,
            payload: row.payload,
            queue: row.queue.parse::<QueueClass>().map_err(TaskError::Broker)?,
            state: row.state.parse::<TaskState>().map_err(TaskError::Broker)?,
            max_retries: row.max_retries,
            retried: row.retried,
            not_before: row.not_before,
            lease_expires_at: row.lease_expires_at,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgTaskBroker {
    pool: PgPool,
}

impl PgTaskBroker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Settling UPDATEs match nothing once the delivery has lost its lease
fn check_settled(result: PgQueryResult, leased: &Task) -> Result<(), TaskError> {
    if result.rows_affected() == 0 {
        return Err(TaskError::LeaseLost(leased.id));
    }
    Ok(())
}

#[async_trait]
impl TaskBroker for PgTaskBroker {
    async fn enqueue(&self, task: NewTask, options: &TaskOptions) -> Result<Task, TaskError> {
        let query = format!(
            r#"
            INSERT INTO tasks (id, task_type, payload, queue, priority, state, max_retries, not_before)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(Uuid::new_v4())
            .bind(&task.task_type)
            .bind(&task.payload)
            .bind(options.queue.as_str())
            .bind(options.queue.priority())
            .bind(options.max_retries)
            .bind(options.not_before(Utc::now()))
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn dequeue(&self, lease: Duration) -> Result<Option<Task>, TaskError> {
        let query = format!(
            r#"
            UPDATE tasks SET state = 'active', lease_expires_at = $1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM tasks
                WHERE state = 'pending' AND not_before <= NOW()
                ORDER BY priority DESC, not_before, created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(lease_until(Utc::now(), lease))
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn complete(&self, leased: &Task) -> Result<(), TaskError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET state = 'completed', lease_expires_at = NULL, updated_at = NOW()
            WHERE id = $1 AND state = 'active' AND retried = $2
            "#,
        )
        .bind(leased.id)
        .bind(leased.retried)
        .execute(&self.pool)
        .await?;
        check_settled(result, leased)
    }

    async fn retry(&self, leased: &Task, run_at: DateTime<Utc>, error: &str) -> Result<(), TaskError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'pending', retried = retried + 1, not_before = $3,
                last_error = $4, lease_expires_at = NULL, updated_at = NOW()
            WHERE id = $1 AND state = 'active' AND retried = $2
            "#,
        )
        .bind(leased.id)
        .bind(leased.retried)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        check_settled(result, leased)
    }

    async fn kill(&self, leased: &Task, error: &str) -> Result<(), TaskError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'dead', last_error = $3, lease_expires_at = NULL, updated_at = NOW()
            WHERE id = $1 AND state = 'active' AND retried = $2
            "#,
        )
        .bind(leased.id)
        .bind(leased.retried)
        .bind(error)
        .execute(&self.pool)
        .await?;
        check_settled(result, leased)
    }

    async fn requeue(&self, id: Uuid) -> Result<bool, TaskError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET state = 'pending', lease_expires_at = NULL, updated_at = NOW()
            WHERE id = $1 AND state = 'active'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recover_expired_leases(&self) -> Result<u64, TaskError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = CASE WHEN retried < max_retries THEN 'pending' ELSE 'dead' END,
                retried = retried + 1,
                last_error = 'lease expired',
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE state = 'active' AND (lease_expires_at IS NULL OR lease_expires_at < NOW())
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_completed(&self, before: DateTime<Utc>) -> Result<u64, TaskError> {
        let result = sqlx::query("DELETE FROM tasks WHERE state = 'completed' AND updated_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_dead(&self, limit: i64) -> Result<Vec<Task>, TaskError> {
        let query = format!(
            "SELECT {} FROM tasks WHERE state = 'dead' ORDER BY updated_at DESC LIMIT $1",
            TASK_COLUMNS
        );
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, TaskError> {
        let query = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }
}
