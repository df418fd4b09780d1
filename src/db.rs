//! Database module
//!
//! Connection pool, migrations and the persistence error type shared by
//! every store.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;
use crate::domain::DomainError;

/// Errors raised by any store implementation
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested row does not exist
    #[error("Record not found")]
    NotFound,

    /// Uniqueness or foreign-key constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization failure, deadlock or lock timeout; safe to retry the whole operation
    #[error("Transient store conflict: {0}")]
    Transient(String),

    /// A business rule rejected the operation inside the transaction
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// SQLSTATE codes that mark an aborted-but-retryable transaction
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// SQLSTATE codes for constraint violations
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => return StoreError::NotFound,
            sqlx::Error::PoolTimedOut => {
                return StoreError::Transient("connection pool timed out".to_string())
            }
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match &*code {
                        SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE => {
                            return StoreError::Transient(db_err.message().to_string())
                        }
                        UNIQUE_VIOLATION | FOREIGN_KEY_VIOLATION => {
                            return StoreError::Conflict(db_err.message().to_string())
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        StoreError::Database(err)
    }
}

/// Create the shared connection pool
pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
}

/// Apply pending migrations from `migrations/`
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrated successfully");
    Ok(())
}

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let required_tables = [
        "users",
        "accounts",
        "transfers",
        "entries",
        "sessions",
        "verify_emails",
        "policy_rules",
        "tasks",
    ];

    for table in required_tables {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
