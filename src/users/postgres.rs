//! PostgreSQL user store

use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::StoreError;
use crate::domain::{CreateUserParams, DomainError, UpdateUserParams, User, VerifyEmail};

use super::UserStore;

const USER_COLUMNS: &str =
    "username, role, hashed_password, full_name, email, is_email_verified, password_changed_at, created_at";

const VERIFY_EMAIL_COLUMNS: &str =
    "id, username, email, secret_code, is_used, created_at, expired_at";

#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, params: &CreateUserParams) -> Result<User, StoreError> {
        let query = format!(
            r#"
            INSERT INTO users (username, role, hashed_password, full_name, email)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(&params.username)
            .bind(params.role.as_str())
            .bind(&params.hashed_password)
            .bind(&params.full_name)
            .bind(&params.email)
            .fetch_one(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        let query = format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS);
        sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::Domain(DomainError::UserNotFound(username.to_string())))
    }

    async fn update_user(&self, params: &UpdateUserParams) -> Result<User, StoreError> {
        let query = format!(
            r#"
            UPDATE users SET
                hashed_password = COALESCE($2, hashed_password),
                password_changed_at = COALESCE($3, password_changed_at),
                full_name = COALESCE($4, full_name),
                email = COALESCE($5, email)
            WHERE username = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        sqlx::query_as::<_, User>(&query)
            .bind(&params.username)
            .bind(params.hashed_password.as_deref())
            .bind(params.password_changed_at)
            .bind(params.full_name.as_deref())
            .bind(params.email.as_deref())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::Domain(DomainError::UserNotFound(params.username.clone())))
    }

    async fn create_verify_email(
        &self,
        username: &str,
        email: &str,
        secret_code: &str,
    ) -> Result<VerifyEmail, StoreError> {
        let query = format!(
            r#"
            INSERT INTO verify_emails (username, email, secret_code)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            VERIFY_EMAIL_COLUMNS
        );
        let record = sqlx::query_as::<_, VerifyEmail>(&query)
            .bind(username)
            .bind(email)
            .bind(secret_code)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    async fn verify_email_tx(
        &self,
        email_id: i64,
        secret_code: &str,
    ) -> Result<(User, VerifyEmail), StoreError> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            r#"
            UPDATE verify_emails SET is_used = TRUE
            WHERE id = $1 AND secret_code = $2 AND is_used = FALSE AND expired_at > NOW()
            RETURNING {}
            "#,
            VERIFY_EMAIL_COLUMNS
        );
        let record = sqlx::query_as::<_, VerifyEmail>(&query)
            .bind(email_id)
            .bind(secret_code)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;

        let query = format!(
            "UPDATE users SET is_email_verified = TRUE WHERE username = $1 RETURNING {}",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(&record.username)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((user, record))
    }
}
