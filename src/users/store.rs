//! User persistence port

use async_trait::async_trait;

use crate::db::StoreError;
use crate::domain::{CreateUserParams, UpdateUserParams, User, VerifyEmail};

#[async_trait]
pub trait UserStore: Send + Sync {
    /// `StoreError::Conflict` on a duplicate username or email
    async fn create_user(&self, params: &CreateUserParams) -> Result<User, StoreError>;

    /// `DomainError::UserNotFound` when absent
    async fn get_user(&self, username: &str) -> Result<User, StoreError>;

    /// Apply the fields that are set; `DomainError::UserNotFound` when absent
    async fn update_user(&self, params: &UpdateUserParams) -> Result<User, StoreError>;

    async fn create_verify_email(
        &self,
        username: &str,
        email: &str,
        secret_code: &str,
    ) -> Result<VerifyEmail, StoreError>;

    /// In one transaction, mark the record used and the user's email
    /// verified. `StoreError::NotFound` unless the record exists, matches
    /// `secret_code`, is unused and has not expired.
    async fn verify_email_tx(
        &self,
        email_id: i64,
        secret_code: &str,
    ) -> Result<(User, VerifyEmail), StoreError>;
}
