//! User operations
//!
//! Mutations return the post-commit events they produced instead of firing
//! side effects; the caller hands them to the task distributor.

use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::auth::hash_password_async;
use crate::db::StoreError;
use crate::domain::{
    is_reserved_username, CreateUserParams, OperationContext, PostCommitEvent, Role,
    UpdateUserParams, User, VerifyEmail,
};
use crate::error::{AppError, AppResult};

use super::UserStore;

/// Length of the random code embedded in verification links
pub const SECRET_CODE_LEN: usize = 32;

/// Plain-text input for `UserService::create_user`
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
}

/// Plain-text input for `UserService::update_user`
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub password: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.full_name.is_none() && self.email.is_none()
    }
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Insert a user and report `UserCreated` for post-commit dispatch.
    pub async fn create_user(
        &self,
        new_user: NewUser,
        context: &OperationContext,
    ) -> AppResult<(User, Vec<PostCommitEvent>)> {
        if is_reserved_username(&new_user.username) {
            return Err(AppError::InvalidArgument(format!(
                "username '{}' is reserved",
                new_user.username
            )));
        }

        let hashed_password = hash_password_async(new_user.password).await?;
        let params = CreateUserParams {
            username: new_user.username,
            role: new_user.role,
            hashed_password,
            full_name: new_user.full_name,
            email: new_user.email,
        };

        let user = context.run(self.store.create_user(&params)).await??;
        tracing::info!(username = %user.username, role = %user.role, "User created");

        let events = vec![PostCommitEvent::UserCreated {
            username: user.username.clone(),
        }];
        Ok((user, events))
    }

    pub async fn get_user(&self, username: &str, context: &OperationContext) -> AppResult<User> {
        let user = context.run(self.store.get_user(username)).await??;
        Ok(user)
    }

    /// Apply `changes`; a password change also resets `password_changed_at`.
    pub async fn update_user(
        &self,
        username: &str,
        changes: UserChanges,
        context: &OperationContext,
    ) -> AppResult<User> {
        if changes.is_empty() {
            return Err(AppError::InvalidArgument(
                "at least one of password, full_name or email is required".to_string(),
            ));
        }

        let mut params = UpdateUserParams {
            username: username.to_string(),
            full_name: changes.full_name,
            email: changes.email,
            ..Default::default()
        };
        if let Some(password) = changes.password {
            params.hashed_password = Some(hash_password_async(password).await?);
            params.password_changed_at = Some(Utc::now());
        }

        let user = context.run(self.store.update_user(&params)).await??;
        tracing::info!(username = %user.username, "User updated");
        Ok(user)
    }

    /// Create a fresh verification record for `username`
    pub async fn issue_verify_email(&self, username: &str) -> AppResult<(User, VerifyEmail)> {
        let user = self.store.get_user(username).await?;
        let record = self
            .store
            .create_verify_email(&user.username, &user.email, &random_secret_code())
            .await?;
        Ok((user, record))
    }

    /// Consume a verification link
    pub async fn verify_email(
        &self,
        email_id: i64,
        secret_code: &str,
        context: &OperationContext,
    ) -> AppResult<User> {
        let (user, _) = context
            .run(self.store.verify_email_tx(email_id, secret_code))
            .await?
            .map_err(|e| match e {
                StoreError::NotFound => {
                    AppError::NotFound("verification link is invalid, used or expired".to_string())
                }
                other => AppError::from(other),
            })?;

        tracing::info!(username = %user.username, email_id, "Email verified");
        Ok(user)
    }
}

fn random_secret_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_CODE_LEN)
        .map(char::from)
        .collect()
}
