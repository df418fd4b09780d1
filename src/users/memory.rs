//! In-memory user store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::db::StoreError;
use crate::domain::{CreateUserParams, DomainError, UpdateUserParams, User, VerifyEmail};

use super::UserStore;

/// Lifetime of a verification link
const VERIFY_EMAIL_TTL_MINUTES: i64 = 15;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<String, User>,
    verify_emails: Vec<VerifyEmail>,
}

impl Tables {
    fn email_taken(&self, email: &str, except: &str) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && u.username != except)
    }
}

/// Users and verification records in one lock, so `verify_email_tx` is atomic
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    tables: Mutex<Tables>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create_user(&self, params: &CreateUserParams) -> Result<User, StoreError> {
        let mut tables = self.tables.lock();
        if tables.users.contains_key(&params.username) {
            return Err(StoreError::Conflict(format!(
                "username {} already exists",
                params.username
            )));
        }
        if tables.email_taken(&params.email, &params.username) {
            return Err(StoreError::Conflict(format!("email {} already exists", params.email)));
        }

        let user = User {
            username: params.username.clone(),
            role: params.role.to_string(),
            hashed_password: params.hashed_password.clone(),
            full_name: params.full_name.clone(),
            email: params.email.clone(),
            is_email_verified: false,
            password_changed_at: DateTime::<Utc>::MIN_UTC,
            created_at: Utc::now(),
        };
        tables.users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        self.tables
            .lock()
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| StoreError::Domain(DomainError::UserNotFound(username.to_string())))
    }

    async fn update_user(&self, params: &UpdateUserParams) -> Result<User, StoreError> {
        let mut tables = self.tables.lock();
        if let Some(email) = params.email.as_deref() {
            if tables.email_taken(email, &params.username) {
                return Err(StoreError::Conflict(format!("email {} already exists", email)));
            }
        }

        let user = tables
            .users
            .get_mut(&params.username)
            .ok_or_else(|| StoreError::Domain(DomainError::UserNotFound(params.username.clone())))?;
        if let Some(hashed_password) = &params.hashed_password {
            user.hashed_password = hashed_password.clone();
        }
        if let Some(changed_at) = params.password_changed_at {
            user.password_changed_at = changed_at;
        }
        if let Some(full_name) = &params.full_name {
            user.full_name = full_name.clone();
        }
        if let Some(email) = &params.email {
            user.email = email.clone();
        }
        Ok(user.clone())
    }

    async fn create_verify_email(
        &self,
        username: &str,
        email: &str,
        secret_code: &str,
    ) -> Result<VerifyEmail, StoreError> {
        let mut tables = self.tables.lock();
        if !tables.users.contains_key(username) {
            return Err(StoreError::Conflict(format!(
                "verify email references unknown user {}",
                username
            )));
        }

        let now = Utc::now();
        let record = VerifyEmail {
            id: tables.verify_emails.len() as i64 + 1,
            username: username.to_string(),
            email: email.to_string(),
            secret_code: secret_code.to_string(),
            is_used: false,
            created_at: now,
            expired_at: now + Duration::minutes(VERIFY_EMAIL_TTL_MINUTES),
        };
        tables.verify_emails.push(record.clone());
        Ok(record)
    }

    async fn verify_email_tx(
        &self,
        email_id: i64,
        secret_code: &str,
    ) -> Result<(User, VerifyEmail), StoreError> {
        let mut tables = self.tables.lock();
        let now = Utc::now();

        let record = tables
            .verify_emails
            .iter_mut()
            .find(|r| {
                r.id == email_id && r.secret_code == secret_code && !r.is_used && r.expired_at > now
            })
            .ok_or(StoreError::NotFound)?;
        record.is_used = true;
        let record = record.clone();

        let user = tables
            .users
            .get_mut(&record.username)
            .ok_or_else(|| StoreError::Domain(DomainError::UserNotFound(record.username.clone())))?;
        user.is_email_verified = true;
        Ok((user.clone(), record))
    }
}
