//! Session Store
//!
//! One row per issued refresh token. Rows are never deleted; the only
//! mutation is blocking.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Session {
    /// Same as the refresh token payload id
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub is_blocked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: NewSession) -> Result<Session, StoreError>;

    /// `StoreError::NotFound` when no session has this id
    async fn get_session(&self, id: Uuid) -> Result<Session, StoreError>;

    /// Set `is_blocked`; `StoreError::NotFound` when no session has this id
    async fn block_session(&self, id: Uuid) -> Result<Session, StoreError>;
}

const SESSION_COLUMNS: &str =
    "id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at";

#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, session: NewSession) -> Result<Session, StoreError> {
        let query = format!(
            r#"
            INSERT INTO sessions (id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );
        let row = sqlx::query_as::<_, Session>(&query)
            .bind(session.id)
            .bind(&session.username)
            .bind(&session.refresh_token)
            .bind(&session.user_agent)
            .bind(&session.client_ip)
            .bind(session.expires_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, StoreError> {
        let query = format!("SELECT {} FROM sessions WHERE id = $1", SESSION_COLUMNS);
        let row = sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn block_session(&self, id: Uuid) -> Result<Session, StoreError> {
        let query = format!(
            "UPDATE sessions SET is_blocked = TRUE WHERE id = $1 RETURNING {}",
            SESSION_COLUMNS
        );
        let row = sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, session: NewSession) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!("session {} already exists", session.id)));
        }

        let row = Session {
            id: session.id,
            username: session.username,
            refresh_token: session.refresh_token,
            user_agent: session.user_agent,
            client_ip: session.client_ip,
            is_blocked: false,
            expires_at: session.expires_at,
            created_at: Utc::now(),
        };
        sessions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, StoreError> {
        self.sessions.read().get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn block_session(&self, id: Uuid) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        session.is_blocked = true;
        Ok(session.clone())
    }
}
