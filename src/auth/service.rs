//! Login, access token renewal and session revocation

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::StoreError;
use crate::domain::{OperationContext, User};
use crate::error::{AppError, AppResult};
use crate::users::UserStore;

use super::{check_password_async, NewSession, Session, SessionStore, TokenKind, TokenMaker, TokenPayload};

/// Everything a successful login hands back
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub session: Session,
    pub access_token: String,
    pub access_payload: TokenPayload,
    pub refresh_token: String,
    pub refresh_payload: TokenPayload,
    pub user: User,
}

/// A freshly issued access token
#[derive(Debug, Clone, Serialize)]
pub struct RenewedAccessToken {
    pub access_token: String,
    pub access_token_expires_at: chrono::DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    tokens: Arc<dyn TokenMaker>,
    access_token_duration: Duration,
    refresh_token_duration: Duration,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        tokens: Arc<dyn TokenMaker>,
        access_token_duration: Duration,
        refresh_token_duration: Duration,
    ) -> Self {
        Self {
            users,
            sessions,
            tokens,
            access_token_duration,
            refresh_token_duration,
        }
    }

    pub fn tokens(&self) -> &Arc<dyn TokenMaker> {
        &self.tokens
    }

    /// Check the password, issue both tokens and persist the session.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        context: &OperationContext,
    ) -> AppResult<LoginResult> {
        let user = context.run(self.users.get_user(username)).await??;
        check_password_async(password.to_string(), user.hashed_password.clone()).await?;

        let (access_token, access_payload) = self.tokens.create_token(
            &user.username,
            &user.role,
            self.access_token_duration,
            TokenKind::Access,
        )?;
        let (refresh_token, refresh_payload) = self.tokens.create_token(
            &user.username,
            &user.role,
            self.refresh_token_duration,
            TokenKind::Refresh,
        )?;

        let new_session = NewSession {
            id: refresh_payload.id,
            username: user.username.clone(),
            refresh_token: refresh_token.clone(),
            user_agent: context.user_agent.clone().unwrap_or_default(),
            client_ip: context
                .client_ip
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            expires_at: refresh_payload.expired_at,
        };
        let session = context.run(self.sessions.create_session(new_session)).await??;

        tracing::info!(username = %user.username, session_id = %session.id, "User logged in");

        Ok(LoginResult {
            session,
            access_token,
            access_payload,
            refresh_token,
            refresh_payload,
            user,
        })
    }

    /// Issue a new access token for a live, unblocked session.
    ///
    /// A refresh token that still verifies is refused when its session is
    /// missing, blocked, bound to another user, holds a different token or
    /// has expired.
    pub async fn renew_access_token(
        &self,
        refresh_token: &str,
        context: &OperationContext,
    ) -> AppResult<RenewedAccessToken> {
        let payload = self.tokens.verify_token(refresh_token, TokenKind::Refresh)?;
        let session = self.load_session(payload.id, context).await?;

        if session.is_blocked {
            return Err(AppError::Unauthorized("session is blocked".to_string()));
        }
        if session.username != payload.username {
            return Err(AppError::Unauthorized("session user mismatch".to_string()));
        }
        if session.refresh_token != refresh_token {
            return Err(AppError::Unauthorized("session token mismatch".to_string()));
        }
        if session.is_expired(Utc::now()) {
            return Err(AppError::Unauthorized("session has expired".to_string()));
        }

        let (access_token, access_payload) = self.tokens.create_token(
            &payload.username,
            &payload.role,
            self.access_token_duration,
            TokenKind::Access,
        )?;

        tracing::debug!(username = %payload.username, session_id = %session.id, "Access token renewed");
        Ok(RenewedAccessToken {
            access_token,
            access_token_expires_at: access_payload.expired_at,
        })
    }

    /// Block the session behind `refresh_token`. Only its owner may do so.
    pub async fn revoke_session(
        &self,
        refresh_token: &str,
        caller: &str,
        context: &OperationContext,
    ) -> AppResult<Session> {
        let payload = self.tokens.verify_token(refresh_token, TokenKind::Refresh)?;
        let session = self.load_session(payload.id, context).await?;
        if session.username != caller {
            return Err(AppError::Forbidden("session belongs to another user".to_string()));
        }

        let session = context.run(self.sessions.block_session(session.id)).await??;
        tracing::info!(username = %session.username, session_id = %session.id, "Session revoked");
        Ok(session)
    }

    async fn load_session(&self, id: Uuid, context: &OperationContext) -> AppResult<Session> {
        match context.run(self.sessions.get_session(id)).await? {
            Ok(session) => Ok(session),
            Err(StoreError::NotFound) => Err(AppError::Unauthorized("session not found".to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
