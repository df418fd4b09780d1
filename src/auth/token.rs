//! Token Service
//!
//! Signed, time-bound credentials. Access tokens are stateless; refresh
//! tokens are additionally backed by a stored session.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MIN_TOKEN_KEY_LEN;

/// Which credential a token is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Verified token contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub id: Uuid,
    pub username: String,
    pub role: String,
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Token error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is invalid")]
    Invalid,

    #[error("token has expired")]
    Expired,

    #[error("token kind mismatch")]
    WrongKind,

    #[error("{0}")]
    KeyTooShort(String),

    #[error("failed to encode token: {0}")]
    Encoding(String),
}

/// Issues and verifies tokens
pub trait TokenMaker: Send + Sync {
    fn create_token(
        &self,
        username: &str,
        role: &str,
        duration: Duration,
        kind: TokenKind,
    ) -> Result<(String, TokenPayload), TokenError>;

    /// Fails on a bad signature, expiry or a kind other than `expected`.
    fn verify_token(&self, token: &str, expected: TokenKind) -> Result<TokenPayload, TokenError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    jti: Uuid,
    sub: String,
    role: String,
    kind: TokenKind,
    iat: i64,
    exp: i64,
}

/// HS256 JWT implementation
#[derive(Clone)]
pub struct JwtMaker {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtMaker {
    pub fn new(secret: &str) -> Result<Self, TokenError> {
        if secret.len() < MIN_TOKEN_KEY_LEN {
            return Err(TokenError::KeyTooShort(format!(
                "token key must be at least {} characters",
                MIN_TOKEN_KEY_LEN
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }
}

impl TokenMaker for JwtMaker {
    fn create_token(
        &self,
        username: &str,
        role: &str,
        duration: Duration,
        kind: TokenKind,
    ) -> Result<(String, TokenPayload), TokenError> {
        let now = Utc::now();
        let claims = Claims {
            jti: Uuid::new_v4(),
            sub: username.to_string(),
            role: role.to_string(),
            kind,
            iat: now.timestamp(),
            exp: (now + duration).timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;
        let payload = claims.into_payload()?;
        Ok((token, payload))
    }

    fn verify_token(&self, token: &str, expected: TokenKind) -> Result<TokenPayload, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        if data.claims.kind != expected {
            return Err(TokenError::WrongKind);
        }
        data.claims.into_payload()
    }
}

impl Claims {
    fn into_payload(self) -> Result<TokenPayload, TokenError> {
        let issued_at = DateTime::from_timestamp(self.iat, 0).ok_or(TokenError::Invalid)?;
        let expired_at = DateTime::from_timestamp(self.exp, 0).ok_or(TokenError::Invalid)?;
        Ok(TokenPayload {
            id: self.jti,
            username: self.sub,
            role: self.role,
            kind: self.kind,
            issued_at,
            expired_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_create_and_verify() {
        let maker = JwtMaker::new(KEY).unwrap();
        let (token, payload) = maker
            .create_token("alice", "depositor", Duration::minutes(1), TokenKind::Access)
            .unwrap();

        let verified = maker.verify_token(&token, TokenKind::Access).unwrap();
        assert_eq!(verified, payload);
        assert_eq!(verified.username, "alice");
        assert_eq!(verified.role, "depositor");
    }

    #[test]
    fn test_expired_token() {
        let maker = JwtMaker::new(KEY).unwrap();
        let (token, _) = maker
            .create_token("alice", "depositor", Duration::minutes(-1), TokenKind::Access)
            .unwrap();

        assert_eq!(maker.verify_token(&token, TokenKind::Access), Err(TokenError::Expired));
    }

    #[test]
    fn test_wrong_kind() {
        let maker = JwtMaker::new(KEY).unwrap();
        let (token, _) = maker
            .create_token("alice", "depositor", Duration::minutes(1), TokenKind::Refresh)
            .unwrap();

        assert_eq!(maker.verify_token(&token, TokenKind::Access), Err(TokenError::WrongKind));
        assert!(maker.verify_token(&token, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn test_foreign_signature() {
        let maker = JwtMaker::new(KEY).unwrap();
        let other = JwtMaker::new("fedcba9876543210fedcba9876543210").unwrap();
        let (token, _) = other
            .create_token("alice", "banker", Duration::minutes(1), TokenKind::Access)
            .unwrap();

        assert_eq!(maker.verify_token(&token, TokenKind::Access), Err(TokenError::Invalid));
        assert_eq!(maker.verify_token("not-a-token", TokenKind::Access), Err(TokenError::Invalid));
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(matches!(JwtMaker::new("short"), Err(TokenError::KeyTooShort(_))));
    }
}
