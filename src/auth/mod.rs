//! Authentication
//!
//! Token Service, Session Store and the renewal policy built on both.

mod password;
mod service;
mod session;
mod token;

pub use password::{check_password, check_password_async, hash_password, hash_password_async};
pub use service::{AuthService, LoginResult, RenewedAccessToken};
pub use session::{InMemorySessionStore, NewSession, PgSessionStore, Session, SessionStore};
pub use token::{JwtMaker, TokenError, TokenKind, TokenMaker, TokenPayload};
