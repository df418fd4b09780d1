//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::tasks::{RetryPolicy, RetryStrategy};

/// Minimum length of the token signing key
pub const MIN_TOKEN_KEY_LEN: usize = 32;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Origins allowed by CORS; empty allows any origin
    pub allowed_origins: Vec<String>,

    /// Symmetric key used to sign tokens
    pub token_symmetric_key: String,

    pub access_token_duration: Duration,
    pub refresh_token_duration: Duration,

    /// Deadline applied to every request
    pub request_timeout: Duration,

    /// Number of task consumers
    pub worker_concurrency: usize,

    /// Backoff schedule for failed tasks
    pub task_retry: RetryPolicy,

    /// How long to wait for in-flight tasks on shutdown
    pub shutdown_timeout: Duration,

    /// Base URL used in verification links
    pub frontend_domain: String,

    pub email_sender_name: String,
    pub email_sender_address: String,

    /// Emit JSON logs instead of the human-readable format
    pub log_json: bool,

    /// Take the client address from `X-Forwarded-For`; only safe behind a
    /// proxy that overwrites the header
    pub trust_forwarded_for: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let token_symmetric_key = env::var("TOKEN_SYMMETRIC_KEY")
            .map_err(|_| ConfigError::MissingEnv("TOKEN_SYMMETRIC_KEY"))?;
        if token_symmetric_key.len() < MIN_TOKEN_KEY_LEN {
            return Err(ConfigError::InvalidValue("TOKEN_SYMMETRIC_KEY"));
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        let task_retry = RetryPolicy {
            strategy: env::var("TASK_RETRY_STRATEGY")
                .unwrap_or_else(|_| "exponential".to_string())
                .parse::<RetryStrategy>()
                .map_err(|_| ConfigError::InvalidValue("TASK_RETRY_STRATEGY"))?,
            base: Duration::from_millis(parse_env("TASK_RETRY_BASE_MS", 1_000)?),
            max: Duration::from_millis(parse_env("TASK_RETRY_MAX_MS", 600_000)?),
        };

        Ok(Self {
            database_url,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("PORT", 8080)?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            allowed_origins,
            token_symmetric_key,
            access_token_duration: Duration::from_secs(parse_env("ACCESS_TOKEN_DURATION_SECS", 900)?),
            refresh_token_duration: Duration::from_secs(parse_env(
                "REFRESH_TOKEN_DURATION_SECS",
                86_400,
            )?),
            request_timeout: Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", 30)?),
            worker_concurrency: parse_env("WORKER_CONCURRENCY", 4)?,
            task_retry,
            shutdown_timeout: Duration::from_secs(parse_env("SHUTDOWN_TIMEOUT_SECS", 10)?),
            frontend_domain: env::var("FRONTEND_DOMAIN")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            email_sender_name: env::var("EMAIL_SENDER_NAME")
                .unwrap_or_else(|_| "Banking System".to_string()),
            email_sender_address: env::var("EMAIL_SENDER_ADDRESS")
                .unwrap_or_else(|_| "no-reply@localhost".to_string()),
            log_json: env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false),
            trust_forwarded_for: parse_env("TRUST_FORWARDED_FOR", false)?,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Read an optional variable, falling back to `default` when unset
fn parse_env<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated list, dropping empty items
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
