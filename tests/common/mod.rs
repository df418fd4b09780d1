//! Common test utilities
//!
//! Wires the router over in-memory stores so HTTP flows run without a database,
//! and connects to the test database for the Postgres store tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower::util::ServiceExt;

use banking_system::api::{create_router, AppState};
use banking_system::db;
use banking_system::domain::{OperationContext, Role};
use banking_system::auth::{AuthService, InMemorySessionStore, JwtMaker};
use banking_system::ledger::{InMemoryLedgerStore, LedgerService};
use banking_system::policy::{seed_policies, InMemoryPolicyAdapter, PolicyEngine};
use banking_system::tasks::{InMemoryTaskBroker, TaskDistributor};
use banking_system::users::{InMemoryUserStore, NewUser, UserService};

pub const TOKEN_KEY: &str = "0123456789abcdef0123456789abcdef";
pub const PASSWORD: &str = "secret-password";

/// Connect to `DATABASE_URL` and apply migrations.
///
/// `None` when no database is configured; Postgres tests return early then.
/// Tests never truncate shared tables, they work on rows they created.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    Some(pool)
}

/// A username no other test run will use
pub fn unique_username(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..12])
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub ledger_store: Arc<InMemoryLedgerStore>,
    pub broker: Arc<InMemoryTaskBroker>,
    pub sessions: Arc<InMemorySessionStore>,
}

/// Build an app with seeded policies and empty stores
pub async fn spawn_app() -> TestApp {
    let ledger_store = Arc::new(InMemoryLedgerStore::new());
    let user_store = Arc::new(InMemoryUserStore::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let broker = Arc::new(InMemoryTaskBroker::new());

    let policies = Arc::new(PolicyEngine::new(Arc::new(InMemoryPolicyAdapter::new())));
    seed_policies(&policies).await.unwrap();

    let auth = AuthService::new(
        user_store.clone(),
        sessions.clone(),
        Arc::new(JwtMaker::new(TOKEN_KEY).unwrap()),
        chrono::Duration::minutes(15),
        chrono::Duration::hours(24),
    );

    let state = AppState {
        ledger: Arc::new(LedgerService::new(ledger_store.clone())),
        users: Arc::new(UserService::new(user_store)),
        auth: Arc::new(auth),
        policies,
        distributor: TaskDistributor::new(broker.clone()),
        tasks: broker.clone(),
        request_timeout: Duration::from_secs(5),
        trust_forwarded_for: false,
    };

    TestApp {
        router: create_router(state.clone()),
        state,
        ledger_store,
        broker,
        sessions,
    }
}

impl TestApp {
    /// Send a request and decode the JSON body (Null when the body is not JSON)
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Depositors register through the API; bankers are provisioned on the
    /// service directly since sign-up cannot grant a role
    pub async fn create_user(&self, username: &str, role: &str) {
        if let Role::Banker = role.parse::<Role>().unwrap() {
            self.state
                .users
                .create_user(
                    NewUser {
                        username: username.to_string(),
                        password: PASSWORD.to_string(),
                        full_name: "Test User".to_string(),
                        email: format!("{}@example.com", username),
                        role: Role::Banker,
                    },
                    &OperationContext::new(),
                )
                .await
                .unwrap();
            return;
        }

        let (status, body) = self
            .send(
                "POST",
                "/api/v1/users",
                None,
                Some(json!({
                    "username": username,
                    "password": PASSWORD,
                    "full_name": "Test User",
                    "email": format!("{}@example.com", username),
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create {} failed: {}", username, body);
    }

    /// Log in and return the full login response
    pub async fn login(&self, username: &str) -> Value {
        let (status, body) = self
            .send(
                "POST",
                "/api/v1/users/login",
                None,
                Some(json!({ "username": username, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login {} failed: {}", username, body);
        body
    }

    /// Register and log in; returns the access token
    pub async fn user_with_token(&self, username: &str, role: &str) -> String {
        self.create_user(username, role).await;
        let login = self.login(username).await;
        login["access_token"].as_str().unwrap().to_string()
    }
}
