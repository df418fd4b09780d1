//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{RenewedAccessToken, TokenPayload};
use crate::domain::{Account, OperationContext, Role, TransferParams, TransferResult, User};
use crate::error::{AppError, AppResult};
use crate::policy::{actions, PolicyRule};
use crate::tasks::{QueueClass, Task};
use crate::users::{NewUser, UserChanges};

use super::extractors::{
    validate_currency, validate_full_name, validate_username, ValidatedJson, ValidatedQuery,
};
use super::middleware::{auth_middleware, authorize, context_middleware, logging_middleware};
use super::AppState;

/// Policy objects for resources that are not addressed by name
const ACCOUNTS_OBJECT: &str = "accounts";
const TRANSFERS_OBJECT: &str = "transfers";
const POLICIES_OBJECT: &str = "policies";
const TASKS_OBJECT: &str = "tasks";

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(
        length(min = 3, max = 100),
        custom(function = "validate_username")
    )]
    pub username: String,
    #[validate(length(min = 8, max = 50))]
    pub password: String,
    #[validate(length(min = 3, max = 100), custom(function = "validate_full_name"))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub username: String,
    pub role: String,
    pub full_name: String,
    pub email: String,
    pub is_email_verified: bool,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            role: user.role,
            full_name: user.full_name,
            email: user.email,
            is_email_verified: user.is_email_verified,
            password_changed_at: user.password_changed_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 8, max = 50))]
    pub password: Option<String>,
    #[validate(length(min = 3, max = 100), custom(function = "validate_full_name"))]
    pub full_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginUserRequest {
    #[validate(
        length(min = 3, max = 100),
        custom(function = "validate_username")
    )]
    pub username: String,
    #[validate(length(min = 8, max = 50))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginUserResponse {
    pub session_id: Uuid,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeSessionResponse {
    pub session_id: Uuid,
    pub is_blocked: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyEmailQuery {
    #[validate(range(min = 1))]
    pub email_id: i64,
    #[validate(length(min = 32, max = 128))]
    pub secret_code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyEmailResponse {
    pub is_verified: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(custom(function = "validate_currency"))]
    pub currency: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListAccountsQuery {
    #[validate(range(min = 1))]
    pub page_id: i64,
    #[validate(range(min = 5, max = 10))]
    pub page_size: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TransferRequest {
    #[validate(range(min = 1))]
    pub from_account_id: i64,
    #[validate(range(min = 1))]
    pub to_account_id: i64,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[validate(custom(function = "validate_currency"))]
    pub currency: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PolicyRequest {
    #[validate(length(min = 1, max = 255))]
    pub subject: String,
    #[validate(length(min = 1, max = 255))]
    pub object: String,
    #[validate(length(min = 1, max = 255))]
    pub action: String,
}

impl From<PolicyRequest> for PolicyRule {
    fn from(req: PolicyRequest) -> Self {
        PolicyRule::new(req.subject, req.object, req.action)
    }
}

#[derive(Debug, Serialize)]
pub struct PolicyChangeResponse {
    pub changed: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DeadTasksQuery {
    #[serde(default = "default_dead_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: i64,
}

fn default_dead_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub task_type: String,
    pub queue: QueueClass,
    pub retried: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            task_type: task.task_type,
            queue: task.queue,
            retried: task.retried,
            max_retries: task.max_retries,
            last_error: task.last_error,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

// =========================================================================
// Router
// =========================================================================

/// Build the `/api/v1` router with its middleware stack
pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health_check))
        .route("/users", post(create_user))
        .route("/users/login", post(login_user))
        .route("/users/verify_email", get(verify_email))
        .route("/tokens/renew_access", post(renew_access_token));

    let protected = Router::new()
        .route("/users/:username", patch(update_user))
        .route("/tokens/revoke", post(revoke_session))
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/:id", get(get_account))
        .route("/transfers", post(create_transfer))
        .route(
            "/admin/policies",
            get(list_policies).post(add_policy).delete(remove_policy),
        )
        .route("/admin/tasks/dead", get(list_dead_tasks))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Layers run last-added first: context -> logging -> auth -> handler
    let api = public
        .merge(protected)
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), context_middleware));

    Router::new().nest("/api/v1", api).with_state(state)
}

// =========================================================================
// Health
// =========================================================================

async fn health_check() -> &'static str {
    "OK"
}

// =========================================================================
// Users
// =========================================================================

async fn create_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<OperationContext>,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let new_user = NewUser {
        username: req.username,
        password: req.password,
        full_name: req.full_name,
        email: req.email,
        // Sign-up always yields a depositor; bankers are provisioned out of band
        role: Role::Depositor,
    };

    let (user, events) = state.users.create_user(new_user, &ctx).await?;

    // The user row is committed; enqueue failures are logged, not returned
    state.distributor.dispatch_events(events).await;

    Ok((StatusCode::CREATED, Json(user.into())))
}

async fn login_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<OperationContext>,
    ValidatedJson(req): ValidatedJson<LoginUserRequest>,
) -> AppResult<Json<LoginUserResponse>> {
    let login = state.auth.login(&req.username, &req.password, &ctx).await?;

    Ok(Json(LoginUserResponse {
        session_id: login.session.id,
        access_token: login.access_token,
        access_token_expires_at: login.access_payload.expired_at,
        refresh_token: login.refresh_token,
        refresh_token_expires_at: login.refresh_payload.expired_at,
        user: login.user.into(),
    }))
}

async fn update_user(
    State(state): State<AppState>,
    Extension(caller): Extension<TokenPayload>,
    Extension(ctx): Extension<OperationContext>,
    Path(username): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    authorize(&state.policies, &caller, &username, actions::USERS_UPDATE)?;
    if caller.username != username {
        authorize(&state.policies, &caller, &username, actions::USERS_UPDATE_OTHERS)?;
    }

    let changes = UserChanges {
        password: req.password,
        full_name: req.full_name,
        email: req.email,
    };
    let user = state.users.update_user(&username, changes, &ctx).await?;

    Ok(Json(user.into()))
}

async fn verify_email(
    State(state): State<AppState>,
    Extension(ctx): Extension<OperationContext>,
    ValidatedQuery(query): ValidatedQuery<VerifyEmailQuery>,
) -> AppResult<Json<VerifyEmailResponse>> {
    let user = state
        .users
        .verify_email(query.email_id, &query.secret_code, &ctx)
        .await?;

    Ok(Json(VerifyEmailResponse {
        is_verified: user.is_email_verified,
    }))
}

// =========================================================================
// Tokens
// =========================================================================

async fn renew_access_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<OperationContext>,
    ValidatedJson(req): ValidatedJson<RefreshTokenRequest>,
) -> AppResult<Json<RenewedAccessToken>> {
    let renewed = state.auth.renew_access_token(&req.refresh_token, &ctx).await?;
    Ok(Json(renewed))
}

async fn revoke_session(
    State(state): State<AppState>,
    Extension(caller): Extension<TokenPayload>,
    Extension(ctx): Extension<OperationContext>,
    ValidatedJson(req): ValidatedJson<RefreshTokenRequest>,
) -> AppResult<Json<RevokeSessionResponse>> {
    let session = state
        .auth
        .revoke_session(&req.refresh_token, &caller.username, &ctx)
        .await?;

    Ok(Json(RevokeSessionResponse {
        session_id: session.id,
        is_blocked: session.is_blocked,
    }))
}

// =========================================================================
// Accounts
// =========================================================================

async fn create_account(
    State(state): State<AppState>,
    Extension(caller): Extension<TokenPayload>,
    Extension(ctx): Extension<OperationContext>,
    ValidatedJson(req): ValidatedJson<CreateAccountRequest>,
) -> AppResult<(StatusCode, Json<Account>)> {
    authorize(&state.policies, &caller, ACCOUNTS_OBJECT, actions::ACCOUNTS_CREATE)?;

    let account = state
        .ledger
        .create_account(&caller.username, &req.currency, &ctx)
        .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_account(
    State(state): State<AppState>,
    Extension(caller): Extension<TokenPayload>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<i64>,
) -> AppResult<Json<Account>> {
    authorize(&state.policies, &caller, ACCOUNTS_OBJECT, actions::ACCOUNTS_READ)?;
    if id < 1 {
        return Err(AppError::InvalidArgument("id must be at least 1".to_string()));
    }

    let account = state.ledger.get_account(id, &ctx).await?;
    if account.owner != caller.username {
        return Err(AppError::Unauthorized(
            "account doesn't belong to the authenticated user".to_string(),
        ));
    }

    Ok(Json(account))
}

async fn list_accounts(
    State(state): State<AppState>,
    Extension(caller): Extension<TokenPayload>,
    Extension(ctx): Extension<OperationContext>,
    ValidatedQuery(query): ValidatedQuery<ListAccountsQuery>,
) -> AppResult<Json<Vec<Account>>> {
    authorize(&state.policies, &caller, ACCOUNTS_OBJECT, actions::ACCOUNTS_LIST)?;

    let offset = (query.page_id - 1)
        .checked_mul(query.page_size)
        .ok_or_else(|| AppError::InvalidArgument("page_id is out of range".to_string()))?;
    let accounts = state
        .ledger
        .list_accounts(&caller.username, query.page_size, offset, &ctx)
        .await?;

    Ok(Json(accounts))
}

// =========================================================================
// Transfers
// =========================================================================

async fn create_transfer(
    State(state): State<AppState>,
    Extension(caller): Extension<TokenPayload>,
    Extension(ctx): Extension<OperationContext>,
    ValidatedJson(req): ValidatedJson<TransferRequest>,
) -> AppResult<Json<TransferResult>> {
    authorize(&state.policies, &caller, TRANSFERS_OBJECT, actions::TRANSFERS_CREATE)?;

    let from = valid_account(&state, req.from_account_id, &req.currency, &ctx).await?;
    if from.owner != caller.username {
        return Err(AppError::Unauthorized(
            "from account doesn't belong to the authenticated user".to_string(),
        ));
    }
    valid_account(&state, req.to_account_id, &req.currency, &ctx).await?;

    let params = TransferParams::new(req.from_account_id, req.to_account_id, req.amount)?
        .with_currency(req.currency);
    let result = state.ledger.transfer(&params, &ctx).await?;

    Ok(Json(result))
}

/// Load an account and check it holds `currency`
async fn valid_account(
    state: &AppState,
    id: i64,
    currency: &str,
    ctx: &OperationContext,
) -> AppResult<Account> {
    let account = state.ledger.get_account(id, ctx).await?;
    if account.currency != currency {
        return Err(AppError::InvalidArgument(format!(
            "account [{}] currency mismatch: {} vs {}",
            account.id, account.currency, currency
        )));
    }
    Ok(account)
}

// =========================================================================
// Administration
// =========================================================================

async fn list_policies(
    State(state): State<AppState>,
    Extension(caller): Extension<TokenPayload>,
) -> AppResult<Json<Vec<PolicyRule>>> {
    authorize(&state.policies, &caller, POLICIES_OBJECT, actions::POLICIES_MANAGE)?;
    Ok(Json(state.policies.rules()))
}

async fn add_policy(
    State(state): State<AppState>,
    Extension(caller): Extension<TokenPayload>,
    Extension(ctx): Extension<OperationContext>,
    ValidatedJson(req): ValidatedJson<PolicyRequest>,
) -> AppResult<Json<PolicyChangeResponse>> {
    authorize(&state.policies, &caller, POLICIES_OBJECT, actions::POLICIES_MANAGE)?;

    let rule = PolicyRule::from(req);
    let changed = ctx.run(state.policies.add_policy(rule.clone())).await??;
    tracing::info!(by = %caller.username, ?rule, changed, "Policy added");

    Ok(Json(PolicyChangeResponse { changed }))
}

async fn remove_policy(
    State(state): State<AppState>,
    Extension(caller): Extension<TokenPayload>,
    Extension(ctx): Extension<OperationContext>,
    ValidatedJson(req): ValidatedJson<PolicyRequest>,
) -> AppResult<Json<PolicyChangeResponse>> {
    authorize(&state.policies, &caller, POLICIES_OBJECT, actions::POLICIES_MANAGE)?;

    let rule = PolicyRule::from(req);
    let changed = ctx.run(state.policies.remove_policy(&rule)).await??;
    tracing::info!(by = %caller.username, ?rule, changed, "Policy removed");

    Ok(Json(PolicyChangeResponse { changed }))
}

async fn list_dead_tasks(
    State(state): State<AppState>,
    Extension(caller): Extension<TokenPayload>,
    Extension(ctx): Extension<OperationContext>,
    ValidatedQuery(query): ValidatedQuery<DeadTasksQuery>,
) -> AppResult<Json<Vec<TaskResponse>>> {
    authorize(&state.policies, &caller, TASKS_OBJECT, actions::TASKS_INSPECT)?;

    let tasks = ctx.run(state.tasks.list_dead(query.limit)).await??;
    Ok(Json(tasks.into_iter().map(TaskResponse::from).collect()))
}
