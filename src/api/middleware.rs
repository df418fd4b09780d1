//! API Middleware
//!
//! Request context, bearer authentication, authorization and request logging.

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::{TokenKind, TokenPayload};
use crate::domain::OperationContext;
use crate::error::{AppError, AppResult};
use crate::policy::{PolicyEngine, Subject};

use super::AppState;

const CORRELATION_ID_HEADER: &str = "x-correlation-id";
const AUTHORIZATION_TYPE_BEARER: &str = "bearer";

// =========================================================================
// Request context
// =========================================================================

/// Attach an `OperationContext` carrying the correlation id, caller
/// metadata and the request deadline.
pub async fn context_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let headers = request.headers();

    let correlation_id = headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let mut context = OperationContext::new()
        .with_correlation_id(correlation_id)
        .with_timeout(state.request_timeout);

    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>();
    if let Some(ip) = client_ip(headers, peer, state.trust_forwarded_for) {
        context = context.with_client_ip(ip);
    }
    if let Some(agent) = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
        context = context.with_user_agent(agent);
    }

    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

/// The peer address, or the first `X-Forwarded-For` hop when the proxy in
/// front is trusted to set it
fn client_ip(
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
    trust_forwarded_for: bool,
) -> Option<IpAddr> {
    let forwarded = || {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse().ok())
    };

    let peer = peer.map(|ConnectInfo(addr)| addr.ip());
    if trust_forwarded_for {
        forwarded().or(peer)
    } else {
        peer
    }
}

// =========================================================================
// Bearer authentication
// =========================================================================

/// Verify the `Authorization: Bearer <access token>` header and store the
/// token payload in request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let payload = authenticate(&state, request.headers())?;
    request.extensions_mut().insert(payload);
    Ok(next.run(request).await)
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<TokenPayload> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("authorization header is not provided".to_string()))?;

    let mut fields = value.split_whitespace();
    let (kind, token) = match (fields.next(), fields.next(), fields.next()) {
        (Some(kind), Some(token), None) => (kind, token),
        _ => {
            return Err(AppError::Unauthorized(
                "invalid authorization header format".to_string(),
            ))
        }
    };

    if !kind.eq_ignore_ascii_case(AUTHORIZATION_TYPE_BEARER) {
        return Err(AppError::Unauthorized(format!(
            "unsupported authorization type {}",
            kind
        )));
    }

    Ok(state.auth.tokens().verify_token(token, TokenKind::Access)?)
}

// =========================================================================
// Authorization
// =========================================================================

/// Ask the policy engine whether the token holder may perform `action`
/// on `object`.
pub fn authorize(
    policies: &PolicyEngine,
    caller: &TokenPayload,
    object: &str,
    action: &str,
) -> AppResult<()> {
    let subject = Subject::new(&caller.username, &caller.role);
    if policies.enforce(&subject, object, action)? {
        return Ok(());
    }

    tracing::debug!(
        username = %caller.username,
        role = %caller.role,
        object,
        action,
        "Permission denied"
    );
    Err(AppError::Forbidden("permission denied".to_string()))
}

// =========================================================================
// Request logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());

    let correlation_id = request
        .extensions()
        .get::<OperationContext>()
        .and_then(|ctx| ctx.correlation_id);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}
