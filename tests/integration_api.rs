//! API Integration Tests

use axum::http::StatusCode;
use serde_json::json;

use banking_system::tasks::{TaskState, TASK_SEND_VERIFY_EMAIL};

mod common;

#[tokio::test]
async fn test_health() {
    let app = common::spawn_app().await;
    let (status, _) = app.send("GET", "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_create_user_enqueues_verification_email() {
    let app = common::spawn_app().await;
    app.create_user("alice", "depositor").await;

    let tasks = app.broker.snapshot();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_type, TASK_SEND_VERIFY_EMAIL);
    assert_eq!(tasks[0].state, TaskState::Pending);

    // Same username again
    let (status, body) = app
        .send(
            "POST",
            "/api/v1/users",
            None,
            Some(json!({
                "username": "alice",
                "password": common::PASSWORD,
                "full_name": "Other Alice",
                "email": "other@example.com",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);
    assert_eq!(app.broker.snapshot().len(), 1);
}

#[tokio::test]
async fn test_create_user_validation() {
    let app = common::spawn_app().await;
    let (status, body) = app
        .send(
            "POST",
            "/api/v1/users",
            None,
            Some(json!({
                "username": "Bad-Name",
                "password": "short",
                "full_name": "Alice",
                "email": "not-an-email",
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "validation_failed");
    let fields: Vec<&str> = body["violations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"username"));
    assert!(fields.contains(&"password"));
    assert!(fields.contains(&"email"));
    assert!(!fields.contains(&"full_name"));
}

#[tokio::test]
async fn test_sign_up_cannot_choose_a_role() {
    let app = common::spawn_app().await;
    let (status, body) = app
        .send(
            "POST",
            "/api/v1/users",
            None,
            Some(json!({
                "username": "mallory",
                "password": common::PASSWORD,
                "full_name": "Mallory",
                "email": "mallory@example.com",
                "role": "banker",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["role"], "depositor");

    let login = app.login("mallory").await;
    let token = login["access_token"].as_str().unwrap();
    let (status, _) = app
        .send(
            "POST",
            "/api/v1/admin/policies",
            Some(token),
            Some(json!({ "subject": "mallory", "object": "*", "action": "anything" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_role_names_are_not_valid_usernames() {
    let app = common::spawn_app().await;
    for username in ["banker", "depositor"] {
        let (status, body) = app
            .send(
                "POST",
                "/api/v1/users",
                None,
                Some(json!({
                    "username": username,
                    "password": common::PASSWORD,
                    "full_name": "Role Squatter",
                    "email": format!("{}@example.com", username),
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(body["violations"][0]["field"], "username");
    }
    assert!(app.broker.snapshot().is_empty());
}

#[tokio::test]
async fn test_login_wrong_password_and_unknown_user() {
    let app = common::spawn_app().await;
    app.create_user("alice", "depositor").await;

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/users/login",
            None,
            Some(json!({ "username": "alice", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/users/login",
            None,
            Some(json!({ "username": "nobody", "password": common::PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_authorization_header_is_required() {
    let app = common::spawn_app().await;

    let (status, _) = app.send("GET", "/api/v1/accounts/1", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = axum::http::Request::builder()
        .uri("/api/v1/accounts/1")
        .header("authorization", "Basic abc")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send("GET", "/api/v1/accounts/1", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_accounts_are_owner_scoped() {
    let app = common::spawn_app().await;
    let alice = app.user_with_token("alice", "depositor").await;
    let bob = app.user_with_token("bob", "depositor").await;

    let (status, account) = app
        .send("POST", "/api/v1/accounts", Some(&alice), Some(json!({ "currency": "USD" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(account["owner"], "alice");
    assert_eq!(account["balance"], 0);
    let id = account["id"].as_i64().unwrap();

    let (status, _) = app
        .send("POST", "/api/v1/accounts", Some(&alice), Some(json!({ "currency": "USD" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send("POST", "/api/v1/accounts", Some(&alice), Some(json!({ "currency": "XYZ" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/api/v1/accounts/{}", id);
    let (status, _) = app.send("GET", &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send("GET", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.send("GET", "/api/v1/accounts/9999", Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_accounts_pagination() {
    let app = common::spawn_app().await;
    let alice = app.user_with_token("alice", "depositor").await;
    for currency in ["USD", "EUR", "CAD"] {
        app.send("POST", "/api/v1/accounts", Some(&alice), Some(json!({ "currency": currency })))
            .await;
    }

    let (status, body) = app
        .send("GET", "/api/v1/accounts?page_id=1&page_size=5", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, body) = app
        .send("GET", "/api/v1/accounts?page_id=2&page_size=5", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = app
        .send("GET", "/api/v1/accounts?page_id=0&page_size=20", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["violations"].as_array().unwrap().len(), 2);

    // Offset would not fit in an i64
    let (status, body) = app
        .send(
            "GET",
            &format!("/api/v1/accounts?page_id={}&page_size=10", i64::MAX),
            Some(&alice),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "invalid_argument");
}

#[tokio::test]
async fn test_transfer_e2e() {
    let app = common::spawn_app().await;
    let alice = app.user_with_token("alice", "depositor").await;
    app.create_user("bob", "depositor").await;

    let from = app
        .ledger_store
        .insert_account_with_balance("alice", "USD", 100)
        .unwrap();
    let to = app
        .ledger_store
        .insert_account_with_balance("bob", "USD", 0)
        .unwrap();
    let bob_eur = app
        .ledger_store
        .insert_account_with_balance("bob", "EUR", 0)
        .unwrap();

    let transfer = |from_id: i64, to_id: i64, amount: i64, currency: &str| {
        json!({
            "from_account_id": from_id,
            "to_account_id": to_id,
            "amount": amount,
            "currency": currency,
        })
    };

    let (status, body) = app
        .send("POST", "/api/v1/transfers", Some(&alice), Some(transfer(from.id, to.id, 30, "USD")))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["from_account"]["balance"], 70);
    assert_eq!(body["to_account"]["balance"], 30);
    assert_eq!(body["from_entry"]["amount"], -30);
    assert_eq!(body["to_entry"]["amount"], 30);

    // More than the balance
    let (status, body) = app
        .send("POST", "/api/v1/transfers", Some(&alice), Some(transfer(from.id, to.id, 71, "USD")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "insufficient_funds");

    // Source owned by someone else
    let (status, _) = app
        .send("POST", "/api/v1/transfers", Some(&alice), Some(transfer(to.id, from.id, 1, "USD")))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Destination holds another currency
    let (status, _) = app
        .send(
            "POST",
            "/api/v1/transfers",
            Some(&alice),
            Some(transfer(from.id, bob_eur.id, 1, "USD")),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Zero amount never reaches the ledger
    let (status, _) = app
        .send("POST", "/api/v1/transfers", Some(&alice), Some(transfer(from.id, to.id, 0, "USD")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, account) = app
        .send("GET", &format!("/api/v1/accounts/{}", from.id), Some(&alice), None)
        .await;
    assert_eq!(account["balance"], 70);
}

#[tokio::test]
async fn test_update_user_self_and_others() {
    let app = common::spawn_app().await;
    let alice = app.user_with_token("alice", "depositor").await;
    let banker = app.user_with_token("boss", "banker").await;

    let (status, body) = app
        .send(
            "PATCH",
            "/api/v1/users/alice",
            Some(&alice),
            Some(json!({ "full_name": "Alice Liddell" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["full_name"], "Alice Liddell");

    let (status, _) = app
        .send(
            "PATCH",
            "/api/v1/users/boss",
            Some(&alice),
            Some(json!({ "full_name": "Mallory" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(
            "PATCH",
            "/api/v1/users/alice",
            Some(&banker),
            Some(json!({ "email": "alice@bank.test" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "alice@bank.test");

    let (status, _) = app
        .send("PATCH", "/api/v1/users/alice", Some(&alice), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_renew_access_token_and_revoke() {
    let app = common::spawn_app().await;
    app.create_user("alice", "depositor").await;
    let login = app.login("alice").await;
    let access = login["access_token"].as_str().unwrap().to_string();
    let refresh = login["refresh_token"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            "POST",
            "/api/v1/tokens/renew_access",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let renewed = body["access_token"].as_str().unwrap();
    let (status, _) = app
        .send("GET", "/api/v1/accounts?page_id=1&page_size=5", Some(renewed), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    // An access token is not accepted as a refresh token
    let (status, _) = app
        .send(
            "POST",
            "/api/v1/tokens/renew_access",
            None,
            Some(json!({ "refresh_token": access })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(
            "POST",
            "/api/v1/tokens/revoke",
            Some(&access),
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_blocked"], true);

    // The refresh token still verifies, but its session is blocked
    let (status, _) = app
        .send(
            "POST",
            "/api/v1/tokens/renew_access",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revoke_someone_elses_session_is_forbidden() {
    let app = common::spawn_app().await;
    let alice = app.user_with_token("alice", "depositor").await;
    app.create_user("bob", "depositor").await;
    let bob_login = app.login("bob").await;

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/tokens/revoke",
            Some(&alice),
            Some(json!({ "refresh_token": bob_login["refresh_token"] })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_policy_changes_apply_to_next_request() {
    let app = common::spawn_app().await;
    let alice = app.user_with_token("alice", "depositor").await;
    let banker = app.user_with_token("boss", "banker").await;

    let rule = json!({ "subject": "depositor", "object": "*", "action": "accounts:create" });

    let (status, _) = app
        .send("POST", "/api/v1/admin/policies", Some(&alice), Some(rule.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send("DELETE", "/api/v1/admin/policies", Some(&banker), Some(rule.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    let (status, _) = app
        .send("POST", "/api/v1/accounts", Some(&alice), Some(json!({ "currency": "USD" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send("POST", "/api/v1/admin/policies", Some(&banker), Some(rule.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    let (_, body) = app
        .send("POST", "/api/v1/admin/policies", Some(&banker), Some(rule))
        .await;
    assert_eq!(body["changed"], false);

    let (status, _) = app
        .send("POST", "/api/v1/accounts", Some(&alice), Some(json!({ "currency": "USD" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_dead_letter_inspection_requires_permission() {
    let app = common::spawn_app().await;
    let alice = app.user_with_token("alice", "depositor").await;
    let banker = app.user_with_token("boss", "banker").await;

    let (status, _) = app
        .send("GET", "/api/v1/admin/tasks/dead", Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send("GET", "/api/v1/admin/tasks/dead?limit=10", Some(&banker), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_verify_email_rejects_unknown_link() {
    let app = common::spawn_app().await;
    let code = "a".repeat(32);

    let (status, _) = app
        .send(
            "GET",
            &format!("/api/v1/users/verify_email?email_id=1&secret_code={}", code),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(
            "GET",
            "/api/v1/users/verify_email?email_id=1&secret_code=short",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_correlation_id_is_echoed() {
    let app = common::spawn_app().await;
    let id = uuid::Uuid::new_v4().to_string();

    let request = axum::http::Request::builder()
        .uri("/api/v1/health")
        .header("x-correlation-id", &id)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();

    assert_eq!(response.headers()["x-correlation-id"], id.as_str());
}
