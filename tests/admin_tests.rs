// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Admin dashboard: PIN login, bootstrap, admin management, user blocking.

use axum::http::StatusCode;
use projecthub::config::IdentityCarrier;
use projecthub::db::CredentialStore;
use serde_json::{json, Value};

mod common;

use common::{
    admin_cookie, body_json, cookie_pair, create_test_app, create_test_app_for, empty_request,
    json_request, send,
};

async fn user_id_by_email(app: &axum::Router, admin: &str, email: &str) -> String {
    let response = send(app, empty_request("GET", "/api/admin/users", Some(admin))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let users: Vec<Value> = serde_json::from_value(body_json(response).await).unwrap();
    users
        .iter()
        .find(|u| u["email"] == email)
        .and_then(|u| u["id"].as_str())
        .expect("user listed")
        .to_string()
}

#[tokio::test]
async fn test_admin_pin_login_and_list() {
    let (app, state) = create_test_app();
    state.auth.create_admin("131313", "adminpass").await.unwrap();

    let response = send(
        &app,
        json_request(
            "POST",
            "/api/admin/login",
            json!({ "username": "131313", "password": "adminpass" }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = cookie_pair(&response, "connect.sid").expect("admin cookie");
    assert_eq!(body_json(response).await, json!({ "success": true }));

    let response = send(&app, empty_request("GET", "/api/admin/list", Some(&cookie))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let admins = body_json(response).await;
    assert_eq!(admins.as_array().unwrap().len(), 1);
    assert_eq!(admins[0]["pin"], "131313");
    assert!(admins[0].get("passwordHash").is_none());

    let response = send(&app, empty_request("GET", "/api/admin/session", Some(&cookie))).await;
    assert_eq!(
        body_json(response).await,
        json!({ "isAdminLoggedIn": true })
    );
}

#[tokio::test]
async fn test_admin_login_wrong_password() {
    let (app, state) = create_test_app();
    state.auth.create_admin("131313", "adminpass").await.unwrap();

    for body in [
        json!({ "username": "131313", "password": "wrong" }),
        json!({ "username": "999999", "password": "adminpass" }),
    ] {
        let response = send(&app, json_request("POST", "/api/admin/login", body, None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(cookie_pair(&response, "connect.sid").is_none());
        assert_eq!(body_json(response).await["message"], "Invalid PIN or password");
    }
}

#[tokio::test]
async fn test_admin_routes_require_admin_session() {
    let (app, _) = create_test_app();

    let response = send(&app, empty_request("GET", "/api/admin/list", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A user session is not an admin session
    let user = common::register(&app, "alice@example.com", "secret1").await;
    let response = send(&app, empty_request("GET", "/api/admin/users", Some(&user))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&app, empty_request("GET", "/api/admin/session", Some(&user))).await;
    assert_eq!(
        body_json(response).await,
        json!({ "isAdminLoggedIn": false })
    );
}

#[tokio::test]
async fn test_admin_session_does_not_authenticate_user_routes() {
    let (app, state) = create_test_app();
    let admin = admin_cookie(&app, &state, "131313", "adminpass").await;

    let response = send(&app, empty_request("GET", "/api/auth/me", Some(&admin))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_user_endpoints_leave_admin_session_alone() {
    for carrier in [IdentityCarrier::Session, IdentityCarrier::Token] {
        let (app, state) = create_test_app_for(carrier);
        let admin = admin_cookie(&app, &state, "131313", "adminpass").await;

        let response = send(&app, empty_request("GET", "/api/auth/me", Some(&admin))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(cookie_pair(&response, "connect.sid").is_none(), "{carrier:?}");

        let response = send(&app, empty_request("POST", "/api/auth/logout", Some(&admin))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(cookie_pair(&response, "connect.sid").is_none(), "{carrier:?}");

        let response = send(&app, empty_request("GET", "/api/admin/session", Some(&admin))).await;
        assert_eq!(body_json(response).await["isAdminLoggedIn"], true);
        let response = send(&app, empty_request("GET", "/api/admin/list", Some(&admin))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_bootstrap_admin_creation() {
    let (app, _) = create_test_app();

    let response = send(
        &app,
        json_request(
            "POST",
            "/api/admin/create",
            json!({ "pin": "424242", "password": "bootstrap1" }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Once an admin exists, creation needs an admin session
    let response = send(
        &app,
        json_request(
            "POST",
            "/api/admin/create",
            json!({ "pin": "515151", "password": "intruder1" }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &app,
        json_request(
            "POST",
            "/api/admin/login",
            json!({ "username": "424242", "password": "bootstrap1" }),
            None,
        ),
    )
    .await;
    let cookie = cookie_pair(&response, "connect.sid").unwrap();

    let response = send(
        &app,
        json_request(
            "POST",
            "/api/admin/create",
            json!({ "pin": "515151", "password": "second-admin" }),
            Some(&cookie),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, empty_request("GET", "/api/admin/list", Some(&cookie))).await;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_bootstrap_creates_one_admin() {
    let (app, state) = create_test_app();
    let create = |pin: &str| {
        json_request(
            "POST",
            "/api/admin/create",
            json!({ "pin": pin, "password": "bootstrap1" }),
            None,
        )
    };

    let (a, b) = tokio::join!(send(&app, create("424242")), send(&app, create("515151")));
    let mut statuses = [a.status(), b.status()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::UNAUTHORIZED]);
    assert_eq!(state.store.count_admins().await.unwrap(), 1);
}

#[tokio::test]
async fn test_bootstrap_can_be_disabled() {
    let mut config = projecthub::config::Config::test_default();
    config.admin_bootstrap_enabled = false;
    let (app, _) = common::create_test_app_with(config, common::CapturingMailer::default());

    let response = send(
        &app,
        json_request(
            "POST",
            "/api/admin/create",
            json!({ "pin": "424242", "password": "bootstrap1" }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_last_admin_cannot_be_deleted() {
    let (app, state) = create_test_app();
    let cookie = admin_cookie(&app, &state, "131313", "adminpass").await;
    let other = state.auth.create_admin("242424", "adminpass").await.unwrap();

    let response = send(
        &app,
        empty_request("DELETE", &format!("/api/admin/{}", other.id), Some(&cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, empty_request("GET", "/api/admin/list", Some(&cookie))).await;
    let remaining = body_json(response).await;
    let last_id = remaining[0]["id"].as_str().unwrap().to_string();

    let response = send(
        &app,
        empty_request("DELETE", &format!("/api/admin/{last_id}"), Some(&cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["message"],
        "Cannot delete the last admin"
    );

    let response = send(
        &app,
        empty_request("DELETE", "/api/admin/no-such-admin", Some(&cookie)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_logout() {
    let (app, state) = create_test_app();
    let cookie = admin_cookie(&app, &state, "131313", "adminpass").await;

    let response = send(&app, empty_request("POST", "/api/admin/logout", Some(&cookie))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(cookie_pair(&response, "connect.sid").unwrap(), "connect.sid=");

    let response = send(&app, empty_request("GET", "/api/admin/list", Some(&cookie))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_logout_leaves_user_session_alone() {
    let (app, _) = create_test_app();
    let user = common::register(&app, "alice@example.com", "secret1").await;

    let response = send(&app, empty_request("POST", "/api/admin/logout", Some(&user))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(cookie_pair(&response, "connect.sid").is_none());

    let response = send(&app, empty_request("GET", "/api/auth/me", Some(&user))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_block_takes_effect_on_next_request() {
    for carrier in [IdentityCarrier::Session, IdentityCarrier::Token] {
        let (app, state) = create_test_app_for(carrier);
        let user = common::register(&app, "alice@example.com", "secret1").await;
        let admin = admin_cookie(&app, &state, "131313", "adminpass").await;

        let response = send(&app, empty_request("GET", "/api/auth/me", Some(&user))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let id = user_id_by_email(&app, &admin, "alice@example.com").await;
        let response = send(
            &app,
            empty_request("POST", &format!("/api/admin/users/{id}/block"), Some(&admin)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["user"]["isBlocked"], true);

        let response = send(&app, empty_request("GET", "/api/auth/me", Some(&user))).await;
        let status = response.status();
        let body = body_json(response).await;
        assert!(body["user"].is_null());
        match carrier {
            // The session was terminated along with the block
            IdentityCarrier::Session => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
            }
            // A self-contained token still verifies, so the block itself answers
            IdentityCarrier::Token => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body["message"], "Account is blocked");
            }
        }

        let response = send(
            &app,
            json_request(
                "POST",
                "/api/auth/login",
                json!({ "email": "alice@example.com", "password": "secret1" }),
                None,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(cookie_pair(&response, "connect.sid").is_none());
    }
}

#[tokio::test]
async fn test_unblock_restores_login() {
    let (app, state) = create_test_app();
    common::register(&app, "alice@example.com", "secret1").await;
    let admin = admin_cookie(&app, &state, "131313", "adminpass").await;
    let id = user_id_by_email(&app, &admin, "alice@example.com").await;

    send(
        &app,
        empty_request("POST", &format!("/api/admin/users/{id}/block"), Some(&admin)),
    )
    .await;
    let response = send(
        &app,
        empty_request("POST", &format!("/api/admin/users/{id}/unblock"), Some(&admin)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["user"]["isBlocked"], false);

    let response = send(
        &app,
        json_request(
            "POST",
            "/api/auth/login",
            json!({ "email": "alice@example.com", "password": "secret1" }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_block_unknown_user_not_found() {
    let (app, state) = create_test_app();
    let admin = admin_cookie(&app, &state, "131313", "adminpass").await;

    let response = send(
        &app,
        empty_request("POST", "/api/admin/users/no-such-user/block", Some(&admin)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");
}
