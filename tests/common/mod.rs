// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, Response},
};
use projecthub::config::{Config, IdentityCarrier};
use projecthub::db::SqliteDb;
use projecthub::routes::create_router;
use projecthub::services::ResetMailer;
use projecthub::AppState;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Reset mail captured instead of sent.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct SentReset {
    pub to: String,
    pub token: String,
    pub reset_url: String,
}

/// Mailer that records every reset it is asked to send.
#[derive(Default, Clone)]
pub struct CapturingMailer {
    pub sent: Arc<Mutex<Vec<SentReset>>>,
}

#[allow(dead_code)]
impl CapturingMailer {
    /// Wait briefly for the detached dispatch task, then return the last token.
    pub async fn last_token(&self) -> Option<String> {
        for _ in 0..50 {
            if let Some(last) = self.sent.lock().unwrap().last() {
                return Some(last.token.clone());
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        None
    }
}

#[async_trait]
impl ResetMailer for CapturingMailer {
    async fn send_reset(&self, to: &str, token: &str, reset_url: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(SentReset {
            to: to.to_string(),
            token: token.to_string(),
            reset_url: reset_url.to_string(),
        });
        Ok(())
    }
}

/// Test app over a private in-memory database with the default test config.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    create_test_app_with(Config::test_default(), CapturingMailer::default())
}

/// Test app for a specific identity carrier.
#[allow(dead_code)]
pub fn create_test_app_for(carrier: IdentityCarrier) -> (axum::Router, Arc<AppState>) {
    let mut config = Config::test_default();
    config.identity_carrier = carrier;
    create_test_app_with(config, CapturingMailer::default())
}

#[allow(dead_code)]
pub fn create_test_app_with(
    config: Config,
    mailer: CapturingMailer,
) -> (axum::Router, Arc<AppState>) {
    let db = SqliteDb::open_in_memory().expect("in-memory database");
    let state = Arc::new(AppState::build(config, db, Arc::new(mailer)).expect("app state"));
    (create_router(state.clone()), state)
}

/// Build a JSON request, optionally carrying a cookie header.
#[allow(dead_code)]
pub fn json_request(method: &str, uri: &str, body: Value, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Build a bodyless request, optionally carrying a cookie header.
#[allow(dead_code)]
pub fn empty_request(method: &str, uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

/// Send one request through a clone of the router.
#[allow(dead_code)]
pub async fn send(app: &axum::Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

#[allow(dead_code)]
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// `name=value` pair from the response's Set-Cookie for `name`, ready for a Cookie header.
#[allow(dead_code)]
pub fn cookie_pair(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

/// Full Set-Cookie header value for `name`.
#[allow(dead_code)]
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .map(str::to_string)
}

/// Register a user through the API and return the identity cookie pair.
#[allow(dead_code)]
pub async fn register(app: &axum::Router, email: &str, password: &str) -> String {
    let response = send(
        app,
        json_request(
            "POST",
            "/api/auth/register",
            serde_json::json!({
                "email": email,
                "password": password,
                "firstName": "Alice",
                "lastName": "Liddell"
            }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), 200, "registration failed");
    cookie_pair(&response, "connect.sid").expect("identity cookie")
}

/// Create an admin directly and log in, returning the admin cookie pair.
#[allow(dead_code)]
pub async fn admin_cookie(app: &axum::Router, state: &AppState, pin: &str, password: &str) -> String {
    state.auth.create_admin(pin, password).await.unwrap();
    let response = send(
        app,
        json_request(
            "POST",
            "/api/admin/login",
            serde_json::json!({ "username": pin, "password": password }),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), 200, "admin login failed");
    cookie_pair(&response, "connect.sid").expect("admin cookie")
}
