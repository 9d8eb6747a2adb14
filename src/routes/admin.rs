// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Admin dashboard routes: PIN login, admin management, user blocking.

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::middleware::auth::{clear_identity_cookie, identity_cookie};
use crate::models::{AdminView, UserSummary};
use crate::services::auth::AdminLoginRequest;
use crate::services::AdminSession;
use crate::AppState;

pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/admin/login", post(admin_login))
        .route("/api/admin/logout", post(admin_logout))
        .route("/api/admin/session", get(admin_session))
        // Gated inside the handler so the zero-admin bootstrap can get through
        .route("/api/admin/create", post(create_admin))
}

/// Routes that sit behind `require_admin`.
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/admin/list", get(list_admins))
        .route("/api/admin/{id}", delete(delete_admin))
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/users/{id}/block", post(block_user))
        .route("/api/admin/users/{id}/unblock", post(unblock_user))
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSessionResponse {
    pub is_admin_logged_in: bool,
}

#[derive(Deserialize)]
pub struct CreateAdminRequest {
    #[serde(default, alias = "username")]
    pin: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Serialize)]
pub struct UserSummaryResponse {
    pub user: UserSummary,
}

fn session_cookie(state: &AppState, jar: &CookieJar) -> Option<String> {
    jar.get(&state.config.session_cookie_name)
        .map(|c| c.value().to_string())
}

/// PIN + password login. Responds only once the session row is written.
async fn admin_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<AdminLoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<SuccessResponse>)> {
    let Json(req) = payload?;
    let admin = state.auth.admin_login(req).await?;

    state.identity.end(session_cookie(&state, &jar).as_deref()).await?;
    let session_id = state.identity.establish_admin(&admin).await?;

    Ok((
        jar.add(identity_cookie(&state.config, session_id)),
        Json(SuccessResponse { success: true }),
    ))
}

/// Ends the admin session. A user session in the cookie is left alone.
async fn admin_logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SuccessResponse>)> {
    let cookie = session_cookie(&state, &jar);
    if state.identity.resolve_admin(cookie.as_deref()).await?.is_none() {
        return Ok((jar, Json(SuccessResponse { success: true })));
    }

    state.identity.end(cookie.as_deref()).await?;
    Ok((
        jar.add(clear_identity_cookie(&state.config)),
        Json(SuccessResponse { success: true }),
    ))
}

async fn admin_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<AdminSessionResponse>> {
    let cookie = session_cookie(&state, &jar);
    let admin = state.identity.resolve_admin(cookie.as_deref()).await?;
    Ok(Json(AdminSessionResponse {
        is_admin_logged_in: admin.is_some(),
    }))
}

async fn create_admin(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<CreateAdminRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>> {
    let cookie = session_cookie(&state, &jar);
    let has_admin_session = state
        .identity
        .resolve_admin(cookie.as_deref())
        .await?
        .is_some();
    state.auth.authorize_admin_creation(has_admin_session).await?;

    let Json(req) = payload?;
    let pin = req.pin.as_deref().unwrap_or_default();
    let password = req.password.as_deref().unwrap_or_default();
    if has_admin_session {
        state.auth.create_admin(pin, password).await?;
    } else {
        state.auth.bootstrap_admin(pin, password).await?;
    }

    Ok(Json(SuccessResponse { success: true }))
}

async fn list_admins(State(state): State<Arc<AppState>>) -> Result<Json<Vec<AdminView>>> {
    let admins = state.store.list_admins().await?;
    Ok(Json(admins.iter().map(|a| a.view()).collect()))
}

async fn delete_admin(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AdminSession>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>> {
    state.auth.delete_admin(&id).await?;
    tracing::info!(admin_id = %id, by = %actor.admin_id, "Admin removed from dashboard");
    Ok(Json(SuccessResponse { success: true }))
}

async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<UserSummary>>> {
    let users = state.store.list_users().await?;
    Ok(Json(users.iter().map(|u| u.summary()).collect()))
}

async fn block_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AdminSession>,
    Path(id): Path<String>,
) -> Result<Json<UserSummaryResponse>> {
    let user = state
        .store
        .set_user_blocked(&id, true)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

    state.identity.end_all_for_user(&user.id).await?;
    tracing::info!(user_id = %user.id, by = %actor.admin_id, "User blocked");

    Ok(Json(UserSummaryResponse {
        user: user.summary(),
    }))
}

async fn unblock_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<AdminSession>,
    Path(id): Path<String>,
) -> Result<Json<UserSummaryResponse>> {
    let user = state
        .store
        .set_user_blocked(&id, false)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

    tracing::info!(user_id = %user.id, by = %actor.admin_id, "User unblocked");
    Ok(Json(UserSummaryResponse {
        user: user.summary(),
    }))
}
