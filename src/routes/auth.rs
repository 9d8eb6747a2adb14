// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User authentication routes: register, login, logout, identity, reset.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::Result;
use crate::middleware::auth::{
    clear_identity_cookie, identity_cookie, presented_credential, CurrentUser,
};
use crate::models::{User, UserView};
use crate::services::auth::{
    ForgotPasswordRequest, LoginRequest, ProfileUpdate, Registration, ResetPasswordRequest,
    RESET_REQUESTED_MESSAGE,
};
use crate::services::{Rejection, Resolution};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(current_user))
        .route("/api/auth/user", get(current_user))
        .route("/api/auth/forgot-password", post(forgot_password))
        .route("/api/auth/reset-password", post(reset_password))
}

/// Routes that sit behind `require_auth`.
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/auth/profile", patch(update_profile))
}

/// Successful login or registration.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AuthResponse {
    pub user: UserView,
    /// Only for the token carrier, for clients that send `X-User-Session`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserResponse {
    pub user: UserView,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Serialize)]
struct NoUserResponse {
    user: Option<UserView>,
    message: &'static str,
}

/// Replace whatever the cookie held with a fresh identity for `user`.
///
/// The previous session is destroyed so ids are never carried across a login.
pub(crate) async fn issue_user_identity(
    state: &AppState,
    jar: CookieJar,
    user: &User,
) -> Result<(CookieJar, Option<String>)> {
    let previous = jar
        .get(&state.config.session_cookie_name)
        .map(|c| c.value().to_string());
    state.identity.end(previous.as_deref()).await?;

    let carried = state.identity.establish_user(user).await?;
    let jar = jar.add(identity_cookie(&state.config, carried.cookie_value));
    Ok((jar, carried.session_token))
}

async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<Registration>, JsonRejection>,
) -> Result<(CookieJar, Json<AuthResponse>)> {
    let Json(req) = payload?;
    let user = state.auth.register(req).await?;
    let (jar, session_token) = issue_user_identity(&state, jar, &user).await?;

    Ok((
        jar,
        Json(AuthResponse {
            user: user.view(),
            session_token,
        }),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<AuthResponse>)> {
    let Json(req) = payload?;
    let user = state.auth.login(req).await?;
    let (jar, session_token) = issue_user_identity(&state, jar, &user).await?;

    Ok((
        jar,
        Json(AuthResponse {
            user: user.view(),
            session_token,
        }),
    ))
}

/// Logout - destroys the server-side session, if any, and clears the cookie.
///
/// An admin dashboard session in the cookie is left alone.
async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>)> {
    let cookie = jar
        .get(&state.config.session_cookie_name)
        .map(|c| c.value().to_string());
    let jar = if state.identity.end_user(cookie.as_deref()).await? {
        jar.add(clear_identity_cookie(&state.config))
    } else {
        jar
    };

    Ok((
        jar,
        Json(MessageResponse {
            message: "Logged out successfully",
        }),
    ))
}

/// Current identity, re-validated against the credential store.
async fn current_user(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Response> {
    let presented = presented_credential(&state.config, &jar, &headers);
    let no_store = [(header::CACHE_CONTROL, "no-store")];

    match state.identity.resolve(&presented).await? {
        Resolution::Authenticated(identity) => Ok((
            no_store,
            Json(UserResponse {
                user: identity.user.view(),
            }),
        )
            .into_response()),
        Resolution::Unauthenticated(rejection) => {
            let status = match rejection {
                Rejection::Blocked => StatusCode::FORBIDDEN,
                _ => StatusCode::UNAUTHORIZED,
            };
            // Drop a cookie that no longer means anything
            let jar = if presented.cookie.is_some() && rejection.voids_cookie() {
                jar.add(clear_identity_cookie(&state.config))
            } else {
                jar
            };
            Ok((
                status,
                no_store,
                jar,
                Json(NoUserResponse {
                    user: None,
                    message: rejection.message(),
                }),
            )
                .into_response())
        }
    }
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    CurrentUser(identity): CurrentUser,
    payload: std::result::Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<UserResponse>> {
    let Json(update) = payload?;
    let user = state.auth.update_profile(&identity.user.id, update).await?;
    Ok(Json(UserResponse { user: user.view() }))
}

async fn forgot_password(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(req) = payload?;
    state.auth.forgot_password(req).await?;
    Ok(Json(MessageResponse {
        message: RESET_REQUESTED_MESSAGE,
    }))
}

async fn reset_password(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(req) = payload?;
    let user = state.auth.reset_password(req).await?;
    state.identity.end_all_for_user(&user.id).await?;

    Ok(Json(MessageResponse {
        message: "Password reset successfully",
    }))
}
