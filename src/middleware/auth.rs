// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Carried-identity plumbing for axum: cookies, extractor, middleware.

use crate::config::Config;
use crate::error::AppError;
use crate::services::{AdminSession, PresentedCredential, Rejection, Resolution, ResolvedIdentity};
use crate::AppState;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::sync::Arc;

/// Header carrying a self-contained token for clients without cookies.
pub const SESSION_HEADER: &str = "x-user-session";

/// Collect the identity cookie and header variants from a request.
pub fn presented_credential(config: &Config, jar: &CookieJar, headers: &HeaderMap) -> PresentedCredential {
    let cookie = jar
        .get(&config.session_cookie_name)
        .map(|c| c.value().to_string());

    let header = headers
        .get(SESSION_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(str::to_string)
        });

    PresentedCredential { cookie, header }
}

fn cookie_with_policy(config: &Config, value: String, max_age: time::Duration) -> Cookie<'static> {
    let builder = Cookie::build((config.session_cookie_name.clone(), value))
        .http_only(true)
        .path("/")
        .max_age(max_age);

    // Production frontends are cross-site, so the cookie must be sent with
    // SameSite=None, which browsers only accept over TLS.
    if config.is_production() {
        builder.same_site(SameSite::None).secure(true).build()
    } else {
        builder.same_site(SameSite::Lax).build()
    }
}

/// Identity cookie holding a session id or token, living as long as the session.
pub fn identity_cookie(config: &Config, value: String) -> Cookie<'static> {
    let max_age = time::Duration::seconds(config.session_ttl.num_seconds());
    cookie_with_policy(config, value, max_age)
}

/// Removal cookie with the same attributes as [`identity_cookie`].
pub fn clear_identity_cookie(config: &Config) -> Cookie<'static> {
    cookie_with_policy(config, String::new(), time::Duration::ZERO)
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Blocked => AppError::Forbidden(rejection.message().to_string()),
            _ => AppError::Unauthenticated,
        }
    }
}

/// The resolved user for the current request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub ResolvedIdentity);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Already resolved by `require_auth`
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let jar = CookieJar::from_headers(&parts.headers);
        let presented = presented_credential(&state.config, &jar, &parts.headers);
        match state.identity.resolve(&presented).await? {
            Resolution::Authenticated(identity) => Ok(CurrentUser(identity)),
            Resolution::Unauthenticated(rejection) => Err(rejection.into()),
        }
    }
}

/// Middleware that requires a resolved user identity.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = presented_credential(&state.config, &jar, request.headers());

    match state.identity.resolve(&presented).await? {
        Resolution::Authenticated(identity) => {
            request.extensions_mut().insert(CurrentUser(identity));
            Ok(next.run(request).await)
        }
        Resolution::Unauthenticated(rejection) => {
            tracing::debug!(?rejection, "Rejected unauthenticated request");
            Err(rejection.into())
        }
    }
}

/// Middleware that requires an admin dashboard session.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let cookie = jar.get(&state.config.session_cookie_name).map(|c| c.value().to_string());

    match state.identity.resolve_admin(cookie.as_deref()).await? {
        Some(admin) => {
            request.extensions_mut().insert::<AdminSession>(admin);
            Ok(next.run(request).await)
        }
        None => Err(AppError::Unauthenticated),
    }
}
