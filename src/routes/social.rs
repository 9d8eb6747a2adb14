// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Social OAuth login routes.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Redirect,
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::SocialProvider;
use crate::routes::auth::issue_user_identity;
use crate::services::social::link_or_create;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/{provider}", get(social_start))
        .route("/api/auth/{provider}/callback", get(social_callback))
}

/// Query parameters for starting the OAuth flow.
#[derive(Deserialize)]
pub struct StartParams {
    /// Where to send the browser afterwards. Must be on the frontend.
    #[serde(default)]
    redirect: Option<String>,
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse the provider segment; unknown or unconfigured providers are 404.
fn enabled_provider(state: &AppState, name: &str) -> Result<SocialProvider> {
    name.parse::<SocialProvider>()
        .ok()
        .filter(|p| state.social.is_enabled(*p))
        .ok_or_else(|| AppError::NotFound(format!("Login provider '{name}'")))
}

fn callback_url(headers: &HeaderMap, provider: SocialProvider) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost:8080");

    let scheme = if host.starts_with("localhost") || host.starts_with("127.0.0.1") {
        "http"
    } else {
        "https"
    };

    format!("{scheme}://{host}/api/auth/{provider}/callback")
}

/// Start OAuth flow - redirect to the provider's consent page.
async fn social_start(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<StartParams>,
    headers: HeaderMap,
) -> Result<Redirect> {
    let provider = enabled_provider(&state, &provider)?;
    let redirect = state.social.safe_redirect(params.redirect.as_deref());

    let auth_url = state
        .social
        .authorize_url(provider, &callback_url(&headers, provider), &redirect)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    tracing::info!(%provider, "Starting OAuth flow");
    Ok(Redirect::temporary(&auth_url))
}

/// OAuth callback - exchange code, link or create the user, issue identity.
async fn social_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect)> {
    let provider = enabled_provider(&state, &provider)?;
    let failure = Redirect::temporary(&format!(
        "{}/login?error={}_failed",
        state.social.frontend_url(),
        provider
    ));

    if let Some(error) = params.error {
        tracing::warn!(%provider, error = %error, "OAuth error from provider");
        return Ok((jar, failure));
    }

    let Some(redirect) = params
        .state
        .as_deref()
        .and_then(|s| state.social.verify_state(s, Utc::now().timestamp_millis()))
    else {
        tracing::warn!(%provider, "Invalid or expired OAuth state");
        return Ok((jar, failure));
    };

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return Ok((jar, failure));
    };

    let profile = match state
        .social
        .exchange_code(provider, &code, &callback_url(&headers, provider))
        .await
    {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!(%provider, error = %e, "Social login failed");
            return Ok((jar, failure));
        }
    };

    let user = match link_or_create(state.store.as_ref(), profile).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(%provider, error = %e, "Could not link social account");
            return Ok((jar, failure));
        }
    };
    if user.is_blocked {
        tracing::warn!(user_id = %user.id, "Blocked user attempted social login");
        return Ok((jar, failure));
    }

    let jar = match issue_user_identity(&state, jar.clone(), &user).await {
        Ok((jar, _)) => jar,
        Err(e) => {
            tracing::warn!(user_id = %user.id, error = %e, "Could not issue identity after social login");
            return Ok((jar, failure));
        }
    };
    tracing::info!(user_id = %user.id, %provider, "Social login successful");

    Ok((jar, Redirect::temporary(&redirect)))
}
