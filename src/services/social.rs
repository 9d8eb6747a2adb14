// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Social login (Google, Discord, Facebook) via the OAuth2 code flow.

use crate::config::{Config, SocialCredentials};
use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::{normalize_email, SocialProvider, User, UserPatch};
use crate::services::token::derive_key;
use anyhow::Context;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const STATE_KEY_LABEL: &str = "projecthub oauth state v1";
const STATE_MAX_AGE_MS: i64 = 10 * 60 * 1000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// OAuth endpoints for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub scope: String,
}

impl ProviderEndpoints {
    /// The provider's public production endpoints.
    pub fn for_provider(provider: SocialProvider) -> Self {
        let (authorize_url, token_url, profile_url, scope) = match provider {
            SocialProvider::Google => (
                "https://accounts.google.com/o/oauth2/v2/auth",
                "https://oauth2.googleapis.com/token",
                "https://www.googleapis.com/oauth2/v3/userinfo",
                "openid email profile",
            ),
            SocialProvider::Discord => (
                "https://discord.com/api/oauth2/authorize",
                "https://discord.com/api/oauth2/token",
                "https://discord.com/api/users/@me",
                "identify email",
            ),
            SocialProvider::Facebook => (
                "https://www.facebook.com/v18.0/dialog/oauth",
                "https://graph.facebook.com/v18.0/oauth/access_token",
                "https://graph.facebook.com/me?fields=id,email,first_name,last_name,picture",
                "email,public_profile",
            ),
        };
        Self {
            authorize_url: authorize_url.to_string(),
            token_url: token_url.to_string(),
            profile_url: profile_url.to_string(),
            scope: scope.to_string(),
        }
    }
}

/// Social login failures. All of them send the browser back to the login page.
#[derive(Debug, thiserror::Error)]
pub enum SocialError {
    #[error("provider {0} is not configured")]
    NotConfigured(SocialProvider),
    #[error("OAuth state is invalid or expired")]
    InvalidState,
    #[error("code exchange failed: {0}")]
    Exchange(String),
    #[error("profile lookup failed: {0}")]
    Profile(String),
}

/// What we keep from a provider's profile.
#[derive(Debug, Clone, PartialEq)]
pub struct SocialProfile {
    pub provider: SocialProvider,
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct SocialLogin {
    http_client: reqwest::Client,
    state_key: [u8; 32],
    frontend_url: String,
    google: Option<SocialCredentials>,
    discord: Option<SocialCredentials>,
    facebook: Option<SocialCredentials>,
    endpoints: [ProviderEndpoints; 3],
}

fn slot(provider: SocialProvider) -> usize {
    match provider {
        SocialProvider::Google => 0,
        SocialProvider::Discord => 1,
        SocialProvider::Facebook => 2,
    }
}

impl SocialLogin {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed building social login HTTP client")?;

        Ok(Self {
            http_client,
            state_key: derive_key(&config.session_secret, STATE_KEY_LABEL),
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
            google: config.google.clone(),
            discord: config.discord.clone(),
            facebook: config.facebook.clone(),
            endpoints: [
                SocialProvider::Google,
                SocialProvider::Discord,
                SocialProvider::Facebook,
            ]
            .map(ProviderEndpoints::for_provider),
        })
    }

    /// Point one provider at different OAuth endpoints (self-hosted or test servers).
    pub fn with_endpoints(mut self, provider: SocialProvider, endpoints: ProviderEndpoints) -> Self {
        self.endpoints[slot(provider)] = endpoints;
        self
    }

    pub fn endpoints(&self, provider: SocialProvider) -> &ProviderEndpoints {
        &self.endpoints[slot(provider)]
    }

    fn credentials(&self, provider: SocialProvider) -> Result<&SocialCredentials, SocialError> {
        match provider {
            SocialProvider::Google => self.google.as_ref(),
            SocialProvider::Discord => self.discord.as_ref(),
            SocialProvider::Facebook => self.facebook.as_ref(),
        }
        .ok_or(SocialError::NotConfigured(provider))
    }

    pub fn is_enabled(&self, provider: SocialProvider) -> bool {
        self.credentials(provider).is_ok()
    }

    pub fn frontend_url(&self) -> &str {
        &self.frontend_url
    }

    /// Only our own frontend is an acceptable post-login destination.
    pub fn safe_redirect(&self, requested: Option<&str>) -> String {
        match requested {
            Some(url) if url == self.frontend_url || url.starts_with(&format!("{}/", self.frontend_url)) => {
                url.to_string()
            }
            Some(path) if path.starts_with('/') && !path.starts_with("//") => {
                format!("{}{}", self.frontend_url, path)
            }
            _ => format!("{}/request-project?login=success", self.frontend_url),
        }
    }

    fn state_mac(&self, payload: &str) -> Option<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.state_key).ok()?;
        mac.update(payload.as_bytes());
        Some(mac.finalize().into_bytes().to_vec())
    }

    /// Sign `redirect|timestamp_hex` and base64url the result.
    pub fn sign_state(&self, redirect: &str, now_ms: i64) -> Result<String, SocialError> {
        let payload = format!("{}|{:x}", redirect, now_ms);
        let signature = hex::encode(self.state_mac(&payload).ok_or(SocialError::InvalidState)?);
        Ok(URL_SAFE_NO_PAD.encode(format!("{payload}|{signature}").as_bytes()))
    }

    /// Check signature and age; return the redirect it carries.
    pub fn verify_state(&self, state: &str, now_ms: i64) -> Option<String> {
        let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
        let state_str = String::from_utf8(bytes).ok()?;

        // The redirect itself may contain '|', so split from the right
        let mut parts = state_str.rsplitn(3, '|');
        let signature_hex = parts.next()?;
        let timestamp_hex = parts.next()?;
        let redirect = parts.next()?;

        let provided = hex::decode(signature_hex).ok()?;
        let expected = self.state_mac(&format!("{redirect}|{timestamp_hex}"))?;
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            tracing::warn!("OAuth state signature mismatch");
            return None;
        }

        let issued_ms = i64::from_str_radix(timestamp_hex, 16).ok()?;
        let age = now_ms - issued_ms;
        if !(0..=STATE_MAX_AGE_MS).contains(&age) {
            tracing::debug!(age_ms = age, "OAuth state expired");
            return None;
        }

        Some(redirect.to_string())
    }

    /// Provider authorize URL for the start of the flow.
    pub fn authorize_url(
        &self,
        provider: SocialProvider,
        callback_url: &str,
        redirect: &str,
    ) -> Result<String, SocialError> {
        let credentials = self.credentials(provider)?;
        let ep = self.endpoints(provider);
        let state = self.sign_state(redirect, Utc::now().timestamp_millis())?;

        Ok(format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            ep.authorize_url,
            urlencoding::encode(&credentials.client_id),
            urlencoding::encode(callback_url),
            urlencoding::encode(&ep.scope),
            state
        ))
    }

    /// Exchange an authorization code and fetch the caller's profile.
    pub async fn exchange_code(
        &self,
        provider: SocialProvider,
        code: &str,
        callback_url: &str,
    ) -> Result<SocialProfile, SocialError> {
        let credentials = self.credentials(provider)?;
        let ep = self.endpoints(provider);

        let response = self
            .http_client
            .post(&ep.token_url)
            .form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", callback_url),
            ])
            .send()
            .await
            .map_err(|e| SocialError::Exchange(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SocialError::Exchange(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SocialError::Exchange(e.to_string()))?;

        let profile: Value = self
            .http_client
            .get(&ep.profile_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SocialError::Profile(e.to_string()))?
            .json()
            .await
            .map_err(|e| SocialError::Profile(e.to_string()))?;

        parse_profile(provider, &profile)
            .ok_or_else(|| SocialError::Profile("profile has no account id".to_string()))
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Map a provider profile document onto [`SocialProfile`].
///
/// Only emails the provider explicitly marks verified are kept, so an
/// unverified address cannot attach to someone else's account.
pub fn parse_profile(provider: SocialProvider, value: &Value) -> Option<SocialProfile> {
    let verified = |key: &str| value.get(key).and_then(Value::as_bool) == Some(true);

    let profile = match provider {
        SocialProvider::Google => SocialProfile {
            provider,
            id: str_field(value, "sub")?,
            email: str_field(value, "email").filter(|_| verified("email_verified")),
            first_name: str_field(value, "given_name"),
            last_name: str_field(value, "family_name"),
            profile_image_url: str_field(value, "picture"),
        },
        SocialProvider::Discord => {
            let id = str_field(value, "id")?;
            let avatar = str_field(value, "avatar")
                .map(|hash| format!("https://cdn.discordapp.com/avatars/{id}/{hash}.png"));
            SocialProfile {
                provider,
                email: str_field(value, "email").filter(|_| verified("verified")),
                first_name: str_field(value, "global_name").or_else(|| str_field(value, "username")),
                last_name: None,
                profile_image_url: avatar,
                id,
            }
        }
        SocialProvider::Facebook => SocialProfile {
            provider,
            id: str_field(value, "id")?,
            // Graph API reports no verification flag
            email: None,
            first_name: str_field(value, "first_name"),
            last_name: str_field(value, "last_name"),
            profile_image_url: value
                .pointer("/picture/data/url")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
    };

    Some(SocialProfile {
        email: profile.email.map(|e| normalize_email(&e)),
        ..profile
    })
}

/// Find the account for a social profile, linking or creating as needed.
///
/// Order: existing social id, then existing email (the social id is
/// attached), then a brand new account.
pub async fn link_or_create(
    store: &dyn CredentialStore,
    profile: SocialProfile,
) -> Result<User, AppError> {
    if let Some(user) = store
        .find_user_by_social_id(profile.provider, &profile.id)
        .await?
    {
        return Ok(user);
    }

    if let Some(email) = profile.email.as_deref() {
        if let Some(existing) = store.find_user_by_email(email).await? {
            tracing::info!(
                user_id = %existing.id,
                provider = %profile.provider,
                "Linking social account to existing user"
            );
            let fill = |current: &Option<String>, incoming: Option<String>| {
                if current.is_none() {
                    incoming.map(Some)
                } else {
                    None
                }
            };
            let patch = UserPatch {
                first_name: fill(&existing.first_name, profile.first_name),
                last_name: fill(&existing.last_name, profile.last_name),
                profile_image_url: fill(&existing.profile_image_url, profile.profile_image_url),
                ..UserPatch::for_id(&existing.id)
            }
            .with_social_id(profile.provider, profile.id);
            return store.upsert_user(patch).await;
        }
    }

    let user = store
        .upsert_user(
            UserPatch {
                email: profile.email.map(Some),
                first_name: profile.first_name.map(Some),
                last_name: profile.last_name.map(Some),
                profile_image_url: profile.profile_image_url.map(Some),
                ..UserPatch::for_id(Uuid::new_v4().to_string())
            }
            .with_social_id(profile.provider, profile.id),
        )
        .await?;
    tracing::info!(user_id = %user.id, provider = %profile.provider, "Created user from social login");
    Ok(user)
}
