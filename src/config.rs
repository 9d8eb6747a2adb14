// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup. `SESSION_SECRET` is the only required
//! value; the rest default to development-friendly settings.

use crate::models::SocialProvider;
use chrono::Duration;
use std::env;
use std::str::FromStr;

/// Cloudflare's always-passing Turnstile secret, used when no key is configured.
pub const TURNSTILE_TEST_SECRET: &str = "1x0000000000000000000000000000000AA";

/// Cloudflare Turnstile verification endpoint.
pub const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

/// Deployment environment. Drives cookie policy and captcha enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(()),
        }
    }
}

/// How a user's identity travels between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityCarrier {
    /// Opaque session id in a cookie; the claim lives in the session store.
    Session,
    /// Signed self-contained token in a cookie or the `X-User-Session` header.
    Token,
}

impl FromStr for IdentityCarrier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "token" => Ok(Self::Token),
            _ => Err(()),
        }
    }
}

/// OAuth client credentials for one social provider.
#[derive(Debug, Clone)]
pub struct SocialCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    pub environment: Environment,
    /// SQLite database file backing users, admins and sessions
    pub database_path: String,
    /// Root secret; signing keys are derived from it
    pub session_secret: Vec<u8>,
    pub identity_carrier: IdentityCarrier,
    pub session_cookie_name: String,
    pub session_ttl: Duration,
    pub bcrypt_cost: u32,
    pub min_password_length: usize,
    pub reset_token_ttl: Duration,

    // --- Captcha ---
    pub turnstile_secret: String,
    pub turnstile_verify_url: String,
    pub captcha_enforced: bool,

    /// Allow unauthenticated admin creation while no admin exists
    pub admin_bootstrap_enabled: bool,
    /// Frontend URL for CORS and post-login redirects
    pub frontend_url: String,

    // --- Social login (provider enabled when both id and secret are set) ---
    pub google: Option<SocialCredentials>,
    pub discord: Option<SocialCredentials>,
    pub facebook: Option<SocialCredentials>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let environment: Environment = parse_or("APP_ENV", Environment::Development)?;

        let session_secret = env::var("SESSION_SECRET")
            .map(|v| v.trim().to_string())
            .map_err(|_| ConfigError::Missing("SESSION_SECRET"))?
            .into_bytes();
        if session_secret.is_empty()
            || (environment == Environment::Production && session_secret.len() < 32)
        {
            return Err(ConfigError::Invalid("SESSION_SECRET"));
        }

        let bcrypt_cost: u32 = parse_or("BCRYPT_COST", 10)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid("BCRYPT_COST"));
        }

        let session_ttl_hours: i64 = parse_or("SESSION_TTL_HOURS", 24)?;
        let reset_ttl_minutes: i64 = parse_or("RESET_TOKEN_TTL_MINUTES", 60)?;
        if session_ttl_hours <= 0 {
            return Err(ConfigError::Invalid("SESSION_TTL_HOURS"));
        }
        if reset_ttl_minutes <= 0 {
            return Err(ConfigError::Invalid("RESET_TOKEN_TTL_MINUTES"));
        }

        Ok(Self {
            port: parse_or("PORT", 8080)?,
            environment,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "projecthub.db".to_string()),
            session_secret,
            identity_carrier: parse_or("IDENTITY_CARRIER", IdentityCarrier::Session)?,
            session_cookie_name: env::var("SESSION_COOKIE_NAME")
                .unwrap_or_else(|_| "connect.sid".to_string()),
            session_ttl: Duration::hours(session_ttl_hours),
            bcrypt_cost,
            min_password_length: parse_or("MIN_PASSWORD_LENGTH", 6)?,
            reset_token_ttl: Duration::minutes(reset_ttl_minutes),
            turnstile_secret: env::var("TURNSTILE_SECRET_KEY")
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|_| TURNSTILE_TEST_SECRET.to_string()),
            turnstile_verify_url: env::var("TURNSTILE_VERIFY_URL")
                .unwrap_or_else(|_| TURNSTILE_VERIFY_URL.to_string()),
            captcha_enforced: parse_or(
                "CAPTCHA_ENFORCED",
                environment == Environment::Production,
            )?,
            admin_bootstrap_enabled: parse_or("ADMIN_BOOTSTRAP_ENABLED", true)?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            google: social_from_env("GOOGLE"),
            discord: social_from_env("DISCORD"),
            facebook: social_from_env("FACEBOOK"),
        })
    }

    /// Deterministic config for tests: in-memory database, cheap hashing, no captcha.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            environment: Environment::Development,
            database_path: ":memory:".to_string(),
            session_secret: b"test_session_secret_32_bytes_min!!".to_vec(),
            identity_carrier: IdentityCarrier::Session,
            session_cookie_name: "connect.sid".to_string(),
            session_ttl: Duration::hours(24),
            bcrypt_cost: 4,
            min_password_length: 6,
            reset_token_ttl: Duration::hours(1),
            turnstile_secret: TURNSTILE_TEST_SECRET.to_string(),
            turnstile_verify_url: TURNSTILE_VERIFY_URL.to_string(),
            captcha_enforced: false,
            admin_bootstrap_enabled: true,
            frontend_url: "http://localhost:5173".to_string(),
            google: None,
            discord: None,
            facebook: None,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Client credentials for a social provider, if configured.
    pub fn social(&self, provider: SocialProvider) -> Option<&SocialCredentials> {
        match provider {
            SocialProvider::Google => self.google.as_ref(),
            SocialProvider::Discord => self.discord.as_ref(),
            SocialProvider::Facebook => self.facebook.as_ref(),
        }
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::Invalid(name))
        }
        _ => Ok(default),
    }
}

fn social_from_env(prefix: &str) -> Option<SocialCredentials> {
    let client_id = env::var(format!("{prefix}_CLIENT_ID")).ok()?;
    let client_secret = env::var(format!("{prefix}_CLIENT_SECRET")).ok()?;
    if client_id.trim().is_empty() || client_secret.trim().is_empty() {
        return None;
    }
    Some(SocialCredentials {
        client_id: client_id.trim().to_string(),
        client_secret: client_secret.trim().to_string(),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
