// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Supported social login providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialProvider {
    Google,
    Discord,
    Facebook,
}

impl SocialProvider {
    pub const ALL: [SocialProvider; 3] = [Self::Google, Self::Discord, Self::Facebook];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Discord => "discord",
            Self::Facebook => "facebook",
        }
    }

    /// Column holding this provider's account id.
    pub fn column(self) -> &'static str {
        match self {
            Self::Google => "google_id",
            Self::Discord => "discord_id",
            Self::Facebook => "facebook_id",
        }
    }
}

impl fmt::Display for SocialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// User record as held by the credential store.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Server-generated stable id
    pub id: String,
    /// Unique when present; absent for social-only accounts
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub username: Option<String>,
    /// bcrypt digest; absent for social-only accounts
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub discord_id: Option<String>,
    pub facebook_id: Option<String>,
    pub is_blocked: bool,
    pub is_admin: bool,
    /// SHA-256 hex of the outstanding reset token
    pub reset_token_hash: Option<String>,
    pub reset_token_expiry: Option<DateTime<Utc>>,
    /// Bumped on every password change; tokens minted under an older value are void
    pub credential_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn social_id(&self, provider: SocialProvider) -> Option<&str> {
        match provider {
            SocialProvider::Google => self.google_id.as_deref(),
            SocialProvider::Discord => self.discord_id.as_deref(),
            SocialProvider::Facebook => self.facebook_id.as_deref(),
        }
    }

    /// An account needs a password or a linked social id to be usable.
    pub fn can_log_in(&self) -> bool {
        self.password_hash.is_some()
            || SocialProvider::ALL
                .into_iter()
                .any(|p| self.social_id(p).is_some())
    }

    /// Sanitized view for API responses. Never includes secrets.
    pub fn view(&self) -> UserView {
        UserView {
            id: self.id.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            profile_image_url: self.profile_image_url.clone(),
        }
    }

    /// Admin dashboard listing entry.
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            user: self.view(),
            is_blocked: self.is_blocked,
            is_admin: self.is_admin,
            created_at: crate::time_utils::format_utc_rfc3339(self.created_at),
        }
    }
}

/// Sanitized user returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserView {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

/// User entry in the admin dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: UserView,
    pub is_blocked: bool,
    pub is_admin: bool,
    pub created_at: String,
}

/// Partial user for `upsert_user`.
///
/// Each mutable field is tri-state: `None` leaves the stored value alone,
/// `Some(None)` clears it and `Some(Some(v))` sets it.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    /// Target record; when absent the patch matches on email instead
    pub id: Option<String>,
    pub email: Option<Option<String>>,
    pub first_name: Option<Option<String>>,
    pub last_name: Option<Option<String>>,
    pub profile_image_url: Option<Option<String>>,
    pub username: Option<Option<String>>,
    pub password_hash: Option<Option<String>>,
    pub google_id: Option<Option<String>>,
    pub discord_id: Option<Option<String>>,
    pub facebook_id: Option<Option<String>>,
    pub reset_token_hash: Option<Option<String>>,
    pub reset_token_expiry: Option<Option<DateTime<Utc>>>,
}

impl UserPatch {
    /// Patch addressed at an existing user id.
    pub fn for_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_social_id(mut self, provider: SocialProvider, id: impl Into<String>) -> Self {
        let value = Some(Some(id.into()));
        match provider {
            SocialProvider::Google => self.google_id = value,
            SocialProvider::Discord => self.discord_id = value,
            SocialProvider::Facebook => self.facebook_id = value,
        }
        self
    }
}

/// Canonical form used for storing and matching email addresses.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: "u1".to_string(),
            email: Some("alice@example.com".to_string()),
            first_name: Some("Alice".to_string()),
            last_name: Some("Liddell".to_string()),
            profile_image_url: None,
            username: None,
            password_hash: Some("$2b$04$secret".to_string()),
            google_id: None,
            discord_id: None,
            facebook_id: None,
            is_blocked: false,
            is_admin: false,
            reset_token_hash: Some("abc".to_string()),
            reset_token_expiry: None,
            credential_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_view_omits_secrets() {
        let json = serde_json::to_value(user().view()).unwrap();
        assert_eq!(json["email"], "alice@example.com");
        assert_eq!(json["firstName"], "Alice");
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("resetTokenHash").is_none());
    }

    #[test]
    fn test_can_log_in() {
        let mut u = user();
        assert!(u.can_log_in());
        u.password_hash = None;
        assert!(!u.can_log_in());
        u.discord_id = Some("1234".to_string());
        assert!(u.can_log_in());
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("Discord".parse(), Ok(SocialProvider::Discord));
        assert!("github".parse::<SocialProvider>().is_err());
        assert_eq!(SocialProvider::Facebook.column(), "facebook_id");
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }
}
