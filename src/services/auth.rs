// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential flows: login, registration, admin login, password reset.
//!
//! These return plain records; establishing the carried identity is the
//! resolver's job, so every flow issues it the same way.

use crate::config::Config;
use crate::db::CredentialStore;
use crate::error::{AppError, Result, INVALID_ADMIN_LOGIN, INVALID_LOGIN};
use crate::models::{Admin, User, UserPatch};
use crate::services::captcha::CaptchaGate;
use crate::services::mailer::ResetMailer;
use crate::services::password::PasswordHasher;
use crate::services::session::{random_bytes, sha256_hex};
use chrono::{Duration, Utc};
use ring::rand::SystemRandom;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

/// Reset tokens are 32 random bytes, hex encoded for the link.
const RESET_TOKEN_BYTES: usize = 32;

/// Response to every forgot-password request, whether or not the account exists.
pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default, alias = "username")]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[validate(
        required(message = "All fields are required"),
        email(message = "Invalid email address")
    )]
    pub email: Option<String>,
    #[validate(required(message = "All fields are required"))]
    pub password: Option<String>,
    #[validate(
        required(message = "All fields are required"),
        length(min = 1, message = "All fields are required")
    )]
    pub first_name: Option<String>,
    #[validate(
        required(message = "All fields are required"),
        length(min = 1, message = "All fields are required")
    )]
    pub last_name: Option<String>,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminLoginRequest {
    /// The dashboard form posts the PIN as `username`.
    #[serde(default, alias = "username")]
    pub pin: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub new_password: Option<String>,
}

/// Partial profile edit. Absent fields stay, `null` clears.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, deserialize_with = "double_option")]
    pub first_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub last_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub profile_image_url: Option<Option<String>>,
}

/// Distinguish an explicit `null` from an absent field.
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn validation_message(errors: ValidationErrors) -> AppError {
    let mut messages: Vec<String> = errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .map(|e| {
            e.message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("Invalid {}", e.code))
        })
        .collect();
    messages.sort();
    messages.dedup();
    AppError::Validation(messages.join("; "))
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    captcha: CaptchaGate,
    mailer: Arc<dyn ResetMailer>,
    min_password_length: usize,
    reset_token_ttl: Duration,
    frontend_url: String,
    admin_bootstrap_enabled: bool,
    rng: SystemRandom,
}

impl AuthService {
    pub fn new(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        mailer: Arc<dyn ResetMailer>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            hasher: PasswordHasher::new(config.bcrypt_cost)?,
            captcha: CaptchaGate::new(config)?,
            mailer,
            min_password_length: config.min_password_length,
            reset_token_ttl: config.reset_token_ttl,
            frontend_url: config.frontend_url.clone(),
            admin_bootstrap_enabled: config.admin_bootstrap_enabled,
            rng: SystemRandom::new(),
        })
    }

    fn check_password_policy(&self, password: &str) -> Result<()> {
        if password.chars().count() < self.min_password_length {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                self.min_password_length
            )));
        }
        Ok(())
    }

    /// Verify email and password.
    ///
    /// Unknown email, social-only account and wrong password all produce the
    /// same error after the same amount of hashing work.
    pub async fn login(&self, req: LoginRequest) -> Result<User> {
        let (Some(email), Some(password)) = (non_empty(req.email), non_empty(req.password)) else {
            return Err(AppError::Validation(
                "Email and password are required".to_string(),
            ));
        };

        self.captcha.verify(req.captcha_token.as_deref()).await?;

        let user = match self.store.find_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                self.hasher.verify_dummy(&password).await;
                return Err(AppError::InvalidCredentials(INVALID_LOGIN));
            }
        };

        let verified = match user.password_hash.as_deref() {
            Some(digest) => self.hasher.verify(&password, digest).await,
            None => {
                self.hasher.verify_dummy(&password).await;
                false
            }
        };
        if !verified {
            tracing::debug!(user_id = %user.id, "Login rejected");
            return Err(AppError::InvalidCredentials(INVALID_LOGIN));
        }

        if user.is_blocked {
            tracing::warn!(user_id = %user.id, "Blocked user attempted login");
            return Err(AppError::Forbidden("Account is blocked".to_string()));
        }

        tracing::info!(user_id = %user.id, "User logged in");
        Ok(user)
    }

    /// Create an account. The duplicate check runs before any hashing.
    pub async fn register(&self, req: Registration) -> Result<User> {
        req.validate().map_err(validation_message)?;

        let (Some(email), Some(password), Some(first_name), Some(last_name)) = (
            non_empty(req.email),
            non_empty(req.password),
            non_empty(req.first_name),
            non_empty(req.last_name),
        ) else {
            return Err(AppError::Validation("All fields are required".to_string()));
        };
        self.check_password_policy(&password)?;

        self.captcha.verify(req.captcha_token.as_deref()).await?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AppError::DuplicateAccount);
        }

        let password_hash = self.hasher.hash(&password).await?;

        // A fresh id forces an insert; a racing registration then trips the
        // unique email constraint instead of merging into the other account.
        let user = self
            .store
            .upsert_user(UserPatch {
                email: Some(Some(email)),
                first_name: Some(Some(first_name.trim().to_string())),
                last_name: Some(Some(last_name.trim().to_string())),
                password_hash: Some(Some(password_hash)),
                ..UserPatch::for_id(Uuid::new_v4().to_string())
            })
            .await?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    pub async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<User> {
        let trimmed = |field: Option<Option<String>>| {
            field.map(|value| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
        };

        self.store
            .upsert_user(UserPatch {
                first_name: trimmed(update.first_name),
                last_name: trimmed(update.last_name),
                profile_image_url: trimmed(update.profile_image_url),
                ..UserPatch::for_id(user_id)
            })
            .await
    }

    /// Verify an admin PIN and password.
    pub async fn admin_login(&self, req: AdminLoginRequest) -> Result<Admin> {
        let (Some(pin), Some(password)) = (non_empty(req.pin), non_empty(req.password)) else {
            return Err(AppError::Validation(
                "PIN and password are required".to_string(),
            ));
        };

        let admin = match self.store.find_admin_by_pin(pin.trim()).await? {
            Some(admin) => admin,
            None => {
                self.hasher.verify_dummy(&password).await;
                return Err(AppError::InvalidCredentials(INVALID_ADMIN_LOGIN));
            }
        };

        if !self.hasher.verify(&password, &admin.password_hash).await {
            tracing::debug!(admin_id = %admin.id, "Admin login rejected");
            return Err(AppError::InvalidCredentials(INVALID_ADMIN_LOGIN));
        }

        tracing::info!(admin_id = %admin.id, "Admin logged in");
        Ok(admin)
    }

    /// Admin creation needs an admin session, except for the very first admin.
    ///
    /// This is only an early refusal. The bootstrap insert itself is
    /// conditional, see [`Self::bootstrap_admin`].
    pub async fn authorize_admin_creation(&self, has_admin_session: bool) -> Result<()> {
        if has_admin_session {
            return Ok(());
        }

        if self.admin_bootstrap_enabled && self.store.count_admins().await? == 0 {
            return Ok(());
        }

        Err(AppError::Unauthenticated)
    }

    async fn admin_password_hash(&self, pin: &str, password: &str) -> Result<String> {
        if pin.is_empty() || password.is_empty() {
            return Err(AppError::Validation(
                "PIN and password are required".to_string(),
            ));
        }
        self.check_password_policy(password)?;
        self.hasher.hash(password).await
    }

    /// Set the password for `pin`, creating the admin if needed.
    pub async fn create_admin(&self, pin: &str, password: &str) -> Result<Admin> {
        let pin = pin.trim();
        let password_hash = self.admin_password_hash(pin, password).await?;
        let admin = self.store.set_admin_password(pin, &password_hash).await?;
        tracing::info!(admin_id = %admin.id, "Admin credentials set");
        Ok(admin)
    }

    /// Create the first admin without a session.
    ///
    /// The store inserts only while the admin table is empty, so of two
    /// racing bootstrap requests exactly one succeeds.
    pub async fn bootstrap_admin(&self, pin: &str, password: &str) -> Result<Admin> {
        if !self.admin_bootstrap_enabled {
            return Err(AppError::Unauthenticated);
        }

        let pin = pin.trim();
        let password_hash = self.admin_password_hash(pin, password).await?;
        match self.store.create_first_admin(pin, &password_hash).await? {
            Some(admin) => {
                tracing::warn!(admin_id = %admin.id, "Bootstrap admin created without a session");
                Ok(admin)
            }
            None => {
                tracing::warn!("Bootstrap admin creation refused, an admin already exists");
                Err(AppError::Unauthenticated)
            }
        }
    }

    /// Delete an admin. The last remaining admin cannot be removed.
    pub async fn delete_admin(&self, id: &str) -> Result<()> {
        let admins = self.store.list_admins().await?;
        if !admins.iter().any(|a| a.id == id) {
            return Err(AppError::NotFound("Admin".to_string()));
        }
        if admins.len() == 1 {
            return Err(AppError::Validation(
                "Cannot delete the last admin".to_string(),
            ));
        }

        self.store.delete_admin(id).await?;
        Ok(())
    }

    /// Issue a reset token if the account exists. Always looks like success.
    pub async fn forgot_password(&self, req: ForgotPasswordRequest) -> Result<()> {
        let Some(email) = non_empty(req.email) else {
            return Err(AppError::Validation("Email is required".to_string()));
        };

        self.captcha.verify(req.captcha_token.as_deref()).await?;

        let Some(user) = self.store.find_user_by_email(&email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let token = hex::encode(random_bytes::<RESET_TOKEN_BYTES>(&self.rng)?);
        let expiry = Utc::now() + self.reset_token_ttl;
        self.store
            .update_reset_token(&user.id, &sha256_hex(&token), expiry)
            .await?;

        let reset_url = format!(
            "{}/reset-password?token={}",
            self.frontend_url.trim_end_matches('/'),
            token
        );
        let to = user.email.clone().unwrap_or(email);
        let mailer = Arc::clone(&self.mailer);
        let user_id = user.id;

        // Delivery failures must not change the response.
        tokio::spawn(async move {
            if let Err(e) = mailer.send_reset(&to, &token, &reset_url).await {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to dispatch reset email");
            }
        });

        Ok(())
    }

    /// Redeem a reset token. Returns the user whose password changed.
    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<User> {
        let (Some(token), Some(new_password)) = (non_empty(req.token), req.new_password) else {
            return Err(AppError::Validation(
                "Token and new password are required".to_string(),
            ));
        };
        self.check_password_policy(&new_password)?;

        let token_hash = sha256_hex(token.trim());
        let user = self
            .store
            .find_user_by_reset_token(&token_hash)
            .await?
            .ok_or(AppError::InvalidResetToken)?;

        match user.reset_token_expiry {
            Some(expiry) if expiry > Utc::now() => {}
            _ => {
                self.store.clear_reset_token(&user.id).await?;
                return Err(AppError::InvalidResetToken);
            }
        }

        let password_hash = self.hasher.hash(&new_password).await?;
        if !self
            .store
            .reset_password(&user.id, &token_hash, &password_hash)
            .await?
        {
            // Another request redeemed the token first
            return Err(AppError::InvalidResetToken);
        }

        tracing::info!(user_id = %user.id, "Password reset completed");
        Ok(user)
    }
}
