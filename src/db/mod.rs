// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer: credential and session storage.

pub mod sqlite;

pub use sqlite::SqliteDb;

use crate::error::AppError;
use crate::models::{Admin, SessionRecord, SocialProvider, User, UserPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Table names as constants.
pub mod tables {
    pub const USERS: &str = "users";
    pub const ADMINS: &str = "admin_credentials";
    pub const SESSIONS: &str = "sessions";
}

/// Persistent user and admin records.
///
/// Every operation is atomic at the single-record level.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, AppError>;

    async fn find_user_by_social_id(
        &self,
        provider: SocialProvider,
        social_id: &str,
    ) -> Result<Option<User>, AppError>;

    /// Look up a user by the SHA-256 hex digest of their reset token.
    async fn find_user_by_reset_token(&self, token_hash: &str) -> Result<Option<User>, AppError>;

    /// Create a user, or merge the patch into the one matched by id or email.
    async fn upsert_user(&self, patch: UserPatch) -> Result<User, AppError>;

    async fn list_users(&self) -> Result<Vec<User>, AppError>;

    /// Returns the updated user, or `None` when the id is unknown.
    async fn set_user_blocked(&self, id: &str, blocked: bool) -> Result<Option<User>, AppError>;

    async fn update_reset_token(
        &self,
        user_id: &str,
        token_hash: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn clear_reset_token(&self, user_id: &str) -> Result<(), AppError>;

    /// Replace the password, consume the reset token and bump the user's
    /// credential version in one statement.
    ///
    /// Returns `false` when the token no longer matches or has lapsed, so a
    /// token can only ever be redeemed once and never after its expiry.
    async fn reset_password(
        &self,
        user_id: &str,
        token_hash: &str,
        password_hash: &str,
    ) -> Result<bool, AppError>;

    async fn find_admin_by_pin(&self, pin: &str) -> Result<Option<Admin>, AppError>;

    /// Upsert by PIN: update the hash if the PIN exists, else create.
    async fn set_admin_password(&self, pin: &str, password_hash: &str) -> Result<Admin, AppError>;

    /// Create an admin only if none exist, as one statement.
    ///
    /// Returns `None` when another admin already exists.
    async fn create_first_admin(
        &self,
        pin: &str,
        password_hash: &str,
    ) -> Result<Option<Admin>, AppError>;

    async fn list_admins(&self) -> Result<Vec<Admin>, AppError>;

    async fn delete_admin(&self, id: &str) -> Result<bool, AppError>;

    async fn count_admins(&self) -> Result<u64, AppError>;
}

/// Durable session storage keyed by session id digest.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, record: &SessionRecord) -> Result<(), AppError>;

    /// Load a live session. Expired rows are treated as absent.
    async fn load(&self, id_hash: &str) -> Result<Option<SessionRecord>, AppError>;

    async fn delete(&self, id_hash: &str) -> Result<(), AppError>;

    /// Delete every session belonging to a user, returning how many went.
    async fn delete_for_user(&self, user_id: &str) -> Result<u64, AppError>;

    async fn purge_expired(&self) -> Result<u64, AppError>;
}
