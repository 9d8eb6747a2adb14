// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity resolution: turn whatever the client carried into a trusted user.
//!
//! Two carriers are supported, selected by deployment config:
//!
//! - `Session`: the cookie holds an opaque id; the claim lives server-side.
//! - `Token`: the cookie (or `X-User-Session` header) holds a signed token.
//!
//! Either way the user record is re-read on every request, so blocks and
//! password resets take effect immediately. Every failure to resolve is an
//! explicit [`Rejection`]; `Err` is reserved for internal failures.

use crate::config::{Config, IdentityCarrier};
use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::{Admin, SessionState, User};
use crate::services::session::{IssuedSession, SessionManager};
use crate::services::token::{TokenCodec, TokenError};
use std::sync::Arc;

/// Raw credential material pulled off a request.
#[derive(Debug, Clone, Default)]
pub struct PresentedCredential {
    /// Value of the identity cookie
    pub cookie: Option<String>,
    /// Value of `X-User-Session` or an `Authorization: Bearer` token
    pub header: Option<String>,
}

impl PresentedCredential {
    fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    fn header(&self) -> Option<&str> {
        self.header.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Why a request is unauthenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Nothing was presented
    Missing,
    /// Something was presented but it is not a valid credential
    Invalid,
    /// Session unknown or lapsed, or token past its expiry
    Expired,
    /// Credential was valid but the user no longer exists
    UnknownUser,
    /// Credential was valid but the user is blocked
    Blocked,
    /// Credential is a live admin dashboard session, not a user identity
    AdminIdentity,
}

impl Rejection {
    pub fn message(self) -> &'static str {
        match self {
            Rejection::Missing => "Authentication required",
            Rejection::Invalid => "Invalid session",
            Rejection::Expired => "Session expired",
            Rejection::UnknownUser => "User not found",
            Rejection::Blocked => "Account is blocked",
            Rejection::AdminIdentity => "Authentication required",
        }
    }

    /// Whether the presented cookie is dead and should be cleared.
    ///
    /// An admin session shares the cookie and stays untouched.
    pub fn voids_cookie(self) -> bool {
        !matches!(self, Rejection::Missing | Rejection::AdminIdentity)
    }
}

/// A user whose carried identity checked out against the credential store.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    /// Freshly loaded record, never the claim from the token
    pub user: User,
    pub carrier: IdentityCarrier,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Authenticated(ResolvedIdentity),
    Unauthenticated(Rejection),
}

/// Identity to hand back to a client after a successful login.
#[derive(Debug, Clone)]
pub struct CarriedIdentity {
    /// Goes into the identity cookie
    pub cookie_value: String,
    /// Echoed in the body for header-based clients (token carrier only)
    pub session_token: Option<String>,
}

/// A live admin dashboard session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    pub admin_id: String,
    pub pin: String,
}

pub struct IdentityResolver {
    carrier: IdentityCarrier,
    sessions: SessionManager,
    codec: TokenCodec,
    store: Arc<dyn CredentialStore>,
}

impl IdentityResolver {
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>, sessions: SessionManager) -> Self {
        Self {
            carrier: config.identity_carrier,
            codec: TokenCodec::new(&config.session_secret, config.session_ttl),
            sessions,
            store,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Resolve a request's carried identity.
    pub async fn resolve(&self, presented: &PresentedCredential) -> Result<Resolution, AppError> {
        match self.carrier {
            IdentityCarrier::Session => self.resolve_session(presented.cookie()).await,
            IdentityCarrier::Token => {
                self.resolve_token(presented.cookie().or(presented.header()))
                    .await
            }
        }
    }

    async fn resolve_session(&self, id: Option<&str>) -> Result<Resolution, AppError> {
        let Some(id) = id else {
            return Ok(Resolution::Unauthenticated(Rejection::Missing));
        };
        if !SessionManager::is_well_formed(id) {
            return Ok(Resolution::Unauthenticated(Rejection::Invalid));
        }

        let user_id = match self.sessions.load(id).await? {
            None => return Ok(Resolution::Unauthenticated(Rejection::Expired)),
            Some(SessionState::User { user_id }) => user_id,
            Some(SessionState::Admin { .. }) => {
                return Ok(Resolution::Unauthenticated(Rejection::AdminIdentity))
            }
            Some(SessionState::Anonymous) => {
                return Ok(Resolution::Unauthenticated(Rejection::Invalid))
            }
        };

        let resolution = self.check_user(&user_id).await?;
        if matches!(
            resolution,
            Resolution::Unauthenticated(Rejection::UnknownUser | Rejection::Blocked)
        ) {
            self.sessions.destroy(id).await?;
        }
        Ok(resolution)
    }

    async fn resolve_token(&self, token: Option<&str>) -> Result<Resolution, AppError> {
        let Some(token) = token else {
            return Ok(Resolution::Unauthenticated(Rejection::Missing));
        };

        // Admin sessions are server-held even in token mode
        if self.is_admin_session(token).await? {
            return Ok(Resolution::Unauthenticated(Rejection::AdminIdentity));
        }

        let claims = match self.codec.decode(token) {
            Ok(claims) => claims,
            Err(TokenError::Expired) => return Ok(Resolution::Unauthenticated(Rejection::Expired)),
            Err(e) => {
                tracing::debug!(reason = %e, "Rejected identity token");
                return Ok(Resolution::Unauthenticated(Rejection::Invalid));
            }
        };

        match self.check_user(&claims.sub).await? {
            Resolution::Authenticated(identity)
                if identity.user.credential_version != claims.credential_version =>
            {
                tracing::debug!(user_id = %claims.sub, "Identity token predates a password change");
                Ok(Resolution::Unauthenticated(Rejection::Expired))
            }
            resolution => Ok(resolution),
        }
    }

    /// Re-read the user and apply the account checks.
    async fn check_user(&self, user_id: &str) -> Result<Resolution, AppError> {
        let Some(user) = self.store.find_user_by_id(user_id).await? else {
            tracing::debug!(user_id, "Carried identity names an unknown user");
            return Ok(Resolution::Unauthenticated(Rejection::UnknownUser));
        };

        if user.is_blocked {
            tracing::info!(user_id, "Carried identity belongs to a blocked user");
            return Ok(Resolution::Unauthenticated(Rejection::Blocked));
        }

        Ok(Resolution::Authenticated(ResolvedIdentity {
            user,
            carrier: self.carrier,
        }))
    }

    async fn is_admin_session(&self, id: &str) -> Result<bool, AppError> {
        if !SessionManager::is_well_formed(id) {
            return Ok(false);
        }
        Ok(matches!(
            self.sessions.load(id).await?,
            Some(SessionState::Admin { .. })
        ))
    }

    /// Admin dashboard check. The session flag alone is enough.
    pub async fn resolve_admin(&self, cookie: Option<&str>) -> Result<Option<AdminSession>, AppError> {
        let Some(id) = cookie.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };

        match self.sessions.load(id).await? {
            Some(SessionState::Admin { admin_id, pin }) => Ok(Some(AdminSession { admin_id, pin })),
            _ => Ok(None),
        }
    }

    /// Issue a carried identity for a freshly authenticated user.
    pub async fn establish_user(&self, user: &User) -> Result<CarriedIdentity, AppError> {
        match self.carrier {
            IdentityCarrier::Session => {
                let IssuedSession { id, .. } = self
                    .sessions
                    .establish(SessionState::User {
                        user_id: user.id.clone(),
                    })
                    .await?;
                Ok(CarriedIdentity {
                    cookie_value: id,
                    session_token: None,
                })
            }
            IdentityCarrier::Token => {
                let token = self.codec.encode(user).map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("identity token issue failed: {e}"))
                })?;
                Ok(CarriedIdentity {
                    cookie_value: token.clone(),
                    session_token: Some(token),
                })
            }
        }
    }

    /// Admin identity is always server-held, whatever the user carrier.
    pub async fn establish_admin(&self, admin: &Admin) -> Result<String, AppError> {
        let issued = self
            .sessions
            .establish(SessionState::Admin {
                admin_id: admin.id.clone(),
                pin: admin.pin.clone(),
            })
            .await?;
        Ok(issued.id)
    }

    /// End whatever session the cookie points at.
    ///
    /// A self-contained token cannot be revoked here; the caller clears the
    /// cookie and the token lapses at its expiry.
    pub async fn end(&self, cookie: Option<&str>) -> Result<(), AppError> {
        match cookie.map(str::trim) {
            Some(id) if SessionManager::is_well_formed(id) => self.sessions.destroy(id).await,
            _ => Ok(()),
        }
    }

    /// End a user identity, leaving an admin session in the cookie alone.
    ///
    /// Returns `false` when the cookie held an admin session.
    pub async fn end_user(&self, cookie: Option<&str>) -> Result<bool, AppError> {
        let cookie = cookie.map(str::trim);
        if let Some(id) = cookie {
            if self.is_admin_session(id).await? {
                return Ok(false);
            }
        }
        self.end(cookie).await?;
        Ok(true)
    }

    /// Terminate every session held by a user (block, password reset).
    pub async fn end_all_for_user(&self, user_id: &str) -> Result<u64, AppError> {
        self.sessions.destroy_for_user(user_id).await
    }
}
