// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod auth;
pub mod captcha;
pub mod identity;
pub mod mailer;
pub mod password;
pub mod session;
pub mod social;
pub mod token;

pub use auth::AuthService;
pub use captcha::{CaptchaError, CaptchaGate};
pub use identity::{
    AdminSession, CarriedIdentity, IdentityResolver, PresentedCredential, Rejection, Resolution,
    ResolvedIdentity,
};
pub use mailer::{LogMailer, ResetMailer};
pub use password::PasswordHasher;
pub use session::{IssuedSession, SessionManager};
pub use social::{ProviderEndpoints, SocialError, SocialLogin, SocialProfile};
pub use token::{IdentityClaims, TokenCodec, TokenError};
