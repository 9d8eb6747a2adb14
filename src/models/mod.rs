// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod admin;
pub mod session;
pub mod user;

pub use admin::{Admin, AdminView};
pub use session::{SessionRecord, SessionState};
pub use user::{normalize_email, SocialProvider, User, UserPatch, UserSummary, UserView};
