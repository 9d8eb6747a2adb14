// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! ProjectHub: account and session identity service
//!
//! This crate provides the backend API that establishes who a caller is
//! (email login, social login, admin PIN login) and re-validates that
//! identity on every request.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::{CredentialStore, SqliteDb};
use services::{AuthService, IdentityResolver, ResetMailer, SessionManager, SocialLogin};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CredentialStore>,
    pub identity: IdentityResolver,
    pub auth: AuthService,
    pub social: SocialLogin,
}

impl AppState {
    /// Wire every service over one database.
    pub fn build(config: Config, db: SqliteDb, mailer: Arc<dyn ResetMailer>) -> anyhow::Result<Self> {
        let store: Arc<dyn CredentialStore> = Arc::new(db.clone());
        let sessions = SessionManager::new(Arc::new(db), config.session_ttl);

        Ok(Self {
            identity: IdentityResolver::new(&config, Arc::clone(&store), sessions),
            auth: AuthService::new(&config, Arc::clone(&store), mailer)?,
            social: SocialLogin::new(&config)?,
            store,
            config,
        })
    }
}
