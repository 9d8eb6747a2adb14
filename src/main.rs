// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! ProjectHub API Server
//!
//! Serves account registration, login and session identity, plus an
//! admin maintenance subcommand for provisioning dashboard operators.

use anyhow::Context;
use clap::{Arg, Command};
use projecthub::{config::Config, db::SqliteDb, services::LogMailer, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    Command::new("projecthub")
        .about("ProjectHub account and session service")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand(
            Command::new("create-admin")
                .about("Create an admin, or reset the password of an existing PIN")
                .arg(Arg::new("pin").help("Admin PIN").required(true))
                .arg(Arg::new("password").help("Admin password").required(true)),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging();

    let matches = cli().get_matches();

    // Load configuration from environment
    let config = Config::from_env().context("Failed to load configuration")?;

    let db = SqliteDb::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path))?;

    let state = Arc::new(AppState::build(config.clone(), db, Arc::new(LogMailer))?);

    if let Some(("create-admin", sub)) = matches.subcommand() {
        let pin = sub
            .get_one::<String>("pin")
            .context("missing required argument: pin")?;
        let password = sub
            .get_one::<String>("password")
            .context("missing required argument: password")?;

        let admin = state.auth.create_admin(pin, password).await?;
        tracing::info!(admin_id = %admin.id, pin = %admin.pin, "Admin credentials stored");
        return Ok(());
    }

    tracing::info!(
        port = config.port,
        carrier = ?config.identity_carrier,
        environment = ?config.environment,
        "Starting ProjectHub API"
    );

    let purged = state.identity.sessions().purge_expired().await?;
    if purged > 0 {
        tracing::info!(purged, "Removed expired sessions");
    }

    // Build router
    let app = projecthub::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("projecthub=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
