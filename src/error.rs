// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Generic message for failed user logins. Wrong email and wrong password share it.
pub const INVALID_LOGIN: &str = "Invalid email or password";

/// Generic message for failed admin logins.
pub const INVALID_ADMIN_LOGIN: &str = "Invalid PIN or password";

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidCredentials(&'static str),

    #[error("Email already registered")]
    DuplicateAccount,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Security verification failed")]
    SecurityVerificationFailed,

    #[error("Invalid or expired reset token")]
    InvalidResetToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials(_) | AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::DuplicateAccount
            | AppError::Validation(_)
            | AppError::SecurityVerificationFailed
            | AppError::InvalidResetToken => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidCredentials(_) => "invalid_credentials",
            AppError::DuplicateAccount => "duplicate_account",
            AppError::Unauthenticated => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::Validation(_) => "validation_error",
            AppError::SecurityVerificationFailed => "security_verification_failed",
            AppError::InvalidResetToken => "invalid_reset_token",
            AppError::NotFound(_) => "not_found",
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to show a client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::InvalidCredentials(msg) => (*msg).to_string(),
            AppError::Forbidden(msg) | AppError::Validation(msg) => msg.clone(),
            AppError::NotFound(what) => format!("{what} not found"),
            AppError::Database(_) | AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
            }
            AppError::Internal(err) => {
                tracing::error!(error = ?err, "Internal server error");
            }
            other => {
                tracing::debug!(code = other.code(), "Request rejected");
            }
        }

        let body = ErrorResponse {
            error: self.code(),
            message: self.public_message(),
        };

        (self.status(), Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
