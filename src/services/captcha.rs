// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Captcha gate in front of credential submission endpoints.
//!
//! Wraps Cloudflare Turnstile's siteverify call. The enforcement policy
//! and secret live here and nowhere else.

use crate::config::Config;
use crate::error::AppError;
use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a captcha token was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptchaError {
    #[error("captcha token missing")]
    MissingToken,
    #[error("captcha rejected: {0:?}")]
    Rejected(Vec<String>),
    #[error("captcha verifier unreachable: {0}")]
    Transport(String),
}

impl From<CaptchaError> for AppError {
    fn from(err: CaptchaError) -> Self {
        tracing::warn!(reason = %err, "Security verification failed");
        AppError::SecurityVerificationFailed
    }
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct CaptchaGate {
    http_client: reqwest::Client,
    secret: String,
    verify_url: String,
    enforced: bool,
}

impl CaptchaGate {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::with_policy(
            config.turnstile_secret.clone(),
            config.turnstile_verify_url.clone(),
            config.captcha_enforced,
        )
    }

    pub fn with_policy(
        secret: impl Into<String>,
        verify_url: impl Into<String>,
        enforced: bool,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(VERIFY_TIMEOUT)
            .build()
            .context("failed building captcha HTTP client")?;

        Ok(Self {
            http_client,
            secret: secret.into(),
            verify_url: verify_url.into(),
            enforced,
        })
    }

    /// Check a client-supplied token. Fails closed when enforcement is on.
    pub async fn verify(&self, token: Option<&str>) -> Result<(), CaptchaError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());

        if !self.enforced {
            if token.is_some() {
                tracing::debug!("Captcha not enforced, skipping supplied token");
            }
            return Ok(());
        }

        let token = token.ok_or(CaptchaError::MissingToken)?;

        let response = self
            .http_client
            .post(&self.verify_url)
            .form(&[("secret", self.secret.as_str()), ("response", token)])
            .send()
            .await
            .map_err(|e| CaptchaError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CaptchaError::Transport(format!(
                "verifier returned {}",
                response.status()
            )));
        }

        let body: SiteVerifyResponse = response
            .json()
            .await
            .map_err(|e| CaptchaError::Transport(e.to_string()))?;

        if body.success {
            Ok(())
        } else {
            Err(CaptchaError::Rejected(body.error_codes))
        }
    }
}
