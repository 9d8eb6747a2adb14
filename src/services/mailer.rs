// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Out-of-band delivery of password reset links.

use async_trait::async_trait;

/// Sends password reset messages. Delivery itself is someone else's job.
#[async_trait]
pub trait ResetMailer: Send + Sync {
    async fn send_reset(&self, to: &str, token: &str, reset_url: &str) -> anyhow::Result<()>;
}

/// Records the dispatch in the log. Never logs the token.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl ResetMailer for LogMailer {
    async fn send_reset(&self, to: &str, _token: &str, _reset_url: &str) -> anyhow::Result<()> {
        tracing::info!(to, "Password reset link issued (no mail transport configured)");
        Ok(())
    }
}
