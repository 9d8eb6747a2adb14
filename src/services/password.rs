// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! bcrypt password hashing, offloaded to the blocking pool.

use crate::error::AppError;

/// Hashes and verifies user and admin passwords.
#[derive(Clone)]
pub struct PasswordHasher {
    cost: u32,
    /// Digest of a throwaway password, verified when no real digest exists
    dummy_hash: String,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> anyhow::Result<Self> {
        let dummy_hash = bcrypt::hash("projecthub-timing-equalizer", cost)?;
        Ok(Self { cost, dummy_hash })
    }

    /// Salted one-way hash. Two calls on the same input give different digests.
    pub async fn hash(&self, plaintext: &str) -> Result<String, AppError> {
        let plaintext = plaintext.to_string();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, cost))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("hash task failed: {e}")))?
            .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {e}")))
    }

    /// Returns `false` on mismatch, malformed digest or internal failure.
    pub async fn verify(&self, plaintext: &str, digest: &str) -> bool {
        let (plaintext, digest) = (plaintext.to_string(), digest.to_string());
        match tokio::task::spawn_blocking(move || bcrypt::verify(plaintext, &digest)).await {
            Ok(Ok(matched)) => matched,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Stored password digest is malformed");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Password verification task failed");
                false
            }
        }
    }

    /// Spend one verification's worth of time without a real digest.
    pub async fn verify_dummy(&self, plaintext: &str) {
        let _ = self.verify(plaintext, &self.dummy_hash).await;
    }
}
