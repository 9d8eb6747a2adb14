// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Self-contained identity tokens (HS256 JWT).
//!
//! The token carries a minimal claim set so a stateless deployment can
//! recognise a returning user. The claim is only a pointer: the resolver
//! always re-reads the user record before trusting it.

use crate::models::User;
use chrono::{Duration, Utc};
use hkdf::Hkdf;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// HKDF label for the token signing key.
const TOKEN_KEY_LABEL: &str = "projecthub identity token v1";

/// Derive a 32-byte purpose-specific key from the root secret.
pub fn derive_key(secret: &[u8], label: &str) -> [u8; 32] {
    let mut okm = [0u8; 32];
    // 32 bytes is well under the HKDF-SHA256 output limit, expand cannot fail.
    let _ = Hkdf::<Sha256>::new(None, secret).expand(label.as_bytes(), &mut okm);
    okm
}

/// Claims embedded in an identity token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityClaims {
    /// User id. Defaulted so a missing value is reported as such, not as a parse error.
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    /// The user's credential version when the token was minted
    #[serde(default)]
    pub credential_version: i64,
    pub iat: i64,
    pub exp: i64,
}

/// Why a token was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is not valid transport encoding")]
    Encoding,
    #[error("token payload is not a well-formed claim object")]
    Malformed,
    #[error("token payload has no user id")]
    MissingIdentity,
    #[error("token signature does not verify")]
    Signature,
    #[error("token has expired")]
    Expired,
}

/// Signs and verifies identity tokens.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let key = derive_key(secret, TOKEN_KEY_LABEL);
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(&key),
            decoding_key: DecodingKey::from_secret(&key),
            validation,
            ttl,
        }
    }

    /// Issue a token for `user`, valid for the configured TTL.
    pub fn encode(&self, user: &User) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        self.encode_claims(&IdentityClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            profile_image_url: user.profile_image_url.clone(),
            credential_version: user.credential_version,
            iat: now,
            exp: now + self.ttl.num_seconds(),
        })
    }

    pub fn encode_claims(&self, claims: &IdentityClaims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, "Failed to sign identity token");
            TokenError::Encoding
        })
    }

    /// Verify and decode a token. Every failure is classified, never raised.
    pub fn decode(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        let data = decode::<IdentityClaims>(token.trim(), &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::Signature,
                ErrorKind::Json(_) | ErrorKind::Utf8(_) | ErrorKind::MissingRequiredClaim(_) => {
                    TokenError::Malformed
                }
                _ => TokenError::Encoding,
            })?;

        if data.claims.sub.trim().is_empty() {
            return Err(TokenError::MissingIdentity);
        }
        Ok(data.claims)
    }
}
