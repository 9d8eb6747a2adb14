// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Server-held sessions keyed by an unguessable random id.
//!
//! The client only ever sees the raw id. The store only ever sees its
//! SHA-256 digest, so a leaked session table cannot be replayed.

use crate::db::SessionStore;
use crate::error::AppError;
use crate::models::{SessionRecord, SessionState};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Raw session ids are 32 random bytes.
const SESSION_ID_BYTES: usize = 32;

/// Length of a base64url (unpadded) encoding of `SESSION_ID_BYTES`.
const SESSION_ID_LEN: usize = 43;

/// Fill a fixed-size buffer from the system CSPRNG.
pub(crate) fn random_bytes<const N: usize>(rng: &SystemRandom) -> Result<[u8; N], AppError> {
    let mut bytes = [0u8; N];
    rng.fill(&mut bytes)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("system random generator failed")))?;
    Ok(bytes)
}

/// Lowercase hex SHA-256, the storage form of bearer secrets.
pub(crate) fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// A freshly issued session id and when it lapses.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
    rng: SystemRandom,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            rng: SystemRandom::new(),
        }
    }

    /// Storage key for a raw session id.
    pub fn hash_id(id: &str) -> String {
        sha256_hex(id)
    }

    /// Cheap shape check so junk cookies never reach the store.
    pub fn is_well_formed(id: &str) -> bool {
        id.len() == SESSION_ID_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    /// Persist `state` under a brand new id.
    ///
    /// The write completes before this returns, so a response carrying the
    /// id never races the row it points at.
    pub async fn establish(&self, state: SessionState) -> Result<IssuedSession, AppError> {
        let id = URL_SAFE_NO_PAD.encode(random_bytes::<SESSION_ID_BYTES>(&self.rng)?);
        let now = Utc::now();
        let record = SessionRecord {
            id_hash: Self::hash_id(&id),
            state,
            created_at: now,
            expires_at: now + self.ttl,
        };

        self.store.save(&record).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to persist session");
            e
        })?;

        Ok(IssuedSession {
            id,
            expires_at: record.expires_at,
        })
    }

    /// Live state for a raw id, or `None` when unknown, expired or malformed.
    pub async fn load(&self, id: &str) -> Result<Option<SessionState>, AppError> {
        if !Self::is_well_formed(id) {
            return Ok(None);
        }
        Ok(self
            .store
            .load(&Self::hash_id(id))
            .await?
            .map(|record| record.state))
    }

    /// Hard-delete a session. Unknown ids are not an error.
    pub async fn destroy(&self, id: &str) -> Result<(), AppError> {
        if !Self::is_well_formed(id) {
            return Ok(());
        }
        self.store.delete(&Self::hash_id(id)).await
    }

    pub async fn destroy_for_user(&self, user_id: &str) -> Result<u64, AppError> {
        let removed = self.store.delete_for_user(user_id).await?;
        if removed > 0 {
            tracing::info!(user_id, removed, "Terminated user sessions");
        }
        Ok(removed)
    }

    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        self.store.purge_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteDb;
    use async_trait::async_trait;

    fn manager() -> SessionManager {
        let db = SqliteDb::open_in_memory().unwrap();
        SessionManager::new(Arc::new(db), Duration::hours(24))
    }

    #[tokio::test]
    async fn test_establish_load_destroy() {
        let sessions = manager();
        let state = SessionState::User {
            user_id: "u1".to_string(),
        };

        let issued = sessions.establish(state.clone()).await.unwrap();
        assert!(SessionManager::is_well_formed(&issued.id));
        assert_eq!(sessions.load(&issued.id).await.unwrap(), Some(state));

        sessions.destroy(&issued.id).await.unwrap();
        assert_eq!(sessions.load(&issued.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_stored_hashed() {
        let sessions = manager();
        let a = sessions.establish(SessionState::Anonymous).await.unwrap();
        let b = sessions.establish(SessionState::Anonymous).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(SessionManager::hash_id(&a.id), a.id);
        assert_eq!(SessionManager::hash_id(&a.id).len(), 64);
    }

    #[tokio::test]
    async fn test_malformed_ids_resolve_to_none() {
        let sessions = manager();
        let too_long = "x".repeat(SESSION_ID_LEN + 1);
        for id in ["", "short", "s%3Aabc.def", too_long.as_str()] {
            assert_eq!(sessions.load(id).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_expired_session_is_absent() {
        let db = SqliteDb::open_in_memory().unwrap();
        let sessions = SessionManager::new(Arc::new(db), Duration::seconds(-1));
        let issued = sessions
            .establish(SessionState::User {
                user_id: "u1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(sessions.load(&issued.id).await.unwrap(), None);
    }

    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn save(&self, _: &SessionRecord) -> Result<(), AppError> {
            Err(AppError::Database("disk full".to_string()))
        }
        async fn load(&self, _: &str) -> Result<Option<SessionRecord>, AppError> {
            Err(AppError::Database("disk full".to_string()))
        }
        async fn delete(&self, _: &str) -> Result<(), AppError> {
            Ok(())
        }
        async fn delete_for_user(&self, _: &str) -> Result<u64, AppError> {
            Ok(0)
        }
        async fn purge_expired(&self) -> Result<u64, AppError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_save_failure_is_internal_not_auth() {
        let sessions = SessionManager::new(Arc::new(BrokenStore), Duration::hours(1));
        let err = sessions
            .establish(SessionState::Anonymous)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
