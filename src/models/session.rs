// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Server-held session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who a session speaks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SessionState {
    Anonymous,
    User { user_id: String },
    Admin { admin_id: String, pin: String },
}

impl SessionState {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            SessionState::User { user_id } => Some(user_id),
            _ => None,
        }
    }
}

/// Persisted session row. Only a digest of the session id is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id_hash: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
