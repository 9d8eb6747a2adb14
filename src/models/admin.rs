// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Dashboard operator credentials, kept apart from user accounts.

use chrono::{DateTime, Utc};
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Admin record keyed by PIN.
#[derive(Debug, Clone, PartialEq)]
pub struct Admin {
    pub id: String,
    /// Unique, acts as the username
    pub pin: String,
    pub password_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl Admin {
    pub fn view(&self) -> AdminView {
        AdminView {
            id: self.id.clone(),
            pin: self.pin.clone(),
            updated_at: crate::time_utils::format_utc_rfc3339(self.updated_at),
        }
    }
}

/// Admin listing entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AdminView {
    pub id: String,
    pub pin: String,
    pub updated_at: String,
}
