// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! SQLite-backed credential and session storage.
//!
//! One connection sits behind a mutex and every statement runs on the
//! blocking thread pool, so slow disk I/O never stalls the async runtime.

use crate::db::{tables, CredentialStore, SessionStore};
use crate::error::AppError;
use crate::models::{
    normalize_email, Admin, SessionRecord, SessionState, SocialProvider, User, UserPatch,
};
use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Current schema version
const SCHEMA_VERSION: i32 = 2;

const USER_COLUMNS: &str = "id, email, first_name, last_name, profile_image_url, username, \
     password_hash, google_id, discord_id, facebook_id, is_blocked, is_admin, \
     reset_token_hash, reset_token_expiry, created_at, updated_at, credential_version";

const ADMIN_COLUMNS: &str = "id, pin, password_hash, updated_at";

/// SQLite database implementing both `CredentialStore` and `SessionStore`.
#[derive(Clone)]
pub struct SqliteDb {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDb {
    /// Open or create a database file. `:memory:` opens a private in-memory database.
    pub fn open(path: &str) -> Result<Self, AppError> {
        if path == ":memory:" {
            return Self::open_in_memory();
        }

        let conn = Connection::open(path).map_err(db_error)?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(db_error)?;
        tracing::info!(path, journal_mode = %mode, "Opened SQLite database");

        Self::init(conn)
    }

    /// Open a private in-memory database (tests, ephemeral runs).
    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, AppError> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(db_error)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_error)?;

        Self::migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run database migrations
    fn migrate(conn: &Connection) -> Result<(), AppError> {
        let current_version = Self::get_schema_version(conn)?;

        if current_version < SCHEMA_VERSION {
            tracing::info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );

            if current_version < 1 {
                Self::migrate_v1(conn)?;
            }
            if current_version < 2 {
                Self::migrate_v2(conn)?;
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )
            .map_err(db_error)?;

            tracing::info!("Database migrations complete");
        }

        Ok(())
    }

    /// Get current schema version (0 if no schema exists)
    fn get_schema_version(conn: &Connection) -> Result<i32, AppError> {
        let table_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
                [],
                |row| row.get(0),
            )
            .map_err(db_error)?;

        if !table_exists {
            return Ok(0);
        }

        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0).map(|v| v.unwrap_or(0))
        })
        .map_err(db_error)
    }

    /// Migration to version 1: initial schema
    fn migrate_v1(conn: &Connection) -> Result<(), AppError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE,
                first_name TEXT,
                last_name TEXT,
                profile_image_url TEXT,
                username TEXT UNIQUE,
                password_hash TEXT,
                google_id TEXT UNIQUE,
                discord_id TEXT UNIQUE,
                facebook_id TEXT UNIQUE,
                is_blocked INTEGER NOT NULL DEFAULT 0,
                is_admin INTEGER NOT NULL DEFAULT 0,
                reset_token_hash TEXT UNIQUE,
                reset_token_expiry TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS admin_credentials (
                id TEXT PRIMARY KEY,
                pin TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- sid holds the SHA-256 digest of the session id, never the id itself
            CREATE TABLE IF NOT EXISTS sessions (
                sid TEXT PRIMARY KEY,
                sess TEXT NOT NULL,
                user_id TEXT,
                created_at TEXT NOT NULL,
                expire TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expire ON sessions(expire);
            "#,
        )
        .map_err(db_error)
    }

    /// Migration to version 2: per-user credential version for token revocation
    fn migrate_v2(conn: &Connection) -> Result<(), AppError> {
        conn.execute_batch(
            "ALTER TABLE users ADD COLUMN credential_version INTEGER NOT NULL DEFAULT 0;",
        )
        .map_err(db_error)
    }

    /// Run a closure against the connection on the blocking pool.
    async fn call<T, F>(&self, op: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::Database("connection lock poisoned".to_string()))?;
            op(&mut guard).map_err(db_error)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("database task failed: {e}")))?
    }

    async fn find_user_where(&self, column: &'static str, value: String) -> Result<Option<User>, AppError> {
        self.call(move |conn| query_user(conn, column, &value)).await
    }
}

/// Map a SQLite error onto the application taxonomy.
///
/// Only a unique-email violation means the account already exists. Every
/// other constraint failure is a storage error.
fn db_error(err: rusqlite::Error) -> AppError {
    if let rusqlite::Error::SqliteFailure(e, Some(message)) = &err {
        if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            && message.ends_with(&format!("{}.email", tables::USERS))
        {
            tracing::debug!(error = %err, "Duplicate email");
            return AppError::DuplicateAccount;
        }
    }
    AppError::Database(err.to_string())
}

fn timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_utc_rfc3339(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let reset_token_expiry = row
        .get::<_, Option<String>>(13)?
        .map(|s| timestamp(13, &s))
        .transpose()?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        profile_image_url: row.get(4)?,
        username: row.get(5)?,
        password_hash: row.get(6)?,
        google_id: row.get(7)?,
        discord_id: row.get(8)?,
        facebook_id: row.get(9)?,
        is_blocked: row.get(10)?,
        is_admin: row.get(11)?,
        reset_token_hash: row.get(12)?,
        reset_token_expiry,
        created_at: timestamp(14, &row.get::<_, String>(14)?)?,
        updated_at: timestamp(15, &row.get::<_, String>(15)?)?,
        credential_version: row.get(16)?,
    })
}

fn admin_from_row(row: &Row<'_>) -> rusqlite::Result<Admin> {
    Ok(Admin {
        id: row.get(0)?,
        pin: row.get(1)?,
        password_hash: row.get(2)?,
        updated_at: timestamp(3, &row.get::<_, String>(3)?)?,
    })
}

/// `column` must be a trusted identifier, never user input.
fn query_user(conn: &Connection, column: &str, value: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!(
            "SELECT {USER_COLUMNS} FROM {} WHERE {column} = ?1",
            tables::USERS
        ),
        params![value],
        user_from_row,
    )
    .optional()
}

fn text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

fn upsert_user_sync(conn: &mut Connection, patch: UserPatch) -> rusqlite::Result<User> {
    let tx = conn.transaction()?;

    let email = patch
        .email
        .map(|e| e.map(|v| normalize_email(&v)));
    let existing = match (&patch.id, &email) {
        (Some(id), _) => query_user(&tx, "id", id)?,
        (None, Some(Some(email))) => query_user(&tx, "email", email)?,
        _ => None,
    };

    // Only allow-listed mutable columns ever reach the SQL below.
    let fields: Vec<(&'static str, Option<Value>)> = vec![
        ("email", email.map(text)),
        ("first_name", patch.first_name.map(text)),
        ("last_name", patch.last_name.map(text)),
        ("profile_image_url", patch.profile_image_url.map(text)),
        ("username", patch.username.map(text)),
        ("password_hash", patch.password_hash.map(text)),
        ("google_id", patch.google_id.map(text)),
        ("discord_id", patch.discord_id.map(text)),
        ("facebook_id", patch.facebook_id.map(text)),
        ("reset_token_hash", patch.reset_token_hash.map(text)),
        (
            "reset_token_expiry",
            patch
                .reset_token_expiry
                .map(|v| text(v.map(format_utc_rfc3339))),
        ),
    ];

    let now = format_utc_rfc3339(Utc::now());

    let id = match existing {
        Some(user) => {
            let mut assignments = Vec::new();
            let mut values = Vec::new();
            for (column, value) in fields {
                if let Some(value) = value {
                    values.push(value);
                    assignments.push(format!("{column} = ?{}", values.len()));
                }
            }
            values.push(Value::Text(now));
            assignments.push(format!("updated_at = ?{}", values.len()));
            values.push(Value::Text(user.id.clone()));

            let sql = format!(
                "UPDATE {} SET {} WHERE id = ?{}",
                tables::USERS,
                assignments.join(", "),
                values.len()
            );
            tx.execute(&sql, params_from_iter(values))?;
            user.id
        }
        None => {
            let id = patch.id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let mut columns = vec!["id", "created_at", "updated_at"];
            let mut values = vec![
                Value::Text(id.clone()),
                Value::Text(now.clone()),
                Value::Text(now),
            ];
            for (column, value) in fields {
                if let Some(value) = value {
                    columns.push(column);
                    values.push(value);
                }
            }
            let placeholders = (1..=values.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");

            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({placeholders})",
                tables::USERS,
                columns.join(", ")
            );
            tx.execute(&sql, params_from_iter(values))?;
            id
        }
    };

    let user = query_user(&tx, "id", &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
    tx.commit()?;
    Ok(user)
}

#[async_trait]
impl CredentialStore for SqliteDb {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.find_user_where("email", normalize_email(email)).await
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        self.find_user_where("id", id.to_string()).await
    }

    async fn find_user_by_social_id(
        &self,
        provider: SocialProvider,
        social_id: &str,
    ) -> Result<Option<User>, AppError> {
        self.find_user_where(provider.column(), social_id.to_string())
            .await
    }

    async fn find_user_by_reset_token(&self, token_hash: &str) -> Result<Option<User>, AppError> {
        self.find_user_where("reset_token_hash", token_hash.to_string())
            .await
    }

    async fn upsert_user(&self, patch: UserPatch) -> Result<User, AppError> {
        self.call(move |conn| upsert_user_sync(conn, patch)).await
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM {} ORDER BY created_at, id",
                tables::USERS
            ))?;
            let users = stmt
                .query_map([], user_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
        .await
    }

    async fn set_user_blocked(&self, id: &str, blocked: bool) -> Result<Option<User>, AppError> {
        let id = id.to_string();
        self.call(move |conn| {
            let updated = conn.execute(
                &format!(
                    "UPDATE {} SET is_blocked = ?1, updated_at = ?2 WHERE id = ?3",
                    tables::USERS
                ),
                params![blocked, format_utc_rfc3339(Utc::now()), id],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_user(conn, "id", &id)
        })
        .await
    }

    async fn update_reset_token(
        &self,
        user_id: &str,
        token_hash: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let (user_id, token_hash) = (user_id.to_string(), token_hash.to_string());
        self.call(move |conn| {
            conn.execute(
                &format!(
                    "UPDATE {} SET reset_token_hash = ?1, reset_token_expiry = ?2, updated_at = ?3 \
                     WHERE id = ?4",
                    tables::USERS
                ),
                params![
                    token_hash,
                    format_utc_rfc3339(expiry),
                    format_utc_rfc3339(Utc::now()),
                    user_id
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear_reset_token(&self, user_id: &str) -> Result<(), AppError> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            conn.execute(
                &format!(
                    "UPDATE {} SET reset_token_hash = NULL, reset_token_expiry = NULL, \
                     updated_at = ?1 WHERE id = ?2",
                    tables::USERS
                ),
                params![format_utc_rfc3339(Utc::now()), user_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn reset_password(
        &self,
        user_id: &str,
        token_hash: &str,
        password_hash: &str,
    ) -> Result<bool, AppError> {
        let (user_id, token_hash, password_hash) = (
            user_id.to_string(),
            token_hash.to_string(),
            password_hash.to_string(),
        );
        self.call(move |conn| {
            let now = format_utc_rfc3339(Utc::now());
            let updated = conn.execute(
                &format!(
                    "UPDATE {} SET password_hash = ?1, reset_token_hash = NULL, \
                     reset_token_expiry = NULL, updated_at = ?2, \
                     credential_version = credential_version + 1 \
                     WHERE id = ?3 AND reset_token_hash = ?4 AND reset_token_expiry > ?2",
                    tables::USERS
                ),
                params![password_hash, now, user_id, token_hash],
            )?;
            Ok(updated == 1)
        })
        .await
    }

    async fn find_admin_by_pin(&self, pin: &str) -> Result<Option<Admin>, AppError> {
        let pin = pin.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {ADMIN_COLUMNS} FROM {} WHERE pin = ?1",
                    tables::ADMINS
                ),
                params![pin],
                admin_from_row,
            )
            .optional()
        })
        .await
    }

    async fn set_admin_password(&self, pin: &str, password_hash: &str) -> Result<Admin, AppError> {
        let (pin, password_hash) = (pin.to_string(), password_hash.to_string());
        self.call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, pin, password_hash, updated_at) VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(pin) DO UPDATE SET \
                        password_hash = excluded.password_hash, \
                        updated_at = excluded.updated_at",
                    tables::ADMINS
                ),
                params![
                    Uuid::new_v4().to_string(),
                    pin,
                    password_hash,
                    format_utc_rfc3339(Utc::now())
                ],
            )?;
            conn.query_row(
                &format!(
                    "SELECT {ADMIN_COLUMNS} FROM {} WHERE pin = ?1",
                    tables::ADMINS
                ),
                params![pin],
                admin_from_row,
            )
        })
        .await
    }

    async fn create_first_admin(
        &self,
        pin: &str,
        password_hash: &str,
    ) -> Result<Option<Admin>, AppError> {
        let (pin, password_hash) = (pin.to_string(), password_hash.to_string());
        self.call(move |conn| {
            let inserted = conn.execute(
                &format!(
                    "INSERT INTO {table} (id, pin, password_hash, updated_at) \
                     SELECT ?1, ?2, ?3, ?4 WHERE NOT EXISTS (SELECT 1 FROM {table})",
                    table = tables::ADMINS
                ),
                params![
                    Uuid::new_v4().to_string(),
                    pin,
                    password_hash,
                    format_utc_rfc3339(Utc::now())
                ],
            )?;
            if inserted == 0 {
                return Ok(None);
            }
            conn.query_row(
                &format!(
                    "SELECT {ADMIN_COLUMNS} FROM {} WHERE pin = ?1",
                    tables::ADMINS
                ),
                params![pin],
                admin_from_row,
            )
            .optional()
        })
        .await
    }

    async fn list_admins(&self) -> Result<Vec<Admin>, AppError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ADMIN_COLUMNS} FROM {} ORDER BY pin",
                tables::ADMINS
            ))?;
            let admins = stmt
                .query_map([], admin_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(admins)
        })
        .await
    }

    async fn delete_admin(&self, id: &str) -> Result<bool, AppError> {
        let id = id.to_string();
        self.call(move |conn| {
            let deleted = conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", tables::ADMINS),
                params![id],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn count_admins(&self) -> Result<u64, AppError> {
        self.call(|conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", tables::ADMINS),
                [],
                |row| row.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| n.max(0) as u64)
    }
}

#[async_trait]
impl SessionStore for SqliteDb {
    async fn save(&self, record: &SessionRecord) -> Result<(), AppError> {
        let sess = serde_json::to_string(&record.state)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("session encode failed: {e}")))?;
        let user_id = record.state.user_id().map(str::to_string);
        let sid = record.id_hash.clone();
        let created_at = format_utc_rfc3339(record.created_at);
        let expire = format_utc_rfc3339(record.expires_at);

        self.call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (sid, sess, user_id, created_at, expire) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(sid) DO UPDATE SET \
                        sess = excluded.sess, user_id = excluded.user_id, expire = excluded.expire",
                    tables::SESSIONS
                ),
                params![sid, sess, user_id, created_at, expire],
            )?;
            Ok(())
        })
        .await
    }

    async fn load(&self, id_hash: &str) -> Result<Option<SessionRecord>, AppError> {
        let sid = id_hash.to_string();
        let row = self
            .call(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT sess, created_at, expire FROM {} WHERE sid = ?1",
                        tables::SESSIONS
                    ),
                    params![sid],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            timestamp(1, &row.get::<_, String>(1)?)?,
                            timestamp(2, &row.get::<_, String>(2)?)?,
                        ))
                    },
                )
                .optional()
            })
            .await?;

        let Some((sess, created_at, expires_at)) = row else {
            return Ok(None);
        };

        if expires_at <= Utc::now() {
            self.delete(id_hash).await?;
            return Ok(None);
        }

        let state: SessionState = match serde_json::from_str(&sess) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable session row");
                self.delete(id_hash).await?;
                return Ok(None);
            }
        };

        Ok(Some(SessionRecord {
            id_hash: id_hash.to_string(),
            state,
            created_at,
            expires_at,
        }))
    }

    async fn delete(&self, id_hash: &str) -> Result<(), AppError> {
        let sid = id_hash.to_string();
        self.call(move |conn| {
            conn.execute(
                &format!("DELETE FROM {} WHERE sid = ?1", tables::SESSIONS),
                params![sid],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_for_user(&self, user_id: &str) -> Result<u64, AppError> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            conn.execute(
                &format!("DELETE FROM {} WHERE user_id = ?1", tables::SESSIONS),
                params![user_id],
            )
        })
        .await
        .map(|n| n as u64)
    }

    async fn purge_expired(&self) -> Result<u64, AppError> {
        let now = format_utc_rfc3339(Utc::now());
        self.call(move |conn| {
            conn.execute(
                &format!("DELETE FROM {} WHERE expire <= ?1", tables::SESSIONS),
                params![now],
            )
        })
        .await
        .map(|n| n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_upsert_creates_then_merges_without_clobbering() {
        let db = SqliteDb::open_in_memory().unwrap();

        let created = db
            .upsert_user(UserPatch {
                email: Some(Some("Alice@Example.com".to_string())),
                first_name: Some(Some("Alice".to_string())),
                last_name: Some(Some("Liddell".to_string())),
                password_hash: Some(Some("hash-1".to_string())),
                ..UserPatch::default()
            })
            .await
            .unwrap();
        assert_eq!(created.email.as_deref(), Some("alice@example.com"));

        // Omitted fields stay, explicit None clears.
        let updated = db
            .upsert_user(UserPatch {
                first_name: Some(Some("Al".to_string())),
                last_name: Some(None),
                ..UserPatch::for_id(&created.id)
            })
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.first_name.as_deref(), Some("Al"));
        assert_eq!(updated.last_name, None);
        assert_eq!(updated.password_hash.as_deref(), Some("hash-1"));
        assert_eq!(updated.email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn test_upsert_matches_on_email_when_no_id() {
        let db = SqliteDb::open_in_memory().unwrap();
        let first = db
            .upsert_user(UserPatch {
                email: Some(Some("bob@example.com".to_string())),
                ..UserPatch::default()
            })
            .await
            .unwrap();

        let second = db
            .upsert_user(UserPatch {
                email: Some(Some("BOB@example.com".to_string())),
                ..UserPatch::default()
            }
            .with_social_id(SocialProvider::Discord, "d-42"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let by_social = db
            .find_user_by_social_id(SocialProvider::Discord, "d-42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_social.id, first.id);
        assert!(db
            .find_user_by_social_id(SocialProvider::Google, "d-42")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_maps_to_duplicate_account() {
        let db = SqliteDb::open_in_memory().unwrap();
        let a = db
            .upsert_user(UserPatch {
                email: Some(Some("a@example.com".to_string())),
                ..UserPatch::default()
            })
            .await
            .unwrap();
        db.upsert_user(UserPatch {
            email: Some(Some("b@example.com".to_string())),
            ..UserPatch::default()
        })
        .await
        .unwrap();

        let err = db
            .upsert_user(UserPatch {
                email: Some(Some("b@example.com".to_string())),
                ..UserPatch::for_id(&a.id)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateAccount));
    }

    #[tokio::test]
    async fn test_other_constraint_failures_are_storage_errors() {
        let db = SqliteDb::open_in_memory().unwrap();
        let a = db
            .upsert_user(UserPatch::default().with_social_id(SocialProvider::Discord, "d-1".to_string()))
            .await
            .unwrap();
        let b = db.upsert_user(UserPatch::default()).await.unwrap();
        assert_ne!(a.id, b.id);

        let err = db
            .upsert_user(UserPatch::for_id(&b.id).with_social_id(SocialProvider::Discord, "d-1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_reset_password_consumes_token_once() {
        let db = SqliteDb::open_in_memory().unwrap();
        let user = db
            .upsert_user(UserPatch {
                email: Some(Some("c@example.com".to_string())),
                password_hash: Some(Some("old".to_string())),
                ..UserPatch::default()
            })
            .await
            .unwrap();

        db.update_reset_token(&user.id, "digest", Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        let found = db.find_user_by_reset_token("digest").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(found.reset_token_expiry.is_some());

        assert!(db.reset_password(&user.id, "digest", "new").await.unwrap());
        assert!(!db.reset_password(&user.id, "digest", "newer").await.unwrap());

        let after = db.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(after.password_hash.as_deref(), Some("new"));
        assert_eq!(after.reset_token_hash, None);
        assert_eq!(after.reset_token_expiry, None);
        assert_eq!(after.credential_version, user.credential_version + 1);
    }

    #[tokio::test]
    async fn test_reset_password_refuses_lapsed_token() {
        let db = SqliteDb::open_in_memory().unwrap();
        let user = db
            .upsert_user(UserPatch {
                email: Some(Some("d@example.com".to_string())),
                password_hash: Some(Some("old".to_string())),
                ..UserPatch::default()
            })
            .await
            .unwrap();

        db.update_reset_token(&user.id, "digest", Utc::now() - Duration::minutes(1))
            .await
            .unwrap();
        assert!(!db.reset_password(&user.id, "digest", "new").await.unwrap());

        let after = db.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(after.password_hash.as_deref(), Some("old"));
        assert_eq!(after.credential_version, user.credential_version);
    }

    #[tokio::test]
    async fn test_set_admin_password_upserts_by_pin() {
        let db = SqliteDb::open_in_memory().unwrap();
        assert_eq!(db.count_admins().await.unwrap(), 0);

        let first = db.set_admin_password("131313", "h1").await.unwrap();
        let second = db.set_admin_password("131313", "h2").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.password_hash, "h2");
        assert_eq!(db.count_admins().await.unwrap(), 1);

        assert!(db.delete_admin(&first.id).await.unwrap());
        assert!(!db.delete_admin(&first.id).await.unwrap());
        assert!(db.find_admin_by_pin("131313").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_expiry_enforced_on_load() {
        let db = SqliteDb::open_in_memory().unwrap();
        let now = Utc::now();
        let live = SessionRecord {
            id_hash: "live".to_string(),
            state: SessionState::User {
                user_id: "u1".to_string(),
            },
            created_at: now,
            expires_at: now + Duration::hours(24),
        };
        let stale = SessionRecord {
            id_hash: "stale".to_string(),
            expires_at: now - Duration::seconds(5),
            ..live.clone()
        };
        db.save(&live).await.unwrap();
        db.save(&stale).await.unwrap();

        assert_eq!(db.load("live").await.unwrap().unwrap().state, live.state);
        assert!(db.load("stale").await.unwrap().is_none());
        assert!(db.load("unknown").await.unwrap().is_none());

        assert_eq!(db.delete_for_user("u1").await.unwrap(), 1);
        assert!(db.load("live").await.unwrap().is_none());
    }
}
