//! Credential record persistence using SQLite.
//!
//! One row per internal user. Tokens are sealed with [`TokenCipher`] before they
//! touch the database.

use super::{CredentialRecord, ProviderCredential, TokenCipher, TokenStatus};
use crate::directory::{DirectoryError, UserDirectory};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    SELECT id, internal_user_id, provider_user_id,
           access_token, refresh_token,
           expires_in, scope, token_type, status, last_sync
    FROM credential_records
"#;

/// Credential records backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credential_records (
///     id TEXT PRIMARY KEY,                    -- UUID v7, kept across upserts
///     internal_user_id TEXT NOT NULL UNIQUE,
///     provider_user_id TEXT,
///     access_token TEXT NOT NULL,             -- Sealed
///     refresh_token TEXT,                     -- Sealed (optional)
///     expires_in INTEGER,
///     scope TEXT,
///     token_type TEXT,
///     status TEXT NOT NULL,
///     last_sync TEXT,                         -- RFC 3339 (optional)
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex, so writes are serialized
/// - Upsert is a single `INSERT .. ON CONFLICT DO UPDATE` statement
pub struct CredentialStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
    directory: Arc<dyn UserDirectory>,
}

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    /// * `directory` - Gate consulted by [`CredentialStore::check_user_exists`]
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        encryption_key: &str,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self> {
        let cipher = TokenCipher::from_base64_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credential_records (
                id TEXT PRIMARY KEY,
                internal_user_id TEXT NOT NULL UNIQUE,
                provider_user_id TEXT,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_in INTEGER,
                scope TEXT,
                token_type TEXT,
                status TEXT NOT NULL,
                last_sync TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_unique_provider_user_id
                ON credential_records(provider_user_id);
            "#,
        )
        .context("Failed to create credential_records table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
            directory,
        })
    }

    /// Asks the auth directory whether the internal user is registered.
    pub async fn check_user_exists(&self, internal_user_id: &str) -> Result<bool, DirectoryError> {
        self.directory.exists(internal_user_id).await
    }

    /// Creates the record for `record.internal_user_id`, or overwrites the
    /// existing one.
    ///
    /// `record.id` is ignored: new rows get a fresh id and the stored id is
    /// preserved on update. `provider_user_id` and `last_sync`
    /// keep their stored values when the incoming record leaves them unset.
    /// Records without a token status are rejected.
    pub fn upsert(&self, record: &CredentialRecord) -> Result<CredentialRecord> {
        let credential = &record.provider_credential;
        let status = credential
            .status
            .ok_or_else(|| anyhow!("Refusing to persist a credential without a token status"))?;

        let access_token = self
            .cipher
            .seal(&credential.access_token)
            .context("Failed to encrypt access token")?;
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .map(|token| self.cipher.seal(token))
            .transpose()
            .context("Failed to encrypt refresh token")?;

        // Only used when the row is inserted; an existing row keeps its id
        let new_id = Uuid::now_v7().to_string();
        let last_sync = credential.last_sync.map(|ts| ts.to_rfc3339());
        let now = Utc::now().to_rfc3339();

        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                r#"
                INSERT INTO credential_records (
                    id, internal_user_id, provider_user_id,
                    access_token, refresh_token,
                    expires_in, scope, token_type, status, last_sync,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                ON CONFLICT(internal_user_id) DO UPDATE SET
                    provider_user_id = COALESCE(excluded.provider_user_id, credential_records.provider_user_id),
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    expires_in = excluded.expires_in,
                    scope = excluded.scope,
                    token_type = excluded.token_type,
                    status = excluded.status,
                    last_sync = COALESCE(excluded.last_sync, credential_records.last_sync),
                    updated_at = excluded.updated_at
                "#,
                params![
                    new_id,
                    record.internal_user_id,
                    credential.provider_user_id,
                    access_token,
                    refresh_token,
                    credential.expires_in,
                    credential.scope,
                    credential.token_type,
                    status.as_str(),
                    last_sync,
                    now,
                ],
            )
            .context("Failed to upsert credential record")?;
        }

        self.find_by_internal_user_id(&record.internal_user_id)?
            .ok_or_else(|| anyhow!("Credential record vanished after upsert"))
    }

    /// Looks a record up by internal user id.
    pub fn find_by_internal_user_id(&self, internal_user_id: &str) -> Result<Option<CredentialRecord>> {
        self.find_one("WHERE internal_user_id = ?1", internal_user_id)
    }

    /// Looks a record up by provider account id (webhook reverse lookup).
    ///
    /// A provider account belongs to at most one internal user; the table
    /// enforces it.
    pub fn find_by_provider_user_id(&self, provider_user_id: &str) -> Result<Option<CredentialRecord>> {
        self.find_one("WHERE provider_user_id = ?1", provider_user_id)
    }

    /// Sets the token status of an existing record.
    ///
    /// Returns `false` when no record exists for the user.
    pub fn update_status(&self, internal_user_id: &str, status: TokenStatus) -> Result<bool> {
        let rows = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE credential_records SET status = ?1, updated_at = ?2 WHERE internal_user_id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), internal_user_id],
            )
            .context("Failed to update token status")?;
        Ok(rows > 0)
    }

    /// Advances `last_sync`. An older timestamp never overwrites a newer one.
    ///
    /// Returns `false` when no record exists for the user.
    pub fn record_sync(&self, internal_user_id: &str, synced_until: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let current: Option<Option<String>> = conn
            .query_row(
                "SELECT last_sync FROM credential_records WHERE internal_user_id = ?1",
                params![internal_user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read last_sync")?;

        let Some(current) = current else {
            return Ok(false);
        };
        if let Some(current) = current.as_deref().map(parse_timestamp).transpose()? {
            if current >= synced_until {
                return Ok(true);
            }
        }

        conn.execute(
            "UPDATE credential_records SET last_sync = ?1, updated_at = ?2 WHERE internal_user_id = ?3",
            params![
                synced_until.to_rfc3339(),
                Utc::now().to_rfc3339(),
                internal_user_id
            ],
        )
        .context("Failed to advance last_sync")?;
        Ok(true)
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM credential_records", [], |row| row.get(0))
            .context("Failed to count credential records")?;
        Ok(count as usize)
    }

    fn find_one(&self, filter: &str, value: &str) -> Result<Option<CredentialRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("{} {} LIMIT 1", SELECT_COLUMNS, filter))
            .context("Failed to prepare query")?;

        let row = stmt
            .query_row(params![value], StoredRow::from_row)
            .optional()
            .context("Failed to execute query")?;

        row.map(|row| row.into_record(&self.cipher)).transpose()
    }
}

/// Raw column values, still sealed.
struct StoredRow {
    id: String,
    internal_user_id: String,
    provider_user_id: Option<String>,
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    token_type: Option<String>,
    status: String,
    last_sync: Option<String>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            internal_user_id: row.get(1)?,
            provider_user_id: row.get(2)?,
            access_token: row.get(3)?,
            refresh_token: row.get(4)?,
            expires_in: row.get(5)?,
            scope: row.get(6)?,
            token_type: row.get(7)?,
            status: row.get(8)?,
            last_sync: row.get(9)?,
        })
    }

    fn into_record(self, cipher: &TokenCipher) -> Result<CredentialRecord> {
        let access_token = cipher
            .open(&self.access_token)
            .context("Failed to decrypt access token")?;
        let refresh_token = self
            .refresh_token
            .as_deref()
            .map(|sealed| cipher.open(sealed))
            .transpose()
            .context("Failed to decrypt refresh token")?;
        let last_sync = self.last_sync.as_deref().map(parse_timestamp).transpose()?;

        Ok(CredentialRecord {
            id: Some(self.id),
            internal_user_id: self.internal_user_id,
            provider_credential: ProviderCredential {
                provider_user_id: self.provider_user_id,
                access_token,
                expires_in: self.expires_in,
                refresh_token,
                scope: self.scope,
                token_type: self.token_type,
                status: Some(self.status.parse()?),
                last_sync,
            },
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .context("Failed to parse last_sync timestamp")
}
