//! Mailbox credential CRUD operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{CredentialId, MailCredential, SyncState};
use crate::storage::database::{Database, DatabaseError, Result};

use super::parse_utc;

const CREDENTIAL_COLUMNS: &str = "id, email, access_token, refresh_token, expires_at, revoked, \
     sync_state, failed_reason, last_sync_at, emails_received, created_at";

/// Fields needed to connect a new mailbox.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Inserts a new credential, or replaces the token material when the
/// mailbox was connected before (reconnect after revocation).
pub async fn upsert(
    db: &Database,
    new: NewCredential,
    now: DateTime<Utc>,
) -> Result<MailCredential> {
    db.with_conn(move |conn| {
        conn.execute(
            r#"
            INSERT INTO credentials (email, access_token, refresh_token, expires_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(email) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                revoked = 0,
                failed_reason = NULL
            "#,
            params![
                new.email,
                new.access_token,
                new.refresh_token,
                new.expires_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM credentials WHERE email = ?1",
            CREDENTIAL_COLUMNS
        ))?;
        stmt.query_row([&new.email], row_to_credential)
            .map_err(DatabaseError::from)
    })
    .await
}

/// Retrieves a credential by its ID.
pub async fn get_by_id(db: &Database, id: CredentialId) -> Result<Option<MailCredential>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM credentials WHERE id = ?1",
            CREDENTIAL_COLUMNS
        ))?;
        Ok(stmt.query_row([id.0], row_to_credential).optional()?)
    })
    .await
}

/// Lists all credentials, oldest first.
pub async fn list_all(db: &Database) -> Result<Vec<MailCredential>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM credentials ORDER BY id ASC",
            CREDENTIAL_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_credential)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Lists credentials eligible for scheduled sync (not revoked).
pub async fn list_active(db: &Database) -> Result<Vec<MailCredential>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM credentials WHERE revoked = 0 ORDER BY id ASC",
            CREDENTIAL_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_credential)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Stores a freshly minted access token.
pub async fn update_tokens(
    db: &Database,
    id: CredentialId,
    access_token: String,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE credentials SET access_token = ?2, expires_at = ?3 WHERE id = ?1",
            params![id.0, access_token, expires_at.to_rfc3339()],
        )?;
        Ok(())
    })
    .await
}

/// Flags a credential as revoked so the scheduler skips it until the user
/// reconnects.
pub async fn mark_revoked(db: &Database, id: CredentialId) -> Result<()> {
    db.with_conn(move |conn| {
        conn.execute("UPDATE credentials SET revoked = 1 WHERE id = ?1", [id.0])?;
        Ok(())
    })
    .await
}

/// Updates the sync lifecycle state, recording or clearing the failure
/// reason as appropriate.
pub async fn set_sync_state(
    db: &Database,
    id: CredentialId,
    state: SyncState,
    failed_reason: Option<String>,
) -> Result<()> {
    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE credentials SET sync_state = ?2, failed_reason = ?3 WHERE id = ?1",
            params![id.0, state.as_str(), failed_reason],
        )?;
        Ok(())
    })
    .await
}

/// Records a completed sync: advances the watermark (never backwards) and
/// adds to the running ingest counter.
pub async fn record_sync_success(
    db: &Database,
    id: CredentialId,
    watermark: Option<DateTime<Utc>>,
    ingested: i64,
) -> Result<()> {
    db.with_conn(move |conn| {
        conn.execute(
            r#"
            UPDATE credentials SET
                emails_received = emails_received + ?2,
                last_sync_at = CASE
                    WHEN ?3 IS NULL THEN last_sync_at
                    WHEN last_sync_at IS NULL OR last_sync_at < ?3 THEN ?3
                    ELSE last_sync_at
                END
            WHERE id = ?1
            "#,
            params![id.0, ingested, watermark.map(|w| w.to_rfc3339())],
        )?;
        Ok(())
    })
    .await
}

fn row_to_credential(row: &Row<'_>) -> std::result::Result<MailCredential, rusqlite::Error> {
    let expires_at: String = row.get(4)?;
    let sync_state: String = row.get(6)?;
    let last_sync_at: Option<String> = row.get(8)?;
    let created_at: String = row.get(10)?;

    Ok(MailCredential {
        id: CredentialId(row.get(0)?),
        email: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        expires_at: parse_utc(4, expires_at)?,
        revoked: row.get::<_, i64>(5)? != 0,
        sync_state: SyncState::parse(&sync_state).unwrap_or(SyncState::Idle),
        failed_reason: row.get(7)?,
        last_sync_at: last_sync_at.map(|s| parse_utc(8, s)).transpose()?,
        emails_received: row.get(9)?,
        created_at: parse_utc(10, created_at)?,
    })
}
