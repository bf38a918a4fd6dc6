//! Notification persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::domain::{CredentialId, Notification, NotificationId, NotificationKind};
use crate::storage::database::{Database, Result};

use super::parse_utc;

const NOTIFICATION_COLUMNS: &str = "id, credential_id, kind, message, read, created_at";

/// Inserts a new unread notification.
pub async fn insert(
    db: &Database,
    credential_id: CredentialId,
    kind: NotificationKind,
    message: String,
    now: DateTime<Utc>,
) -> Result<Notification> {
    db.with_conn(move |conn| {
        conn.execute(
            r#"
            INSERT INTO notifications (credential_id, kind, message, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![credential_id.0, kind.as_str(), message, now.to_rfc3339()],
        )?;

        Ok(Notification {
            id: NotificationId(conn.last_insert_rowid()),
            credential_id,
            kind,
            message,
            read: false,
            created_at: now,
        })
    })
    .await
}

/// Lists unread notifications for a mailbox, oldest first.
pub async fn list_unread(db: &Database, credential_id: CredentialId) -> Result<Vec<Notification>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM notifications WHERE credential_id = ?1 AND read = 0 ORDER BY id ASC",
            NOTIFICATION_COLUMNS
        ))?;
        let rows = stmt.query_map([credential_id.0], row_to_notification)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Marks a notification as read.
pub async fn mark_read(db: &Database, id: NotificationId) -> Result<()> {
    db.with_conn(move |conn| {
        conn.execute("UPDATE notifications SET read = 1 WHERE id = ?1", [id.0])?;
        Ok(())
    })
    .await
}

fn row_to_notification(row: &Row<'_>) -> std::result::Result<Notification, rusqlite::Error> {
    let kind: String = row.get(2)?;
    let created_at: String = row.get(5)?;

    Ok(Notification {
        id: NotificationId(row.get(0)?),
        credential_id: CredentialId(row.get(1)?),
        kind: NotificationKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown notification kind: {}", kind).into(),
            )
        })?,
        message: row.get(3)?,
        read: row.get::<_, i64>(4)? != 0,
        created_at: parse_utc(5, created_at)?,
    })
}
