//! Stored notifications surfaced to connected clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{CredentialId, NotificationId};

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A mailbox sync entered progress.
    SyncStarted,
    /// A mailbox sync finished.
    SyncCompleted,
    /// A mailbox sync aborted.
    SyncFailed,
    /// New transactions landed in the ledger.
    TransactionsIngested,
    /// A credential needs the user to reconnect.
    ReauthRequired,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::SyncStarted => "sync_started",
            NotificationKind::SyncCompleted => "sync_completed",
            NotificationKind::SyncFailed => "sync_failed",
            NotificationKind::TransactionsIngested => "transactions_ingested",
            NotificationKind::ReauthRequired => "reauth_required",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync_started" => Some(NotificationKind::SyncStarted),
            "sync_completed" => Some(NotificationKind::SyncCompleted),
            "sync_failed" => Some(NotificationKind::SyncFailed),
            "transactions_ingested" => Some(NotificationKind::TransactionsIngested),
            "reauth_required" => Some(NotificationKind::ReauthRequired),
            _ => None,
        }
    }
}

/// A persisted notification row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub credential_id: CredentialId,
    pub kind: NotificationKind,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
