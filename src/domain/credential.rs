//! Mailbox credential and sync-state types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::CredentialId;

/// Lifecycle of a mailbox sync job, as surfaced through the status read
/// model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No sync has been requested since the last completion.
    Idle,
    /// A sync is queued but not yet picked up by the worker.
    Pending,
    /// The worker is currently scanning this mailbox.
    InProgress,
    /// The last sync finished without a fatal error.
    Completed,
    /// The last sync aborted; `failed_reason` explains why.
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Pending => "pending",
            SyncState::InProgress => "in_progress",
            SyncState::Completed => "completed",
            SyncState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SyncState::Idle),
            "pending" => Some(SyncState::Pending),
            "in_progress" => Some(SyncState::InProgress),
            "completed" => Some(SyncState::Completed),
            "failed" => Some(SyncState::Failed),
            _ => None,
        }
    }
}

/// OAuth credentials and sync bookkeeping for one connected mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailCredential {
    pub id: CredentialId,
    /// Address of the connected mailbox.
    pub email: String,
    /// Short-lived bearer token for the mail API.
    pub access_token: String,
    /// Long-lived token used to mint fresh access tokens.
    pub refresh_token: String,
    /// When `access_token` stops being accepted.
    pub expires_at: DateTime<Utc>,
    /// Whether the user has revoked access; revoked credentials are skipped
    /// by the scheduler until reconnected.
    pub revoked: bool,
    /// Current sync lifecycle state.
    pub sync_state: SyncState,
    /// Human-readable reason for the last failure, if any.
    pub failed_reason: Option<String>,
    /// Internal date of the newest message ingested so far; the incremental
    /// scan watermark.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Running count of messages ingested across all syncs.
    pub emails_received: i64,
    pub created_at: DateTime<Utc>,
}

/// Per-mailbox status surfaced to clients, derived from the credential row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub credential_id: CredentialId,
    pub email: String,
    /// Whether the mailbox is usable without reconnecting.
    pub connected: bool,
    pub state: SyncState,
    pub failed_reason: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub emails_received: i64,
}

impl MailCredential {
    /// Derives the client-facing status view.
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            credential_id: self.id,
            email: self.email.clone(),
            connected: !self.revoked,
            state: self.sync_state,
            failed_reason: self.failed_reason.clone(),
            last_sync_at: self.last_sync_at,
            emails_received: self.emails_received,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_state_string_roundtrip() {
        for state in [
            SyncState::Idle,
            SyncState::Pending,
            SyncState::InProgress,
            SyncState::Completed,
            SyncState::Failed,
        ] {
            assert_eq!(SyncState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SyncState::parse("bogus"), None);
    }

    #[test]
    fn status_reflects_revocation() {
        let credential = MailCredential {
            id: CredentialId(3),
            email: "user@example.com".to_string(),
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Utc::now(),
            revoked: true,
            sync_state: SyncState::Failed,
            failed_reason: Some("credential revoked: invalid_grant".to_string()),
            last_sync_at: None,
            emails_received: 12,
            created_at: Utc::now(),
        };

        let status = credential.status();
        assert!(!status.connected);
        assert_eq!(status.state, SyncState::Failed);
        assert_eq!(status.emails_received, 12);
    }
}
