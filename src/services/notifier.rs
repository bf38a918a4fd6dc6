//! Push-event fan-out to connected clients.
//!
//! Durable notifications (sync results, reauth prompts) are written to the
//! database and then broadcast; ephemeral progress updates are broadcast
//! only. Subscribers that lag simply drop events, the durable ones remain
//! queryable.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{CredentialId, NotificationKind};
use crate::storage::{queries, Database};

use super::error::Result;

/// Live event pushed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Mirrors a persisted notification.
    Notified {
        credential_id: CredentialId,
        kind: NotificationKind,
        message: String,
    },
    /// Ephemeral sync progress, never persisted.
    Progress {
        credential_id: CredentialId,
        processed: usize,
        total: usize,
    },
}

/// Persists notifications and fans them out over a broadcast channel.
pub struct Notifier {
    db: Database,
    events: broadcast::Sender<PushEvent>,
}

impl Notifier {
    pub fn new(db: Database) -> Self {
        let (events, _) = broadcast::channel(100);
        Self { db, events }
    }

    /// Subscribes to live events.
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }

    /// Stores a notification and pushes it to live subscribers.
    pub async fn notify(
        &self,
        credential_id: CredentialId,
        kind: NotificationKind,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let message = message.into();
        queries::notifications::insert(&self.db, credential_id, kind, message.clone(), now)
            .await?;

        // No subscribers is fine.
        let _ = self.events.send(PushEvent::Notified {
            credential_id,
            kind,
            message,
        });
        Ok(())
    }

    /// Pushes a progress update without persisting anything.
    pub fn progress(&self, credential_id: CredentialId, processed: usize, total: usize) {
        debug!(%credential_id, processed, total, "sync progress");
        let _ = self.events.send(PushEvent::Progress {
            credential_id,
            processed,
            total,
        });
    }
}
