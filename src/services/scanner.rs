//! Mailbox scanner: incremental, label-scoped message retrieval.
//!
//! One scan lists every message under the transaction label that arrived
//! after the credential's watermark, fetches full bodies, and yields them
//! oldest-first. Ascending send-time order is load-bearing: running-balance
//! fields extracted per message must be applied in causal order.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::providers::mail::{MailClient, MailMessage};

use super::error::{Result, SyncError};

/// How far back the first scan of a mailbox reaches.
const DEFAULT_LOOKBACK_DAYS: i64 = 90;

/// A fetched message, reduced and normalized for extraction.
#[derive(Debug, Clone)]
pub struct ScannedMessage {
    /// Provider-assigned message id.
    pub id: String,
    /// Provider-recorded receive time.
    pub received_at: DateTime<Utc>,
    pub subject: Option<String>,
    /// Whitespace-normalized body text; empty when the message had no
    /// usable part.
    pub text: String,
}

/// Scans a mailbox label for transaction emails.
pub struct MailboxScanner {
    mail: Arc<dyn MailClient>,
}

impl MailboxScanner {
    pub fn new(mail: Arc<dyn MailClient>) -> Self {
        Self { mail }
    }

    /// Resolves a label display name to its provider-side id.
    pub async fn resolve_label(&self, access_token: &str, label_name: &str) -> Result<String> {
        let labels = self.mail.list_labels(access_token).await?;
        labels
            .into_iter()
            .find(|l| l.name.eq_ignore_ascii_case(label_name))
            .map(|l| l.id)
            .ok_or_else(|| SyncError::LabelNotFound(label_name.to_string()))
    }

    /// Fetches all messages under `label_name` received after the
    /// watermark (or within the default lookback window on a first scan),
    /// ordered ascending by receive time.
    pub async fn scan(
        &self,
        access_token: &str,
        label_name: &str,
        watermark: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScannedMessage>> {
        let label_id = self.resolve_label(access_token, label_name).await?;
        let after = watermark.unwrap_or(now - Duration::days(DEFAULT_LOOKBACK_DAYS));

        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .mail
                .list_message_ids(access_token, &label_id, Some(after), page_token.as_deref())
                .await?;
            ids.extend(page.ids);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(label = label_name, count = ids.len(), %after, "listed messages");

        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            let message = self.mail.get_message(access_token, id).await?;
            // The provider query has second granularity and an inclusive
            // boundary, so re-filter against the exact watermark.
            if message.internal_date > after {
                messages.push(Self::reduce(message));
            }
        }

        messages.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    fn reduce(message: MailMessage) -> ScannedMessage {
        let text = message
            .extraction_text()
            .map(normalize_whitespace)
            .unwrap_or_default();
        ScannedMessage {
            id: message.id,
            received_at: message.internal_date,
            subject: message.subject,
            text,
        }
    }
}

/// Trims and collapses runs of whitespace to single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
