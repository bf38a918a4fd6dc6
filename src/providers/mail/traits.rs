//! Mail provider trait definition.
//!
//! This module defines the [`MailClient`] trait which abstracts over the
//! mailbox backend. The scanner and sync services only depend on this trait,
//! so tests can substitute an in-memory mailbox.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type alias for mail provider operations.
pub type Result<T> = std::result::Result<T, MailError>;

/// Errors that can occur during mail provider operations.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// Authentication failed or the access token expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A label/folder in the mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailLabel {
    /// Provider-assigned label id.
    pub id: String,
    /// Display name shown to the user.
    pub name: String,
}

/// One page of message ids from a list call.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub ids: Vec<String>,
    /// Opaque cursor for the next page, absent on the last page.
    pub next_page_token: Option<String>,
}

/// A fetched mail message, reduced to what extraction needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    /// Provider-assigned message id.
    pub id: String,
    pub subject: Option<String>,
    pub from: Option<String>,
    /// Provider-recorded receive time; the incremental scan watermark is
    /// derived from this.
    pub internal_date: DateTime<Utc>,
    /// Decoded text/plain body, if present.
    pub body_text: Option<String>,
    /// Decoded text/html body, if present.
    pub body_html: Option<String>,
    pub snippet: Option<String>,
}

impl MailMessage {
    /// Best available body for extraction: plain text, then HTML, then the
    /// snippet.
    pub fn extraction_text(&self) -> Option<&str> {
        self.body_text
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.body_html.as_deref().filter(|s| !s.trim().is_empty()))
            .or(self.snippet.as_deref())
    }
}

/// Read-only mailbox operations.
///
/// All methods take the access token as a parameter rather than holding one,
/// because tokens rotate per request via the credential vault.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Lists all labels in the mailbox.
    async fn list_labels(&self, access_token: &str) -> Result<Vec<MailLabel>>;

    /// Lists ids of messages carrying `label_id`, newest first, restricted
    /// to messages received strictly after `after` when given.
    async fn list_message_ids(
        &self,
        access_token: &str,
        label_id: &str,
        after: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> Result<MessagePage>;

    /// Fetches one message with its decoded body.
    async fn get_message(&self, access_token: &str, message_id: &str) -> Result<MailMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: Option<&str>, html: Option<&str>, snippet: Option<&str>) -> MailMessage {
        MailMessage {
            id: "m1".to_string(),
            subject: None,
            from: None,
            internal_date: Utc::now(),
            body_text: text.map(String::from),
            body_html: html.map(String::from),
            snippet: snippet.map(String::from),
        }
    }

    #[test]
    fn extraction_text_prefers_plain_text() {
        let m = message(Some("plain"), Some("<p>html</p>"), Some("snip"));
        assert_eq!(m.extraction_text(), Some("plain"));
    }

    #[test]
    fn extraction_text_skips_blank_bodies() {
        let m = message(Some("   "), Some("<p>html</p>"), None);
        assert_eq!(m.extraction_text(), Some("<p>html</p>"));

        let m = message(None, None, Some("snip"));
        assert_eq!(m.extraction_text(), Some("snip"));

        let m = message(None, None, None);
        assert_eq!(m.extraction_text(), None);
    }
}
