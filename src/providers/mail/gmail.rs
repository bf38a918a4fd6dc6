//! Gmail API mail client.
//!
//! Implements [`MailClient`] against the Gmail REST API v1:
//! - `users.labels.list` to resolve the transaction label by name
//! - `users.messages.list` for incremental id listing
//! - `users.messages.get` for full message bodies
//!
//! Access tokens are supplied per call; minting and refreshing them is the
//! credential vault's job.

use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

use super::{MailClient, MailError, MailLabel, MailMessage, MessagePage, Result};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail labels list response.
#[derive(Debug, Deserialize)]
struct LabelsListResponse {
    labels: Option<Vec<GmailLabel>>,
}

/// Gmail API label.
#[derive(Debug, Deserialize)]
struct GmailLabel {
    id: String,
    name: String,
}

/// Gmail messages list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagesListResponse {
    messages: Option<Vec<MessageRef>>,
    next_page_token: Option<String>,
}

/// Gmail message reference (id only).
#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// Gmail API message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    snippet: Option<String>,
    payload: Option<GmailMessagePayload>,
    internal_date: Option<String>,
}

/// Gmail message payload (headers and body parts).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessagePayload {
    headers: Option<Vec<GmailHeader>>,
    parts: Option<Vec<GmailPart>>,
    body: Option<GmailBody>,
    mime_type: Option<String>,
}

/// Gmail message header.
#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

/// Gmail message part (for multipart messages).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    mime_type: Option<String>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

/// Gmail message body.
#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

/// Gmail REST API client.
pub struct GmailClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GmailClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: GMAIL_API_BASE.to_string(),
        }
    }

    /// Points the client at a different endpoint, for tests against a local
    /// stub server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn auth_headers(access_token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", access_token))
                .map_err(|e| MailError::Internal(format!("invalid header: {}", e)))?,
        );
        Ok(headers)
    }

    /// Makes an authenticated GET request to the Gmail API.
    async fn get<T: for<'de> Deserialize<'de>>(&self, access_token: &str, endpoint: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let headers = Self::auth_headers(access_token)?;

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| MailError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| MailError::Internal(format!("parse response: {}", e)))
    }

    /// Handles API error responses.
    async fn handle_error(response: reqwest::Response) -> MailError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => MailError::Authentication(format!("unauthorized: {}", body)),
            404 => MailError::NotFound(body),
            429 => MailError::RateLimited {
                retry_after_secs: None,
            },
            _ => MailError::Internal(format!("API error ({}): {}", status, body)),
        }
    }

    /// Builds the message-list query string.
    ///
    /// Gmail's `after:` operator accepts a unix timestamp with second
    /// granularity and includes the boundary second, so callers re-filter
    /// fetched messages against the exact watermark.
    fn list_query(
        label_id: &str,
        after: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("labelIds", label_id);
        query.append_pair("maxResults", "100");
        if let Some(after) = after {
            query.append_pair("q", &format!("after:{}", after.timestamp()));
        }
        if let Some(token) = page_token {
            query.append_pair("pageToken", token);
        }
        query.finish()
    }

    fn header_value<'a>(payload: &'a GmailMessagePayload, name: &str) -> Option<&'a str> {
        payload
            .headers
            .as_ref()?
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Extracts text and HTML bodies from a Gmail message payload.
    ///
    /// Gmail base64url-encodes body data without padding. Single-part
    /// messages carry the body directly; multipart messages nest it in
    /// `parts`, possibly recursively.
    fn extract_body(payload: &GmailMessagePayload) -> (Option<String>, Option<String>) {
        let mut text = None;
        let mut html = None;

        if let Some(body) = &payload.body {
            if let Some(decoded) = Self::decode_body(body) {
                match payload.mime_type.as_deref() {
                    Some("text/html") => html = Some(decoded),
                    _ => text = Some(decoded),
                }
            }
        }

        if let Some(parts) = &payload.parts {
            Self::extract_body_from_parts(parts, &mut text, &mut html);
        }

        (text, html)
    }

    /// Recursively extracts body text from message parts.
    fn extract_body_from_parts(
        parts: &[GmailPart],
        text: &mut Option<String>,
        html: &mut Option<String>,
    ) {
        for part in parts {
            if let Some(body) = &part.body {
                if let Some(decoded) = Self::decode_body(body) {
                    match part.mime_type.as_deref() {
                        Some("text/plain") if text.is_none() => *text = Some(decoded),
                        Some("text/html") if html.is_none() => *html = Some(decoded),
                        _ => {}
                    }
                }
            }
            if let Some(nested) = &part.parts {
                Self::extract_body_from_parts(nested, text, html);
            }
        }
    }

    fn decode_body(body: &GmailBody) -> Option<String> {
        let data = body.data.as_ref()?;
        let decoded = BASE64_URL_SAFE_NO_PAD.decode(data).ok()?;
        String::from_utf8(decoded).ok()
    }

    /// Parses Gmail's `internalDate` (epoch milliseconds as a string).
    fn parse_internal_date(raw: Option<&str>) -> Result<DateTime<Utc>> {
        let millis: i64 = raw
            .ok_or_else(|| MailError::Internal("message missing internalDate".to_string()))?
            .parse()
            .map_err(|e| MailError::Internal(format!("invalid internalDate: {}", e)))?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| MailError::Internal(format!("internalDate out of range: {}", millis)))
    }
}

#[async_trait]
impl MailClient for GmailClient {
    async fn list_labels(&self, access_token: &str) -> Result<Vec<MailLabel>> {
        let response: LabelsListResponse = self.get(access_token, "/labels").await?;
        Ok(response
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| MailLabel {
                id: l.id,
                name: l.name,
            })
            .collect())
    }

    async fn list_message_ids(
        &self,
        access_token: &str,
        label_id: &str,
        after: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        let endpoint = format!(
            "/messages?{}",
            Self::list_query(label_id, after, page_token)
        );
        let response: MessagesListResponse = self.get(access_token, &endpoint).await?;

        Ok(MessagePage {
            ids: response
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.id)
                .collect(),
            next_page_token: response.next_page_token,
        })
    }

    async fn get_message(&self, access_token: &str, message_id: &str) -> Result<MailMessage> {
        let endpoint = format!("/messages/{}?format=full", message_id);
        let message: GmailMessage = self.get(access_token, &endpoint).await?;

        let internal_date = Self::parse_internal_date(message.internal_date.as_deref())?;
        let (subject, from, body_text, body_html) = match &message.payload {
            Some(payload) => {
                let (text, html) = Self::extract_body(payload);
                (
                    Self::header_value(payload, "Subject").map(String::from),
                    Self::header_value(payload, "From").map(String::from),
                    text,
                    html,
                )
            }
            None => (None, None, None, None),
        };

        Ok(MailMessage {
            id: message.id,
            subject,
            from,
            internal_date,
            body_text,
            body_html,
            snippet: message.snippet,
        })
    }
}
