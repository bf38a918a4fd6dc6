//! Upstream exchange-rate provider.

use async_trait::async_trait;
use serde::Deserialize;

/// Result type alias for rate provider operations.
pub type Result<T> = std::result::Result<T, FxError>;

/// Errors from the upstream rate provider.
#[derive(Debug, thiserror::Error)]
pub enum FxError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("provider returned no result: {0}")]
    NoResult(String),
}

/// Fetches spot rates for currency pairs.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Returns units of `to` per one unit of `from`.
    async fn fetch(&self, from: &str, to: &str) -> Result<f64>;
}

/// Conversion endpoint response.
#[derive(Debug, Deserialize)]
struct ConvertResponse {
    success: Option<bool>,
    result: Option<f64>,
    error: Option<serde_json::Value>,
}

/// [`RateSource`] backed by an exchangerate.host-style HTTP API.
pub struct HttpRateSource {
    client: reqwest::Client,
    base_url: String,
    access_key: String,
}

impl HttpRateSource {
    pub fn new(base_url: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_key: access_key.into(),
        }
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch(&self, from: &str, to: &str) -> Result<f64> {
        let response = self
            .client
            .get(format!("{}/convert", self.base_url))
            .query(&[
                ("access_key", self.access_key.as_str()),
                ("from", from),
                ("to", to),
                ("amount", "1"),
            ])
            .send()
            .await
            .map_err(|e| FxError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FxError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ConvertResponse = response
            .json()
            .await
            .map_err(|e| FxError::NoResult(format!("parse response: {}", e)))?;

        // The API reports failures with HTTP 200 and success=false.
        if parsed.success == Some(false) {
            let detail = parsed
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "success=false".to_string());
            return Err(FxError::NoResult(detail));
        }

        parsed
            .result
            .ok_or_else(|| FxError::NoResult(format!("missing result for {}{}", from, to)))
    }
}
