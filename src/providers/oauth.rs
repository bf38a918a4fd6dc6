//! Google OAuth 2.0 token plumbing.
//!
//! The daemon holds one OAuth application identity (client id/secret) and a
//! long-lived refresh token per connected mailbox. This module exchanges
//! authorization codes for token pairs and mints fresh access tokens from
//! refresh tokens.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::GoogleSettings;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Gmail read access plus the userinfo scopes needed to resolve the
/// connected address and profile during the callback.
const OAUTH_SCOPES: &str = "https://www.googleapis.com/auth/gmail.readonly \
     https://www.googleapis.com/auth/userinfo.email \
     https://www.googleapis.com/auth/userinfo.profile";

/// Result type alias for OAuth operations.
pub type Result<T> = std::result::Result<T, OAuthError>;

/// Errors that can occur while talking to the token endpoint.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// The refresh token was revoked or expired; the user must reconnect
    /// the mailbox.
    #[error("grant revoked: {0}")]
    Revoked(String),

    /// The token endpoint rejected the request for another reason.
    #[error("token endpoint rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A freshly minted access token.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// Seconds until the token expires.
    pub expires_in: u64,
}

/// A full token pair from an authorization-code exchange.
#[derive(Debug, Clone)]
pub struct CodeGrant {
    pub access_token: String,
    /// Absent when the user previously granted access and Google elides the
    /// refresh token from the response.
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

/// OAuth token operations, abstracted for testing.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Exchanges an authorization code for a token pair.
    async fn exchange_code(&self, code: &str) -> Result<CodeGrant>;

    /// Mints a fresh access token from a refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
}

/// OAuth token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

/// OAuth error response body.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

/// [`OAuthClient`] backed by Google's token endpoint.
pub struct GoogleOAuth {
    client: reqwest::Client,
    settings: GoogleSettings,
}

impl GoogleOAuth {
    pub fn new(settings: GoogleSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    /// Consent-screen URL the user visits to connect a mailbox.
    ///
    /// `access_type=offline` plus `prompt=consent` forces Google to include
    /// a refresh token in the code exchange.
    pub fn authorize_url(&self, state: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", OAUTH_SCOPES)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state)
            .finish();
        format!("{}?{}", GOOGLE_AUTH_URL, query)
    }

    async fn post_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(params)
            .send()
            .await
            .map_err(|e| OAuthError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // "invalid_grant" means the refresh token itself is dead, not
            // just this request.
            let parsed: Option<TokenErrorResponse> = serde_json::from_str(&body).ok();
            if parsed
                .as_ref()
                .and_then(|e| e.error.as_deref())
                .is_some_and(|e| e == "invalid_grant")
            {
                let description = parsed
                    .and_then(|e| e.error_description)
                    .unwrap_or_else(|| "invalid_grant".to_string());
                return Err(OAuthError::Revoked(description));
            }
            return Err(OAuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| OAuthError::Internal(format!("parse token response: {}", e)))
    }
}

#[async_trait]
impl OAuthClient for GoogleOAuth {
    async fn exchange_code(&self, code: &str) -> Result<CodeGrant> {
        let params = [
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ];

        let token = self.post_token(&params).await?;
        Ok(CodeGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let params = [
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let token = self.post_token(&params).await?;
        Ok(TokenGrant {
            access_token: token.access_token,
            expires_in: token.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_includes_offline_access() {
        let oauth = GoogleOAuth::new(GoogleSettings {
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost:8080/callback".to_string(),
        });

        let url = oauth.authorize_url("xyz");
        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=xyz"));
        assert!(!url.contains("secret"));
    }

    #[test]
    fn authorize_url_requests_mail_and_userinfo_scopes() {
        let oauth = GoogleOAuth::new(GoogleSettings {
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost:8080/callback".to_string(),
        });

        let url = oauth.authorize_url("xyz");
        assert!(url.contains("gmail.readonly"));
        assert!(url.contains("userinfo.email"));
        assert!(url.contains("userinfo.profile"));
        // Scopes travel as one space-delimited parameter.
        assert!(url.contains("gmail.readonly+https"));
    }
}
