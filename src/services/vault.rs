//! Credential vault: owns OAuth token lifecycle per linked mailbox.
//!
//! Tokens are refreshed proactively just before expiry so that a scan never
//! starts with a token that dies mid-pagination. Revocation is detected from
//! the upstream `invalid_grant` signal and flips the credential to revoked,
//! which takes it out of the sync schedule until the user reconnects.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::domain::MailCredential;
use crate::providers::oauth::{OAuthClient, OAuthError};
use crate::storage::{queries, Database};

use super::error::{Result, SyncError};

/// Tokens expiring within this window are refreshed eagerly.
const EXPIRY_SLACK_SECS: i64 = 60;

/// Manages OAuth tokens for connected mailboxes.
pub struct CredentialVault {
    db: Database,
    oauth: Arc<dyn OAuthClient>,
    clock: Arc<dyn Clock>,
}

impl CredentialVault {
    pub fn new(db: Database, oauth: Arc<dyn OAuthClient>, clock: Arc<dyn Clock>) -> Self {
        Self { db, oauth, clock }
    }

    /// Connects a mailbox from an authorization code, storing the token
    /// pair. Reconnecting a previously revoked mailbox reuses its row and
    /// clears the revoked flag.
    pub async fn connect(&self, email: &str, code: &str) -> Result<MailCredential> {
        let grant = self.oauth.exchange_code(code).await?;
        let refresh_token = grant.refresh_token.ok_or(SyncError::AuthExpired)?;

        let now = self.clock.now();
        let credential = queries::credentials::upsert(
            &self.db,
            queries::credentials::NewCredential {
                email: email.to_string(),
                access_token: grant.access_token,
                refresh_token,
                expires_at: now + Duration::seconds(grant.expires_in as i64),
            },
            now,
        )
        .await?;

        info!(credential_id = %credential.id, email, "mailbox connected");
        Ok(credential)
    }

    /// Returns a credential with a usable access token, refreshing it when
    /// it is missing or expires within the slack window.
    ///
    /// `AuthExpired` and `AuthRevoked` both flag the stored credential as
    /// revoked so the scheduler stops retrying until the user reconnects.
    pub async fn ensure_valid(&self, credential: &MailCredential) -> Result<MailCredential> {
        if credential.revoked {
            return Err(SyncError::AuthRevoked("mailbox is unlinked".to_string()));
        }

        let now = self.clock.now();
        let remaining = credential.expires_at - now;
        if !credential.access_token.is_empty() && remaining > Duration::seconds(EXPIRY_SLACK_SECS)
        {
            return Ok(credential.clone());
        }

        self.force_refresh(credential).await
    }

    /// Refreshes the access token regardless of its stored expiry.
    ///
    /// Used when the provider rejects a token the vault still considered
    /// valid, which happens when the user revokes and re-grants access or
    /// when upstream invalidates tokens early.
    pub async fn force_refresh(&self, credential: &MailCredential) -> Result<MailCredential> {
        if credential.refresh_token.is_empty() {
            warn!(credential_id = %credential.id, "no refresh token, unlinking mailbox");
            queries::credentials::mark_revoked(&self.db, credential.id).await?;
            return Err(SyncError::AuthExpired);
        }

        let now = self.clock.now();
        match self.oauth.refresh(&credential.refresh_token).await {
            Ok(grant) => {
                let expires_at = now + Duration::seconds(grant.expires_in as i64);
                queries::credentials::update_tokens(
                    &self.db,
                    credential.id,
                    grant.access_token.clone(),
                    expires_at,
                )
                .await?;
                info!(credential_id = %credential.id, "access token refreshed");

                let mut refreshed = credential.clone();
                refreshed.access_token = grant.access_token;
                refreshed.expires_at = expires_at;
                Ok(refreshed)
            }
            Err(OAuthError::Revoked(reason)) => {
                warn!(credential_id = %credential.id, %reason, "refresh grant revoked, unlinking mailbox");
                queries::credentials::mark_revoked(&self.db, credential.id).await?;
                Err(SyncError::AuthRevoked(reason))
            }
            Err(other) => Err(other.into()),
        }
    }
}
