//! Error taxonomy for the ingestion pipeline.

use thiserror::Error;

use crate::providers::ai::LlmError;
use crate::providers::fx::FxError;
use crate::providers::mail::MailError;
use crate::providers::oauth::OAuthError;
use crate::storage::DatabaseError;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the ingestion pipeline.
///
/// Duplicate transactions are deliberately not represented here: replaying
/// an already-ingested message is a success outcome, reported through
/// [`UpsertOutcome`](crate::services::UpsertOutcome).
#[derive(Debug, Error)]
pub enum SyncError {
    /// The access token is unusable and no refresh token exists.
    #[error("credential expired and cannot be refreshed")]
    AuthExpired,

    /// The upstream rejected the refresh token; the user must reconnect.
    #[error("credential revoked: {0}")]
    AuthRevoked(String),

    /// The configured transaction label does not exist in the mailbox.
    #[error("label not found: {0}")]
    LabelNotFound(String),

    /// The extraction capability returned output that does not conform to
    /// the transaction schema.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Transient failure from the mailbox, FX, or LLM upstream.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Required reference data is missing (e.g. no base-currency row).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage-layer failure.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<OAuthError> for SyncError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::Revoked(reason) => SyncError::AuthRevoked(reason),
            other => SyncError::Upstream(other.to_string()),
        }
    }
}

impl From<MailError> for SyncError {
    fn from(e: MailError) -> Self {
        match e {
            MailError::Authentication(_) => SyncError::AuthExpired,
            other => SyncError::Upstream(other.to_string()),
        }
    }
}

impl From<LlmError> for SyncError {
    fn from(e: LlmError) -> Self {
        SyncError::Upstream(e.to_string())
    }
}

impl From<FxError> for SyncError {
    fn from(e: FxError) -> Self {
        SyncError::Upstream(e.to_string())
    }
}

impl SyncError {
    /// Whether this error should unlink the mailbox until the user
    /// reconnects.
    pub fn requires_relink(&self) -> bool {
        matches!(self, SyncError::AuthExpired | SyncError::AuthRevoked(_))
    }
}
