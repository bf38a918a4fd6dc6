//! Pipeline services, each owning one stage of email-to-ledger ingestion.

pub mod classifier;
pub mod coordinator;
mod error;
pub mod extractor;
pub mod notifier;
pub mod rates;
pub mod scanner;
pub mod upserter;
pub mod vault;

pub use classifier::CategoryClassifier;
pub use coordinator::{JobReport, SyncEvent, SyncJobCoordinator};
pub use error::{Result, SyncError};
pub use extractor::TransactionExtractor;
pub use notifier::{Notifier, PushEvent};
pub use rates::ExchangeRateCache;
pub use scanner::{MailboxScanner, ScannedMessage};
pub use upserter::{LedgerUpserter, UpsertOutcome};
pub use vault::CredentialVault;
