//! Domain entities for the email-to-ledger pipeline.

mod category;
mod credential;
mod ledger;
mod notification;
mod rate;
mod transaction;
mod types;

pub use category::{Category, CategoryKind, UNCATEGORIZED};
pub use credential::{MailCredential, SyncState, SyncStatus};
pub use ledger::{Account, Bank, Currency};
pub use notification::{Notification, NotificationKind};
pub use rate::ExchangeRate;
pub use transaction::{ExtractedTransaction, LedgerTransaction, TransactionKind};
pub use types::{
    AccountId, BankId, CategoryId, CredentialId, CurrencyId, NotificationId, RateId,
    TransactionId,
};
