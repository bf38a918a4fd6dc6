//! Transaction types: what the extractor produces and what the ledger
//! stores.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::types::{AccountId, CategoryId, CredentialId, CurrencyId, TransactionId};

/// Kind of money movement as labelled by the extractor.
///
/// Banks phrase alerts in many ways; anything outside the known set lands
/// in `Other` rather than failing the extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Debit,
    Credit,
    Transfer,
    Payment,
    Withdrawal,
    Deposit,
    Reversal,
    #[serde(other)]
    Other,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Debit => "debit",
            TransactionKind::Credit => "credit",
            TransactionKind::Transfer => "transfer",
            TransactionKind::Payment => "payment",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Deposit => "deposit",
            TransactionKind::Reversal => "reversal",
            TransactionKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "debit" => TransactionKind::Debit,
            "credit" => TransactionKind::Credit,
            "transfer" => TransactionKind::Transfer,
            "payment" => TransactionKind::Payment,
            "withdrawal" => TransactionKind::Withdrawal,
            "deposit" => TransactionKind::Deposit,
            "reversal" => TransactionKind::Reversal,
            _ => TransactionKind::Other,
        }
    }
}

/// Structured fields pulled out of one bank alert email by the extractor.
///
/// Optional fields stay `None` when the alert simply does not carry them;
/// the upserter fills in sensible fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTransaction {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: f64,
    /// ISO 4217 code or free-form currency name as printed in the email.
    pub currency: Option<String>,
    /// Value date in `YYYY-MM-DD`.
    pub date: NaiveDate,
    pub description: String,
    /// Balance after the transaction, when the alert includes one.
    pub current_balance: Option<f64>,
    /// Bank-assigned reference; preferred natural key for deduplication.
    pub transaction_id: Option<String>,
    pub account_number: Option<String>,
    pub account_name: Option<String>,
    pub bank_name: Option<String>,
}

impl ExtractedTransaction {
    /// Natural key used for idempotent ingestion: the bank reference when
    /// present, otherwise the value date rendered as an ISO timestamp.
    pub fn natural_key(&self) -> String {
        match &self.transaction_id {
            Some(reference) if !reference.is_empty() => reference.clone(),
            _ => format!("{}T00:00:00.000Z", self.date),
        }
    }
}

/// A transaction row as persisted in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    /// Natural key from [`ExtractedTransaction::natural_key`]; unique per
    /// account.
    pub reference: String,
    pub kind: TransactionKind,
    pub amount: f64,
    pub date: NaiveDate,
    pub description: String,
    pub current_balance: Option<f64>,
    pub account_id: AccountId,
    pub currency_id: CurrencyId,
    pub category_id: CategoryId,
    /// Mailbox this row was ingested from.
    pub credential_id: CredentialId,
    /// Provider message id of the source email.
    pub source_message_id: String,
    pub created_at: DateTime<Utc>,
}
