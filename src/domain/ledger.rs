//! Ledger reference entities: banks, accounts, and currencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{AccountId, BankId, CredentialId, CurrencyId};

/// A bank, created lazily the first time an alert names it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub id: BankId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A bank account owned by one connected mailbox.
///
/// Accounts are also created lazily from alert fields; `balance` tracks the
/// most recent `current_balance` seen for the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Account number as printed in alerts, possibly masked.
    pub number: String,
    pub name: String,
    pub bank_id: BankId,
    pub credential_id: CredentialId,
    pub balance: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// A currency known to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Currency {
    pub id: CurrencyId,
    /// ISO 4217 code, stored uppercase.
    pub code: String,
    /// Human-readable name, e.g. "United States Dollar".
    pub name: String,
    pub symbol: String,
}
