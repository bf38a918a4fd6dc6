//! Core identifier types for domain entities.
//!
//! These newtype wrappers provide type safety for entity identifiers,
//! preventing accidental mixing of different ID types. All of them wrap the
//! SQLite rowid of their table.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id! {
    /// Unique identifier for a mailbox credential.
    CredentialId
}

row_id! {
    /// Unique identifier for a bank.
    BankId
}

row_id! {
    /// Unique identifier for a bank account within a bank.
    AccountId
}

row_id! {
    /// Unique identifier for a currency.
    CurrencyId
}

row_id! {
    /// Unique identifier for a transaction category.
    CategoryId
}

row_id! {
    /// Unique identifier for a ledger transaction row.
    TransactionId
}

row_id! {
    /// Unique identifier for a stored notification.
    NotificationId
}

row_id! {
    /// Unique identifier for a cached exchange rate.
    RateId
}
