//! Ledger upserter: idempotent persistence of extracted transactions.
//!
//! Each upsert lazily resolves or creates the Currency, Bank, and Account
//! the alert references, classifies the description, and inserts the
//! transaction row keyed by `(account, reference)`. Replaying a message is
//! a duplicate outcome, not an error.

use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::domain::{
    AccountId, Category, CategoryId, CredentialId, CurrencyId, ExtractedTransaction,
    TransactionId,
};
use crate::storage::{queries, Database};

use super::classifier::CategoryClassifier;
use super::error::{Result, SyncError};

/// Placeholder for alerts that omit the account number.
const UNKNOWN_ACCOUNT_NUMBER: &str = "UNKNOWN";

/// Placeholder for alerts that omit the bank name.
const UNKNOWN_BANK: &str = "Unknown Bank";

/// Result of one upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new ledger row was written.
    Created {
        transaction_id: TransactionId,
        category_id: CategoryId,
    },
    /// The `(account, reference)` key already existed; nothing was written.
    Duplicate,
}

/// Writes extracted transactions into the ledger.
pub struct LedgerUpserter {
    db: Database,
    classifier: Arc<CategoryClassifier>,
    clock: Arc<dyn Clock>,
    /// ISO code used when an alert's currency cannot be resolved.
    base_currency: String,
}

impl LedgerUpserter {
    pub fn new(
        db: Database,
        classifier: Arc<CategoryClassifier>,
        clock: Arc<dyn Clock>,
        base_currency: impl Into<String>,
    ) -> Self {
        Self {
            db,
            classifier,
            clock,
            base_currency: base_currency.into(),
        }
    }

    /// Upserts one extracted transaction for a mailbox.
    pub async fn upsert(
        &self,
        credential_id: CredentialId,
        source_message_id: &str,
        fields: &ExtractedTransaction,
    ) -> Result<UpsertOutcome> {
        let now = self.clock.now();
        let reference = fields.natural_key();

        // Resolve reference entities and short-circuit on a known key
        // before spending an LLM call on classification.
        let (account_id, currency_id, already_exists) = self
            .resolve_ledger_refs(credential_id, fields, &reference, now)
            .await?;
        if already_exists {
            debug!(%reference, "transaction already ingested");
            return Ok(UpsertOutcome::Duplicate);
        }

        let category_id = self.classify(&fields.description).await?;

        let new = queries::transactions::NewTransaction {
            reference: reference.clone(),
            kind: fields.kind,
            amount: fields.amount,
            date: fields.date,
            description: fields.description.clone(),
            current_balance: fields.current_balance,
            account_id,
            currency_id,
            category_id,
            credential_id,
            source_message_id: source_message_id.to_string(),
        };
        let balance = fields.current_balance;

        let inserted = self
            .db
            .transaction(move |tx| {
                let inserted = queries::transactions::insert_if_new(tx, &new, now)?;
                if inserted.is_some() {
                    if let Some(balance) = balance {
                        queries::ledger::update_balance(tx, account_id, balance)?;
                    }
                }
                Ok(inserted)
            })
            .await?;

        match inserted {
            Some(transaction_id) => {
                info!(%transaction_id, %reference, "transaction ingested");
                Ok(UpsertOutcome::Created {
                    transaction_id,
                    category_id,
                })
            }
            // Lost a race with a concurrent sync of the same mailbox.
            None => Ok(UpsertOutcome::Duplicate),
        }
    }

    /// Resolves currency, bank, and account rows, and checks whether the
    /// idempotency key is already present.
    async fn resolve_ledger_refs(
        &self,
        credential_id: CredentialId,
        fields: &ExtractedTransaction,
        reference: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(AccountId, CurrencyId, bool)> {
        let raw_currency = fields.currency.clone().unwrap_or_default();
        let base_currency = self.base_currency.clone();
        let bank_name = fields
            .bank_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_BANK.to_string());
        let account_number = fields
            .account_number
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_ACCOUNT_NUMBER.to_string());
        let account_name = fields
            .account_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| bank_name.clone());
        let initial_balance = fields.current_balance;
        let reference = reference.to_string();

        let base = self.base_currency.clone();
        let resolved = self
            .db
            .transaction(move |tx| {
                let currency = match queries::ledger::find_currency(tx, &raw_currency)? {
                    Some(currency) => Some(currency),
                    None => queries::ledger::currency_by_code(tx, &base_currency)?,
                };
                let Some(currency) = currency else {
                    // Nothing to attach the amount to; create no rows.
                    return Ok(None);
                };

                let bank = queries::ledger::get_or_create_bank(tx, &bank_name, now)?;
                let account = queries::ledger::get_or_create_account(
                    tx,
                    credential_id,
                    bank.id,
                    &account_number,
                    &account_name,
                    initial_balance,
                    now,
                )?;

                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM transactions WHERE account_id = ?1 AND reference = ?2)",
                    rusqlite::params![account.id.0, reference],
                    |row| row.get(0),
                )?;

                Ok(Some((account.id, currency.id, exists)))
            })
            .await?;

        resolved.ok_or_else(|| {
            SyncError::Config(format!("base currency {} missing from reference table", base))
        })
    }

    /// Classifies a description, falling back to the sentinel category.
    async fn classify(&self, description: &str) -> Result<CategoryId> {
        let categories = queries::categories::list_all(&self.db).await?;
        let sentinel: &Category = categories
            .iter()
            .find(|c| c.is_uncategorized())
            .ok_or_else(|| SyncError::Config("sentinel category missing".to_string()))?;

        Ok(self
            .classifier
            .classify(description, &categories)
            .await
            .map(|c| c.id)
            .unwrap_or(sentinel.id))
    }
}
