//! Ledger transaction persistence.
//!
//! Inserts run inside the upsert transaction and so take a raw connection;
//! read paths use the async [`Database`](crate::storage::Database) handle.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};

use crate::domain::{
    AccountId, CategoryId, CredentialId, CurrencyId, LedgerTransaction, TransactionId,
    TransactionKind,
};
use crate::storage::database::{Database, Result};

use super::{parse_date, parse_utc};

const TRANSACTION_COLUMNS: &str = "id, reference, kind, amount, date, description, \
     current_balance, account_id, currency_id, category_id, credential_id, source_message_id, \
     created_at";

/// Fields for a new ledger row.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub reference: String,
    pub kind: TransactionKind,
    pub amount: f64,
    pub date: NaiveDate,
    pub description: String,
    pub current_balance: Option<f64>,
    pub account_id: AccountId,
    pub currency_id: CurrencyId,
    pub category_id: CategoryId,
    pub credential_id: CredentialId,
    pub source_message_id: String,
}

/// Inserts a transaction if its `(account, reference)` key is new.
///
/// Returns the new row id, or `None` when an identical key already exists
/// (the idempotent-replay case).
pub fn insert_if_new(
    conn: &Connection,
    new: &NewTransaction,
    now: DateTime<Utc>,
) -> rusqlite::Result<Option<TransactionId>> {
    let changed = conn.execute(
        r#"
        INSERT OR IGNORE INTO transactions (
            reference, kind, amount, date, description, current_balance,
            account_id, currency_id, category_id, credential_id,
            source_message_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
        params![
            new.reference,
            new.kind.as_str(),
            new.amount,
            new.date.to_string(),
            new.description,
            new.current_balance,
            new.account_id.0,
            new.currency_id.0,
            new.category_id.0,
            new.credential_id.0,
            new.source_message_id,
            now.to_rfc3339(),
        ],
    )?;

    if changed == 0 {
        Ok(None)
    } else {
        Ok(Some(TransactionId(conn.last_insert_rowid())))
    }
}

/// Lists the most recent transactions for a mailbox, newest first.
pub async fn list_recent(
    db: &Database,
    credential_id: CredentialId,
    limit: u32,
) -> Result<Vec<LedgerTransaction>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE credential_id = ?1 \
             ORDER BY date DESC, id DESC LIMIT ?2",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![credential_id.0, limit], row_to_transaction)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Lists all transactions in a category, newest first.
pub async fn list_by_category(
    db: &Database,
    category_id: CategoryId,
) -> Result<Vec<LedgerTransaction>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE category_id = ?1 ORDER BY date DESC, id DESC",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map([category_id.0], row_to_transaction)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Counts rows ingested from one mailbox.
pub async fn count_for_credential(db: &Database, credential_id: CredentialId) -> Result<i64> {
    db.with_conn(move |conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE credential_id = ?1",
            [credential_id.0],
            |row| row.get(0),
        )?)
    })
    .await
}

fn row_to_transaction(row: &Row<'_>) -> std::result::Result<LedgerTransaction, rusqlite::Error> {
    let kind: String = row.get(2)?;
    let date: String = row.get(4)?;
    let created_at: String = row.get(12)?;

    Ok(LedgerTransaction {
        id: TransactionId(row.get(0)?),
        reference: row.get(1)?,
        kind: TransactionKind::parse(&kind),
        amount: row.get(3)?,
        date: parse_date(4, date)?,
        description: row.get(5)?,
        current_balance: row.get(6)?,
        account_id: AccountId(row.get(7)?),
        currency_id: CurrencyId(row.get(8)?),
        category_id: CategoryId(row.get(9)?),
        credential_id: CredentialId(row.get(10)?),
        source_message_id: row.get(11)?,
        created_at: parse_utc(12, created_at)?,
    })
}
