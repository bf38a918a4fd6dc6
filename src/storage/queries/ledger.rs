//! Bank, account, and currency lookups.
//!
//! These run inside the upsert transaction, so they take a raw connection
//! rather than the async [`Database`](crate::storage::Database) handle.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{Account, AccountId, Bank, BankId, CredentialId, Currency, CurrencyId};

const CURRENCY_COLUMNS: &str = "id, code, name, symbol";
const ACCOUNT_COLUMNS: &str = "id, number, name, bank_id, credential_id, balance, created_at";

/// Resolves a currency by ISO code (case-insensitive) or by name substring.
///
/// Bank alerts print currencies inconsistently: "USD", "usd", "US Dollar",
/// "Naira". Exact code match wins; otherwise the first name match by id.
pub fn find_currency(conn: &Connection, raw: &str) -> rusqlite::Result<Option<Currency>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM currencies WHERE code = UPPER(?1)",
        CURRENCY_COLUMNS
    ))?;
    if let Some(by_code) = stmt.query_row([trimmed], row_to_currency).optional()? {
        return Ok(Some(by_code));
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM currencies WHERE name LIKE '%' || ?1 || '%' ORDER BY id ASC LIMIT 1",
        CURRENCY_COLUMNS
    ))?;
    stmt.query_row([trimmed], row_to_currency).optional()
}

/// Retrieves a currency by exact ISO code.
pub fn currency_by_code(conn: &Connection, code: &str) -> rusqlite::Result<Option<Currency>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM currencies WHERE code = UPPER(?1)",
        CURRENCY_COLUMNS
    ))?;
    stmt.query_row([code], row_to_currency).optional()
}

/// Finds a bank by name, creating it on first sight.
pub fn get_or_create_bank(
    conn: &Connection,
    name: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<Bank> {
    let existing = conn
        .query_row(
            "SELECT id, name, created_at FROM banks WHERE name = ?1",
            [name],
            row_to_bank,
        )
        .optional()?;
    if let Some(bank) = existing {
        return Ok(bank);
    }

    conn.execute(
        "INSERT INTO banks (name, created_at) VALUES (?1, ?2)",
        params![name, now.to_rfc3339()],
    )?;
    Ok(Bank {
        id: BankId(conn.last_insert_rowid()),
        name: name.to_string(),
        created_at: now,
    })
}

/// Finds an account by number and name within a bank and mailbox, creating
/// it on first sight with the balance seeded from the alert. One card
/// number can carry several named sub-accounts, so the name is part of the
/// identity.
pub fn get_or_create_account(
    conn: &Connection,
    credential_id: CredentialId,
    bank_id: BankId,
    number: &str,
    name: &str,
    initial_balance: Option<f64>,
    now: DateTime<Utc>,
) -> rusqlite::Result<Account> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM accounts
         WHERE credential_id = ?1 AND bank_id = ?2 AND number = ?3 AND name = ?4",
        ACCOUNT_COLUMNS
    ))?;
    let existing = stmt
        .query_row(
            params![credential_id.0, bank_id.0, number, name],
            row_to_account,
        )
        .optional()?;
    if let Some(account) = existing {
        return Ok(account);
    }

    conn.execute(
        r#"
        INSERT INTO accounts (number, name, bank_id, credential_id, balance, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            number,
            name,
            bank_id.0,
            credential_id.0,
            initial_balance,
            now.to_rfc3339(),
        ],
    )?;
    Ok(Account {
        id: AccountId(conn.last_insert_rowid()),
        number: number.to_string(),
        name: name.to_string(),
        bank_id,
        credential_id,
        balance: initial_balance,
        created_at: now,
    })
}

/// Updates the tracked balance for an account.
pub fn update_balance(
    conn: &Connection,
    account_id: AccountId,
    balance: f64,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE accounts SET balance = ?2 WHERE id = ?1",
        params![account_id.0, balance],
    )?;
    Ok(())
}

fn row_to_currency(row: &Row<'_>) -> rusqlite::Result<Currency> {
    Ok(Currency {
        id: CurrencyId(row.get(0)?),
        code: row.get(1)?,
        name: row.get(2)?,
        symbol: row.get(3)?,
    })
}

fn row_to_bank(row: &Row<'_>) -> rusqlite::Result<Bank> {
    let created_at: String = row.get(2)?;
    Ok(Bank {
        id: BankId(row.get(0)?),
        name: row.get(1)?,
        created_at: super::parse_utc(2, created_at)?,
    })
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    let created_at: String = row.get(6)?;
    Ok(Account {
        id: AccountId(row.get(0)?),
        number: row.get(1)?,
        name: row.get(2)?,
        bank_id: BankId(row.get(3)?),
        credential_id: CredentialId(row.get(4)?),
        balance: row.get(5)?,
        created_at: super::parse_utc(6, created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::Database;
    use crate::storage::queries::credentials::{self, NewCredential};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    async fn seeded_credential(db: &Database) -> CredentialId {
        credentials::upsert(
            db,
            NewCredential {
                email: "user@example.com".to_string(),
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
                expires_at: now(),
            },
            now(),
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn find_currency_by_code_is_case_insensitive() {
        let db = Database::open_in_memory().await.unwrap();
        let found = db
            .with_conn(|conn| Ok(find_currency(conn, "usd")?))
            .await
            .unwrap();
        assert_eq!(found.unwrap().code, "USD");
    }

    #[tokio::test]
    async fn find_currency_falls_back_to_name_match() {
        let db = Database::open_in_memory().await.unwrap();

        let naira = db
            .with_conn(|conn| Ok(find_currency(conn, "Naira")?))
            .await
            .unwrap();
        assert_eq!(naira.unwrap().code, "NGN");

        let missing = db
            .with_conn(|conn| Ok(find_currency(conn, "Doubloon")?))
            .await
            .unwrap();
        assert!(missing.is_none());

        let blank = db
            .with_conn(|conn| Ok(find_currency(conn, "  ")?))
            .await
            .unwrap();
        assert!(blank.is_none());
    }

    #[tokio::test]
    async fn bank_and_account_are_created_once() {
        let db = Database::open_in_memory().await.unwrap();
        let credential_id = seeded_credential(&db).await;

        let (first, second) = db
            .with_conn(move |conn| {
                let bank = get_or_create_bank(conn, "Acme Bank", now())?;
                let first = get_or_create_account(
                    conn,
                    credential_id,
                    bank.id,
                    "0123456789",
                    "Main",
                    Some(100.0),
                    now(),
                )?;
                // Second sight: existing row, balance untouched.
                let second = get_or_create_account(
                    conn,
                    credential_id,
                    bank.id,
                    "0123456789",
                    "Main",
                    Some(999.0),
                    now(),
                )?;
                Ok((first, second))
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.balance, Some(100.0));
    }

    #[tokio::test]
    async fn same_number_different_name_is_a_distinct_account() {
        let db = Database::open_in_memory().await.unwrap();
        let credential_id = seeded_credential(&db).await;

        let (checking, savings) = db
            .with_conn(move |conn| {
                let bank = get_or_create_bank(conn, "Acme Bank", now())?;
                let checking = get_or_create_account(
                    conn,
                    credential_id,
                    bank.id,
                    "0123456789",
                    "Checking",
                    Some(100.0),
                    now(),
                )?;
                let savings = get_or_create_account(
                    conn,
                    credential_id,
                    bank.id,
                    "0123456789",
                    "Savings",
                    Some(50.0),
                    now(),
                )?;
                Ok((checking, savings))
            })
            .await
            .unwrap();

        assert_ne!(checking.id, savings.id);
        assert_eq!(savings.balance, Some(50.0));
    }
}
