//! SQL schema definitions as const strings.
//!
//! Contains the complete SQLite schema for the ledger, plus seed rows for
//! the sentinel category and common currencies. Every statement is
//! idempotent so migrations can run on every startup.

/// SQL to create the credentials table.
pub const CREATE_CREDENTIALS: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    access_token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    revoked INTEGER NOT NULL DEFAULT 0,
    sync_state TEXT NOT NULL DEFAULT 'idle',
    failed_reason TEXT,
    last_sync_at TEXT,
    emails_received INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
)
"#;

/// SQL to create the banks table.
pub const CREATE_BANKS: &str = r#"
CREATE TABLE IF NOT EXISTS banks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
)
"#;

/// SQL to create the currencies table.
pub const CREATE_CURRENCIES: &str = r#"
CREATE TABLE IF NOT EXISTS currencies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    symbol TEXT NOT NULL
)
"#;

/// SQL to create the accounts table.
pub const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    number TEXT NOT NULL,
    name TEXT NOT NULL,
    bank_id INTEGER NOT NULL REFERENCES banks(id),
    credential_id INTEGER NOT NULL REFERENCES credentials(id),
    balance REAL,
    created_at TEXT NOT NULL,
    UNIQUE (credential_id, bank_id, number, name)
)
"#;

/// SQL to create the categories table.
pub const CREATE_CATEGORIES: &str = r#"
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    kind TEXT NOT NULL DEFAULT 'expense',
    icon TEXT,
    patterns TEXT NOT NULL DEFAULT '',
    embedding BLOB,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
)
"#;

/// SQL to create the transactions table.
pub const CREATE_TRANSACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    reference TEXT NOT NULL,
    kind TEXT NOT NULL,
    amount REAL NOT NULL,
    date TEXT NOT NULL,
    description TEXT NOT NULL,
    current_balance REAL,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    currency_id INTEGER NOT NULL REFERENCES currencies(id),
    category_id INTEGER NOT NULL REFERENCES categories(id),
    credential_id INTEGER NOT NULL REFERENCES credentials(id),
    source_message_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (account_id, reference)
)
"#;

/// SQL to create transaction indexes.
pub const CREATE_TRANSACTION_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);
CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category_id);
CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date DESC)
"#;

/// SQL to create the exchange_rates table.
pub const CREATE_EXCHANGE_RATES: &str = r#"
CREATE TABLE IF NOT EXISTS exchange_rates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pair TEXT NOT NULL UNIQUE,
    rate REAL NOT NULL,
    fetched_at TEXT NOT NULL,
    was_updated INTEGER NOT NULL DEFAULT 1
)
"#;

/// SQL to create the notifications table.
pub const CREATE_NOTIFICATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    credential_id INTEGER NOT NULL REFERENCES credentials(id),
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
)
"#;

/// SQL to create notification indexes.
pub const CREATE_NOTIFICATION_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_notifications_credential ON notifications(credential_id, read)
"#;

/// Seed row for the sentinel category.
///
/// Transactions that cannot be classified land here; the upserter treats a
/// missing sentinel as a configuration error.
pub const SEED_UNCATEGORIZED: &str = r#"
INSERT OR IGNORE INTO categories (name, description, kind, icon, patterns)
VALUES ('Uncategorized', 'Transactions that could not be classified', 'expense', 'help-circle', '')
"#;

/// Seed rows for commonly seen currencies.
pub const SEED_CURRENCIES: &str = r#"
INSERT OR IGNORE INTO currencies (code, name, symbol) VALUES
    ('USD', 'United States Dollar', '$'),
    ('EUR', 'Euro', '€'),
    ('GBP', 'British Pound Sterling', '£'),
    ('NGN', 'Nigerian Naira', '₦'),
    ('KES', 'Kenyan Shilling', 'KSh'),
    ('GHS', 'Ghanaian Cedi', 'GH₵'),
    ('ZAR', 'South African Rand', 'R'),
    ('CAD', 'Canadian Dollar', 'CA$'),
    ('INR', 'Indian Rupee', '₹'),
    ('JPY', 'Japanese Yen', '¥')
"#;

/// Returns all migration statements in execution order.
pub fn all_migrations() -> Vec<&'static str> {
    vec![
        CREATE_CREDENTIALS,
        CREATE_BANKS,
        CREATE_CURRENCIES,
        CREATE_ACCOUNTS,
        CREATE_CATEGORIES,
        CREATE_TRANSACTIONS,
        CREATE_TRANSACTION_INDEXES,
        CREATE_EXCHANGE_RATES,
        CREATE_NOTIFICATIONS,
        CREATE_NOTIFICATION_INDEXES,
        SEED_UNCATEGORIZED,
        SEED_CURRENCIES,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_migrations_returns_statements() {
        let migrations = all_migrations();
        assert!(migrations.len() >= 10);
        assert!(migrations[0].contains("credentials"));
        assert!(migrations.iter().all(|m| !m.trim().is_empty()));
    }

    #[test]
    fn tables_are_created_if_not_exists() {
        for migration in all_migrations() {
            if migration.contains("CREATE TABLE") {
                assert!(migration.contains("IF NOT EXISTS"), "{}", migration);
            }
        }
    }
}
