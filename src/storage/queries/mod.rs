//! Database query modules for CRUD operations.
//!
//! Each module provides async functions that operate on the database.
//! Functions that participate in the upsert transaction take a raw
//! connection instead, so they can run inside `Database::transaction`.

pub mod categories;
pub mod credentials;
pub mod ledger;
pub mod notifications;
pub mod rates;
pub mod transactions;

use chrono::{DateTime, NaiveDate, Utc};

/// Parses an RFC 3339 timestamp column, surfacing corrupt values as a
/// conversion error rather than silently substituting the current time.
pub(crate) fn parse_utc(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Parses a `YYYY-MM-DD` date column.
pub(crate) fn parse_date(idx: usize, raw: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
