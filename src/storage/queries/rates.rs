//! Cached exchange-rate persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{ExchangeRate, RateId};
use crate::storage::database::{Database, Result};

use super::parse_utc;

const RATE_COLUMNS: &str = "id, pair, rate, fetched_at, was_updated";

/// Retrieves the cached rate for a pair.
pub async fn get_by_pair(db: &Database, pair: String) -> Result<Option<ExchangeRate>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM exchange_rates WHERE pair = ?1",
            RATE_COLUMNS
        ))?;
        Ok(stmt.query_row([&pair], row_to_rate).optional()?)
    })
    .await
}

/// Lists all cached rates.
pub async fn list_all(db: &Database) -> Result<Vec<ExchangeRate>> {
    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM exchange_rates ORDER BY pair ASC",
            RATE_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_rate)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Stores a freshly fetched rate, replacing any previous value for the
/// pair and setting the fresh flag.
pub async fn upsert(
    db: &Database,
    pair: String,
    rate: f64,
    fetched_at: DateTime<Utc>,
) -> Result<ExchangeRate> {
    db.with_conn(move |conn| {
        conn.execute(
            r#"
            INSERT INTO exchange_rates (pair, rate, fetched_at, was_updated)
            VALUES (?1, ?2, ?3, 1)
            ON CONFLICT(pair) DO UPDATE SET
                rate = excluded.rate,
                fetched_at = excluded.fetched_at,
                was_updated = 1
            "#,
            params![pair, rate, fetched_at.to_rfc3339()],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM exchange_rates WHERE pair = ?1",
            RATE_COLUMNS
        ))?;
        Ok(stmt.query_row([&pair], row_to_rate)?)
    })
    .await
}

/// Clears the fresh flag after a failed scheduled refresh, so reads know
/// the cached value is stale.
pub async fn mark_stale(db: &Database, pair: String) -> Result<()> {
    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE exchange_rates SET was_updated = 0 WHERE pair = ?1",
            [&pair],
        )?;
        Ok(())
    })
    .await
}

fn row_to_rate(row: &Row<'_>) -> std::result::Result<ExchangeRate, rusqlite::Error> {
    let fetched_at: String = row.get(3)?;
    Ok(ExchangeRate {
        id: RateId(row.get(0)?),
        pair: row.get(1)?,
        rate: row.get(2)?,
        fetched_at: parse_utc(3, fetched_at)?,
        was_updated: row.get::<_, i64>(4)? != 0,
    })
}
