//! Exchange-rate cache with scheduled refresh.
//!
//! Reads always serve the cached row when one exists; only a cache miss
//! blocks on the upstream provider. A background scheduler re-fetches
//! every known pair during fixed UTC windows, and marks rows stale when a
//! refresh fails so later reads can try again opportunistically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::RateSettings;
use crate::domain::ExchangeRate;
use crate::providers::fx::RateSource;
use crate::storage::{queries, Database};

use super::error::Result;

/// Base delay for the fetch retry backoff.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Caches currency-pair rates in the database.
pub struct ExchangeRateCache {
    db: Database,
    source: Arc<dyn RateSource>,
    clock: Arc<dyn Clock>,
    settings: RateSettings,
    stopped: AtomicBool,
}

impl ExchangeRateCache {
    pub fn new(
        db: Database,
        source: Arc<dyn RateSource>,
        clock: Arc<dyn Clock>,
        settings: RateSettings,
    ) -> Self {
        Self {
            db,
            source,
            clock,
            settings,
            stopped: AtomicBool::new(false),
        }
    }

    /// Returns the rate for a currency pair.
    ///
    /// A cached row is returned as-is, even when flagged stale; a stale row
    /// triggers an opportunistic re-fetch first, falling back to the cached
    /// value if the provider is unavailable. Only a cache miss propagates
    /// provider failures.
    pub async fn rate(&self, from: &str, to: &str) -> Result<ExchangeRate> {
        let from = from.to_uppercase();
        let to = to.to_uppercase();
        let pair = format!("{}{}", from, to);

        if let Some(cached) = queries::rates::get_by_pair(&self.db, pair.clone()).await? {
            if cached.was_updated {
                return Ok(cached);
            }
            // Flagged stale by a failed scheduled refresh; try again now
            // but never fail a read that has a cached value to serve.
            return match self.refresh_pair(&from, &to).await {
                Ok(fresh) => Ok(fresh),
                Err(e) => {
                    warn!(%pair, error = %e, "re-fetch failed, serving stale rate");
                    Ok(cached)
                }
            };
        }

        let fresh = self.refresh_pair(&from, &to).await?;
        Ok(fresh)
    }

    /// Fetches a pair from the provider and persists it.
    async fn refresh_pair(&self, from: &str, to: &str) -> Result<ExchangeRate> {
        let value = self.fetch_with_retry(from, to).await?;
        let pair = format!("{}{}", from, to);
        let stored =
            queries::rates::upsert(&self.db, pair.clone(), value, self.clock.now()).await?;
        debug!(%pair, rate = value, "rate refreshed");
        Ok(stored)
    }

    /// Calls the provider, retrying transient failures with exponential
    /// backoff.
    async fn fetch_with_retry(&self, from: &str, to: &str) -> Result<f64> {
        let mut attempt: u32 = 0;
        loop {
            match self.source.fetch(from, to).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.settings.fetch_retries => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(%from, %to, attempt, error = %e, "rate fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Refreshes every known pair if `now` falls inside a refresh window.
    ///
    /// Known pairs are the union of rows already cached and the configured
    /// tracked pairs. A pair whose refresh fails keeps its old value and is
    /// flagged stale.
    pub async fn run_scheduled_refresh(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.in_refresh_window(now) {
            return Ok(());
        }

        let mut pairs: Vec<String> = queries::rates::list_all(&self.db)
            .await?
            .into_iter()
            .map(|r| r.pair)
            .collect();
        for tracked in &self.settings.tracked_pairs {
            let tracked = tracked.to_uppercase();
            if !pairs.contains(&tracked) {
                pairs.push(tracked);
            }
        }

        info!(count = pairs.len(), "scheduled rate refresh");
        for pair in pairs {
            if pair.len() != 6 {
                warn!(%pair, "skipping malformed pair");
                continue;
            }
            let (from, to) = pair.split_at(3);
            if let Err(e) = self.refresh_pair(from, to).await {
                error!(%pair, error = %e, "scheduled refresh failed");
                queries::rates::mark_stale(&self.db, pair).await?;
            }
        }
        Ok(())
    }

    /// Whether `now` falls inside a refresh window. Each window opens at a
    /// configured hour and stays open for the configured minutes, half-open:
    /// `[H:00, H:minutes)`.
    fn in_refresh_window(&self, now: DateTime<Utc>) -> bool {
        self.settings.refresh_hours.contains(&now.hour())
            && i64::from(now.minute()) < self.settings.refresh_window_minutes
    }

    /// Runs the refresh scheduler until [`stop`](Self::stop) is called.
    pub async fn run_scheduler(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.settings.tick_interval_seconds));
        info!(
            tick_seconds = self.settings.tick_interval_seconds,
            "rate scheduler started"
        );

        loop {
            ticker.tick().await;
            if self.stopped.load(Ordering::Relaxed) {
                info!("rate scheduler stopped");
                return;
            }
            if let Err(e) = self.run_scheduled_refresh(self.clock.now()).await {
                error!(error = %e, "rate refresh tick failed");
            }
        }
    }

    /// Signals the scheduler loop to exit at its next tick.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    /// Starts a conversion batch that resolves each pair at most once.
    pub fn memo(&self) -> RateMemo<'_> {
        RateMemo {
            cache: self,
            rates: HashMap::new(),
        }
    }
}

/// Converts amounts across currencies, memoizing pair lookups for the
/// lifetime of the batch, e.g. while summarizing a transaction page.
pub struct RateMemo<'a> {
    cache: &'a ExchangeRateCache,
    rates: HashMap<String, f64>,
}

impl RateMemo<'_> {
    /// Converts `amount` from one currency to another.
    pub async fn convert(&mut self, amount: f64, from: &str, to: &str) -> Result<f64> {
        let from = from.to_uppercase();
        let to = to.to_uppercase();
        if from == to {
            return Ok(amount);
        }

        let pair = format!("{}{}", from, to);
        let rate = match self.rates.get(&pair) {
            Some(rate) => *rate,
            None => {
                let rate = self.cache.rate(&from, &to).await?.rate;
                self.rates.insert(pair, rate);
                rate
            }
        };
        Ok(amount * rate)
    }
}
