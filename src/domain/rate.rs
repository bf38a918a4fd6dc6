//! Cached exchange rates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::RateId;

/// One cached currency-pair rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub id: RateId,
    /// Six-letter pair, e.g. `USDEUR`.
    pub pair: String,
    /// Units of the quote currency per unit of the base currency.
    pub rate: f64,
    /// When this value was fetched from the upstream provider.
    pub fetched_at: DateTime<Utc>,
    /// Cleared when a scheduled refresh fails, so reads know the value may
    /// be stale.
    pub was_updated: bool,
}

impl ExchangeRate {
    /// Base currency code of the pair.
    pub fn base(&self) -> &str {
        &self.pair[..3]
    }

    /// Quote currency code of the pair.
    pub fn quote(&self) -> &str {
        &self.pair[3..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_splits_into_base_and_quote() {
        let rate = ExchangeRate {
            id: RateId(1),
            pair: "USDEUR".to_string(),
            rate: 0.91,
            fetched_at: Utc::now(),
            was_updated: true,
        };
        assert_eq!(rate.base(), "USD");
        assert_eq!(rate.quote(), "EUR");
    }
}
