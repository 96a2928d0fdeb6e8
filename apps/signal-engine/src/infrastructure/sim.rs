//! Simulated Price Source
//!
//! A self-contained `PriceSource` producing a random walk per symbol, for
//! development and demos without a market-data vendor. History pages are
//! derived from a per-symbol seed, so repeated fetches of the same page
//! agree with each other and with neighbouring pages.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::application::ports::{PriceSource, SourceError};
use crate::domain::market::{PricePoint, SymbolId};

/// Daily candles per history page.
const PAGE_SIZE: usize = 20;

/// Total depth of the synthetic history, in days.
const HISTORY_DAYS: usize = 400;

/// Random-walk market data generator.
pub struct SimulatedSource {
    /// Timestamp the synthetic history is anchored to, Unix seconds.
    anchor: i64,
    /// Current live price per symbol.
    live: Mutex<HashMap<SymbolId, i64>>,
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSource {
    /// Create a source anchored at the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor: Utc::now().timestamp(),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Base price for a symbol, derived from its name so distinct symbols
    /// get distinct but stable series.
    fn base_price(symbol: &str) -> i64 {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        10_000 + (hasher.finish() % 90_000) as i64
    }

    /// Deterministic daily candle `days_back` days before the anchor.
    fn candle(&self, symbol: &str, days_back: usize) -> PricePoint {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        days_back.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());

        let close = Self::base_price(symbol) + rng.gen_range(-2_000..=2_000);
        let open = close + rng.gen_range(-300..=300);
        let spread = rng.gen_range(0..=500);

        PricePoint {
            symbol: symbol.to_string(),
            timestamp: self.anchor - 86_400 * days_back as i64,
            open: Decimal::from(open),
            high: Decimal::from(close.max(open) + spread),
            low: Decimal::from(close.min(open) - spread),
            close: Decimal::from(close),
            volume: Some(Decimal::from(rng.gen_range(100_000..=900_000))),
        }
    }
}

#[async_trait]
impl PriceSource for SimulatedSource {
    async fn fetch_latest(&self, symbol: &str) -> Result<PricePoint, SourceError> {
        let close = {
            let mut live = self.live.lock();
            let price = live
                .entry(symbol.to_string())
                .or_insert_with(|| Self::base_price(symbol));
            let step = rand::thread_rng().gen_range(-200..=200);
            *price = (*price + step).max(1);
            *price
        };

        let close = Decimal::from(close);
        Ok(PricePoint {
            symbol: symbol.to_string(),
            timestamp: Utc::now().timestamp(),
            open: close,
            high: close,
            low: close,
            close,
            volume: None,
        })
    }

    async fn fetch_history_page(
        &self,
        symbol: &str,
        page: u32,
    ) -> Result<Vec<PricePoint>, SourceError> {
        if page == 0 {
            return Err(SourceError::Fetch("pages are 1-based".to_string()));
        }

        let first = (page as usize - 1) * PAGE_SIZE + 1;
        let candles: Vec<PricePoint> = (first..first + PAGE_SIZE)
            .take_while(|days_back| *days_back <= HISTORY_DAYS)
            .map(|days_back| self.candle(symbol, days_back))
            .collect();
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_pages_are_newest_first_and_stable() {
        let source = SimulatedSource::new();

        let page = source.fetch_history_page("005930", 1).await.unwrap();
        assert_eq!(page.len(), PAGE_SIZE);
        assert!(page.windows(2).all(|w| w[0].timestamp > w[1].timestamp));

        let again = source.fetch_history_page("005930", 1).await.unwrap();
        assert_eq!(page, again);
    }

    #[tokio::test]
    async fn history_is_exhausted_past_the_lookback() {
        let source = SimulatedSource::new();
        let past_end = (HISTORY_DAYS / PAGE_SIZE + 1) as u32;
        let page = source.fetch_history_page("005930", past_end).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn consecutive_pages_do_not_overlap() {
        let source = SimulatedSource::new();
        let first = source.fetch_history_page("035720", 1).await.unwrap();
        let second = source.fetch_history_page("035720", 2).await.unwrap();
        let oldest_of_first = first.last().unwrap().timestamp;
        assert!(second.iter().all(|p| p.timestamp < oldest_of_first));
    }

    #[tokio::test]
    async fn live_prices_stay_positive() {
        let source = SimulatedSource::new();
        for _ in 0..50 {
            let point = source.fetch_latest("068270").await.unwrap();
            assert!(point.close > Decimal::ZERO);
        }
    }
}
