//! Market Data Types
//!
//! Core domain types for tracked securities, price points, per-symbol
//! watch state, and user subscriptions. These types are the canonical
//! internal representation shared by the watcher and the broker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::rule::RuleSpec;

// =============================================================================
// Identifiers
// =============================================================================

/// Stable string identifier of a security (e.g. "005930").
pub type SymbolId = String;

/// Identifier of a subscribing user.
pub type UserId = i64;

// =============================================================================
// Securities
// =============================================================================

/// Market a security is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketKind {
    /// KOSPI main board.
    Kospi,
    /// KOSDAQ growth board.
    Kosdaq,
}

/// A tracked security. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockInfo {
    /// Stable symbol identifier.
    pub symbol: SymbolId,
    /// Display name.
    pub name: String,
    /// Market the security is listed on.
    pub market: MarketKind,
}

impl StockInfo {
    /// Create a new security descriptor.
    #[must_use]
    pub fn new(symbol: impl Into<SymbolId>, name: impl Into<String>, market: MarketKind) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            market,
        }
    }
}

// =============================================================================
// Price Points
// =============================================================================

/// A single observed price candle for one symbol.
///
/// Timestamps are Unix seconds and are monotonic per symbol within the
/// live stream. Immutable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Symbol this price belongs to.
    pub symbol: SymbolId,
    /// Observation time, Unix seconds.
    pub timestamp: i64,
    /// Opening price.
    pub open: Decimal,
    /// Highest price.
    pub high: Decimal,
    /// Lowest price.
    pub low: Decimal,
    /// Closing (or latest) price.
    pub close: Decimal,
    /// Traded volume, when the source reports it.
    pub volume: Option<Decimal>,
}

// =============================================================================
// Watch State
// =============================================================================

/// Durable per-symbol ingestion state.
///
/// The high-water mark is the last price timestamp durably recorded for
/// the symbol; it never decreases and is the resume point for backfill.
/// Only symbols with a positive mark are live-polled by the bulk start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchState {
    /// Symbol this state belongs to.
    pub symbol: SymbolId,
    /// Whether the symbol is currently of interest.
    pub watching: bool,
    /// Last price timestamp durably recorded, Unix seconds.
    pub high_water_mark: i64,
}

impl WatchState {
    /// Fresh state for a symbol never watched before.
    #[must_use]
    pub fn new(symbol: impl Into<SymbolId>) -> Self {
        Self {
            symbol: symbol.into(),
            watching: true,
            high_water_mark: 0,
        }
    }
}

// =============================================================================
// Order Side
// =============================================================================

/// Side of a trading-signal subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Entry signal.
    Buy,
    /// Exit signal.
    Sell,
}

impl OrderSide {
    /// Human-readable side name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// A user's trading-signal subscription for one (symbol, side) pair.
///
/// Unique per (user, symbol, side); persisted for durability across
/// restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscribing user.
    pub user_id: UserId,
    /// Symbol the rule is evaluated against.
    pub symbol: SymbolId,
    /// Buy or sell signal.
    pub side: OrderSide,
    /// Validated trigger parameters.
    pub rule: RuleSpec,
}

// =============================================================================
// Signal Events
// =============================================================================

/// Data handed to a notification callback when a trigger fires.
///
/// Carries only primitive identifying data; consumers decide the delivery
/// mechanism.
#[derive(Debug, Clone)]
pub struct SignalEvent {
    /// Wall-clock time of the evaluation.
    pub time: DateTime<Utc>,
    /// Closing price that satisfied the rule.
    pub price: Decimal,
    /// Symbol the signal belongs to.
    pub symbol: SymbolId,
    /// Side of the satisfied subscription.
    pub side: OrderSide,
    /// Subscribing user.
    pub user_id: UserId,
    /// True when the same trigger was already satisfied in the previous
    /// scheduled evaluation pass.
    pub repeat: bool,
}

/// Notification callback invoked when a trigger fires.
///
/// Fire-and-forget: it must not block and must not panic.
pub type SignalCallback = Arc<dyn Fn(SignalEvent) + Send + Sync>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn point(ts: i64, close: Decimal) -> PricePoint {
        PricePoint {
            symbol: "005930".to_string(),
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: None,
        }
    }

    #[test]
    fn fresh_watch_state_has_zero_mark() {
        let state = WatchState::new("005930");
        assert!(state.watching);
        assert_eq!(state.high_water_mark, 0);
    }

    #[test]
    fn order_side_names() {
        assert_eq!(OrderSide::Buy.as_str(), "buy");
        assert_eq!(OrderSide::Sell.as_str(), "sell");
    }

    #[test]
    fn subscription_round_trips_through_json() {
        let sub = Subscription {
            user_id: 7,
            symbol: "003490".to_string(),
            side: OrderSide::Sell,
            rule: RuleSpec::CloseAbove { level: dec!(45000) },
        };

        let json = serde_json::to_string(&sub).unwrap();
        let back: Subscription = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sub);
    }

    #[test]
    fn price_point_round_trips_through_json() {
        let p = point(1_700_000_000, dec!(71500));
        let json = serde_json::to_string(&p).unwrap();
        let back: PricePoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
