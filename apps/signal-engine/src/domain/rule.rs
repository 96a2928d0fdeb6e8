//! Trading-Rule Predicates
//!
//! A rule is an opaque boolean predicate over (evaluation index, full
//! price history). Rule kinds are declared as a tagged `RuleSpec` variant
//! carrying validated parameters; `RuleSpec::build` turns a spec into the
//! boxed predicate used by a trigger. Specs serialize with serde so
//! subscriptions can be persisted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::market::PricePoint;

// =============================================================================
// Predicate Capability
// =============================================================================

/// Boolean predicate over the accumulated history of one symbol.
pub trait TradeRule: Send + Sync {
    /// Whether the rule holds at `index` into `history`.
    ///
    /// `history` is ordered ascending by timestamp; `index` is the bar
    /// under evaluation. Implementations recompute from history and keep
    /// no state of their own.
    fn is_satisfied(&self, index: usize, history: &[PricePoint]) -> bool;
}

// =============================================================================
// Rule Specs
// =============================================================================

/// Direction of a moving-average crossover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossDirection {
    /// Short average crosses above the long average (golden cross).
    Golden,
    /// Short average crosses below the long average (dead cross).
    Dead,
}

/// Validated trigger parameters for a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSpec {
    /// Fires while the closing price is strictly above `level`.
    CloseAbove {
        /// Price threshold; must be positive.
        level: Decimal,
    },
    /// Fires while the closing price is strictly below `level`.
    CloseBelow {
        /// Price threshold; must be positive.
        level: Decimal,
    },
    /// Fires on the bar where the `short`-period simple moving average
    /// crosses the `long`-period one in the given direction.
    MaCross {
        /// Short window length in bars; must satisfy `0 < short < long`.
        short: usize,
        /// Long window length in bars.
        long: usize,
        /// Crossover direction.
        direction: CrossDirection,
    },
}

impl RuleSpec {
    /// Validate the parameters and build the predicate.
    pub fn build(&self) -> Result<Box<dyn TradeRule>, RuleError> {
        match *self {
            Self::CloseAbove { level } => {
                validate_level(level)?;
                Ok(Box::new(CloseAboveRule { level }))
            }
            Self::CloseBelow { level } => {
                validate_level(level)?;
                Ok(Box::new(CloseBelowRule { level }))
            }
            Self::MaCross {
                short,
                long,
                direction,
            } => {
                if short == 0 || short >= long {
                    return Err(RuleError::InvalidWindows { short, long });
                }
                Ok(Box::new(MaCrossRule {
                    short,
                    long,
                    direction,
                }))
            }
        }
    }
}

fn validate_level(level: Decimal) -> Result<(), RuleError> {
    if level <= Decimal::ZERO {
        return Err(RuleError::InvalidLevel(level));
    }
    Ok(())
}

/// Rule parameter validation error.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Threshold level is zero or negative.
    #[error("price level must be positive, got {0}")]
    InvalidLevel(Decimal),
    /// Moving-average windows are not `0 < short < long`.
    #[error("moving-average windows must satisfy 0 < short < long, got short={short} long={long}")]
    InvalidWindows {
        /// Short window length.
        short: usize,
        /// Long window length.
        long: usize,
    },
}

// =============================================================================
// Rule Implementations
// =============================================================================

struct CloseAboveRule {
    level: Decimal,
}

impl TradeRule for CloseAboveRule {
    fn is_satisfied(&self, index: usize, history: &[PricePoint]) -> bool {
        history.get(index).is_some_and(|p| p.close > self.level)
    }
}

struct CloseBelowRule {
    level: Decimal,
}

impl TradeRule for CloseBelowRule {
    fn is_satisfied(&self, index: usize, history: &[PricePoint]) -> bool {
        history.get(index).is_some_and(|p| p.close < self.level)
    }
}

struct MaCrossRule {
    short: usize,
    long: usize,
    direction: CrossDirection,
}

impl TradeRule for MaCrossRule {
    fn is_satisfied(&self, index: usize, history: &[PricePoint]) -> bool {
        // A cross needs the long window both at `index` and one bar back.
        if index >= history.len() || index + 1 <= self.long {
            return false;
        }

        let (Some(short_now), Some(long_now)) = (
            sma(history, index, self.short),
            sma(history, index, self.long),
        ) else {
            return false;
        };
        let (Some(short_prev), Some(long_prev)) = (
            sma(history, index - 1, self.short),
            sma(history, index - 1, self.long),
        ) else {
            return false;
        };

        match self.direction {
            CrossDirection::Golden => short_prev <= long_prev && short_now > long_now,
            CrossDirection::Dead => short_prev >= long_prev && short_now < long_now,
        }
    }
}

/// Simple moving average of closing prices over `window` bars ending at
/// `end` (inclusive). `None` when there is not enough history.
fn sma(history: &[PricePoint], end: usize, window: usize) -> Option<Decimal> {
    if window == 0 || end + 1 < window || end >= history.len() {
        return None;
    }
    let start = end + 1 - window;
    let sum: Decimal = history[start..=end].iter().map(|p| p.close).sum();
    Some(sum / Decimal::from(window))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    fn series(closes: &[i64]) -> Vec<PricePoint> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let close = Decimal::from(*c);
                PricePoint {
                    symbol: "005930".to_string(),
                    timestamp: 1_700_000_000 + i as i64 * 60,
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: None,
                }
            })
            .collect()
    }

    #[test_case(dec!(100), 101, true; "above fires")]
    #[test_case(dec!(100), 100, false; "equal does not fire")]
    #[test_case(dec!(100), 99, false; "below does not fire")]
    fn close_above_threshold(level: Decimal, close: i64, expected: bool) {
        let rule = RuleSpec::CloseAbove { level }.build().unwrap();
        let history = series(&[close]);
        assert_eq!(rule.is_satisfied(0, &history), expected);
    }

    #[test]
    fn close_below_threshold() {
        let rule = RuleSpec::CloseBelow { level: dec!(100) }.build().unwrap();
        let history = series(&[99, 101]);
        assert!(rule.is_satisfied(0, &history));
        assert!(!rule.is_satisfied(1, &history));
    }

    #[test]
    fn out_of_range_index_is_never_satisfied() {
        let rule = RuleSpec::CloseAbove { level: dec!(1) }.build().unwrap();
        let history = series(&[100]);
        assert!(!rule.is_satisfied(5, &history));
    }

    #[test]
    fn golden_cross_fires_on_crossing_bar_only() {
        // Short MA (2) starts below long MA (3) and crosses above at the
        // last bar.
        let history = series(&[100, 90, 80, 70, 100, 140]);
        let rule = RuleSpec::MaCross {
            short: 2,
            long: 3,
            direction: CrossDirection::Golden,
        }
        .build()
        .unwrap();

        // short(4) = 85, long(4) = 83.33 -> already above at index 4
        // short(3) = 75, long(3) = 80    -> below at index 3
        assert!(rule.is_satisfied(4, &history));
        assert!(!rule.is_satisfied(3, &history));
        assert!(!rule.is_satisfied(5, &history)); // still above, no fresh cross
    }

    #[test]
    fn dead_cross_fires_when_short_drops_below_long() {
        let history = series(&[100, 110, 120, 130, 60, 50]);
        let rule = RuleSpec::MaCross {
            short: 2,
            long: 3,
            direction: CrossDirection::Dead,
        }
        .build()
        .unwrap();

        // short(4) = 95, long(4) = 103.33 -> crossed below at index 4
        assert!(rule.is_satisfied(4, &history));
        assert!(!rule.is_satisfied(3, &history));
    }

    #[test]
    fn ma_cross_needs_enough_history() {
        let history = series(&[100, 110, 120]);
        let rule = RuleSpec::MaCross {
            short: 2,
            long: 3,
            direction: CrossDirection::Golden,
        }
        .build()
        .unwrap();

        assert!(!rule.is_satisfied(2, &history)); // no previous long window
    }

    #[test]
    fn invalid_level_is_rejected() {
        assert!(matches!(
            RuleSpec::CloseAbove { level: dec!(0) }.build(),
            Err(RuleError::InvalidLevel(_))
        ));
        assert!(matches!(
            RuleSpec::CloseBelow { level: dec!(-5) }.build(),
            Err(RuleError::InvalidLevel(_))
        ));
    }

    #[test_case(0, 5; "zero short")]
    #[test_case(5, 5; "equal windows")]
    #[test_case(10, 5; "short above long")]
    fn invalid_windows_are_rejected(short: usize, long: usize) {
        let spec = RuleSpec::MaCross {
            short,
            long,
            direction: CrossDirection::Golden,
        };
        assert!(matches!(
            spec.build(),
            Err(RuleError::InvalidWindows { .. })
        ));
    }

    #[test]
    fn rule_spec_round_trips_through_json() {
        let spec = RuleSpec::MaCross {
            short: 5,
            long: 20,
            direction: CrossDirection::Dead,
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: RuleSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
