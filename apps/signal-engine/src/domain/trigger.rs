//! Event Triggers
//!
//! An `EventTrigger` pairs an order side with a rule predicate and a
//! notification callback. It is a value-with-behavior: the trigger holds
//! no mutable state of its own; predicates recompute from history.

use super::market::{OrderSide, SignalCallback, SignalEvent, UserId};
use super::rule::{RuleError, RuleSpec, TradeRule};
use crate::domain::market::PricePoint;

/// Key of a trigger inside one analyser: one trigger per (user, side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    /// Subscribing user.
    pub user_id: UserId,
    /// Buy or sell signal.
    pub side: OrderSide,
}

/// A single trigger subscription: side + predicate + callback.
pub struct EventTrigger {
    side: OrderSide,
    rule: Box<dyn TradeRule>,
    callback: SignalCallback,
}

impl EventTrigger {
    /// Build a trigger from validated rule parameters.
    pub fn from_spec(
        side: OrderSide,
        spec: &RuleSpec,
        callback: SignalCallback,
    ) -> Result<Self, RuleError> {
        Ok(Self {
            side,
            rule: spec.build()?,
            callback,
        })
    }

    /// Side of this trigger.
    #[must_use]
    pub const fn side(&self) -> OrderSide {
        self.side
    }

    /// Whether the rule holds at `index` into `history`.
    #[must_use]
    pub fn is_satisfied(&self, index: usize, history: &[PricePoint]) -> bool {
        self.rule.is_satisfied(index, history)
    }

    /// Invoke the notification callback.
    pub fn fire(&self, event: SignalEvent) {
        (self.callback)(event);
    }
}

impl std::fmt::Debug for EventTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTrigger")
            .field("side", &self.side)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn trigger_fires_callback_with_event_data() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        let trigger = EventTrigger::from_spec(
            OrderSide::Buy,
            &RuleSpec::CloseAbove { level: dec!(100) },
            Arc::new(move |event: SignalEvent| {
                assert_eq!(event.user_id, 42);
                assert!(!event.repeat);
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        trigger.fire(SignalEvent {
            time: Utc::now(),
            price: dec!(101),
            symbol: "005930".to_string(),
            side: OrderSide::Buy,
            user_id: 42,
            repeat: false,
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_spec_fails_construction() {
        let result = EventTrigger::from_spec(
            OrderSide::Sell,
            &RuleSpec::CloseAbove { level: dec!(-1) },
            Arc::new(|_| {}),
        );
        assert!(result.is_err());
    }
}
