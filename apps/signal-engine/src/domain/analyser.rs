//! Per-Symbol Analyser
//!
//! One analyser exists per actively-subscribed symbol. It owns the
//! accumulated price history and the set of trigger subscriptions for
//! that symbol, and it is kept alive by a reference count equal to the
//! number of live triggers. The broker owns analysers exclusively; all
//! methods here are synchronous and called under the broker's locking
//! discipline.

use std::collections::HashMap;

use chrono::Utc;

use super::market::{PricePoint, SignalCallback, SignalEvent, SymbolId};
use super::rule::{RuleError, RuleSpec};
use super::trigger::{EventTrigger, TriggerKey};

/// Per-symbol holder of price history and active trigger subscriptions.
pub struct Analyser {
    symbol: SymbolId,
    /// Price history, ascending by timestamp.
    history: Vec<PricePoint>,
    triggers: HashMap<TriggerKey, EventTrigger>,
    /// Whether each trigger was satisfied in the previous scheduled pass.
    last_pass: HashMap<TriggerKey, bool>,
    ref_count: usize,
}

impl Analyser {
    /// Create an empty analyser for `symbol` with reference count zero.
    #[must_use]
    pub fn new(symbol: impl Into<SymbolId>) -> Self {
        Self {
            symbol: symbol.into(),
            history: Vec::new(),
            triggers: HashMap::new(),
            last_pass: HashMap::new(),
            ref_count: 0,
        }
    }

    /// Symbol this analyser evaluates.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    // =========================================================================
    // Reference Counting
    // =========================================================================

    /// Increment the reference count; returns the new count.
    pub fn retain(&mut self) -> usize {
        self.ref_count += 1;
        self.ref_count
    }

    /// Decrement the reference count; returns the remaining count.
    ///
    /// A release without a matching retain is a concurrency-discipline
    /// bug: it is reported and the count saturates at zero.
    pub fn release(&mut self) -> usize {
        if self.ref_count == 0 {
            tracing::error!(symbol = %self.symbol, "release without matching retain");
            return 0;
        }
        self.ref_count -= 1;
        self.ref_count
    }

    /// Current reference count.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.ref_count
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Insert a trigger for `key`, replacing any existing one.
    ///
    /// Fails without mutating state when the rule parameters are invalid.
    pub fn add_or_replace_trigger(
        &mut self,
        key: TriggerKey,
        spec: &RuleSpec,
        callback: SignalCallback,
    ) -> Result<(), RuleError> {
        let trigger = EventTrigger::from_spec(key.side, spec, callback)?;
        self.triggers.insert(key, trigger);
        self.last_pass.remove(&key);
        Ok(())
    }

    /// Remove the trigger for `key`; no-op if absent.
    pub fn remove_trigger(&mut self, key: &TriggerKey) {
        self.triggers.remove(key);
        self.last_pass.remove(key);
    }

    /// Whether a trigger exists for `key`.
    #[must_use]
    pub fn has_trigger(&self, key: &TriggerKey) -> bool {
        self.triggers.contains_key(key)
    }

    /// Number of active triggers.
    #[must_use]
    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Number of accumulated price points.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Append a live price point and evaluate every trigger at the newest
    /// index only.
    ///
    /// Satisfied triggers fire with `repeat = false`: this is the first
    /// check of this index. The remembered scheduled-pass flag is not
    /// touched here.
    pub fn append_live(&mut self, point: PricePoint) {
        let price = point.close;
        self.history.push(point);
        let index = self.history.len() - 1;

        for (key, trigger) in &self.triggers {
            if trigger.is_satisfied(index, &self.history) {
                trigger.fire(SignalEvent {
                    time: Utc::now(),
                    price,
                    symbol: self.symbol.clone(),
                    side: trigger.side(),
                    user_id: key.user_id,
                    repeat: false,
                });
            }
        }
    }

    /// Insert a backfilled price point without evaluating triggers.
    ///
    /// Backfill emits newest-first, so the point is placed at its sorted
    /// position; a point with an already-known timestamp is dropped.
    pub fn append_historical(&mut self, point: PricePoint) {
        let pos = self
            .history
            .partition_point(|p| p.timestamp < point.timestamp);
        if self
            .history
            .get(pos)
            .is_some_and(|p| p.timestamp == point.timestamp)
        {
            return;
        }
        self.history.insert(pos, point);
    }

    /// Evaluate every trigger against the full history at the latest
    /// index.
    ///
    /// Satisfied triggers fire with `repeat = true` when they were already
    /// satisfied in the previous scheduled pass; the new result is
    /// remembered either way.
    pub fn reevaluate_all(&mut self) {
        let Some(latest) = self.history.last() else {
            return;
        };
        let price = latest.close;
        let index = self.history.len() - 1;

        for (key, trigger) in &self.triggers {
            let satisfied = trigger.is_satisfied(index, &self.history);
            if satisfied {
                let repeat = self.last_pass.get(key).copied().unwrap_or(false);
                trigger.fire(SignalEvent {
                    time: Utc::now(),
                    price,
                    symbol: self.symbol.clone(),
                    side: trigger.side(),
                    user_id: key.user_id,
                    repeat,
                });
            }
            self.last_pass.insert(*key, satisfied);
        }
    }
}

impl std::fmt::Debug for Analyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyser")
            .field("symbol", &self.symbol)
            .field("ref_count", &self.ref_count)
            .field("triggers", &self.triggers.len())
            .field("history", &self.history.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
