//! Analyser Broker
//!
//! Coordinates subscription lifecycle with shared-analyser reuse and
//! bridges ingestion to evaluation. One analyser exists per symbol with
//! at least one live subscription; it is kept alive by a reference count.
//! When the count returns to zero the teardown (cancellation fired, map
//! entry removed) happens as one atomic step under the map lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ports::{StoreError, SubscriptionRepository};
use crate::domain::analyser::Analyser;
use crate::domain::market::{
    OrderSide, PricePoint, SignalCallback, Subscription, SymbolId, UserId,
};
use crate::domain::rule::RuleError;
use crate::domain::trigger::TriggerKey;

// =============================================================================
// Errors
// =============================================================================

/// Broker operation failure.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// No analyser is registered for the symbol.
    #[error("no analyser registered for symbol {0}")]
    UnknownSymbol(SymbolId),
    /// The analyser exists but holds no trigger for (user, symbol, side).
    #[error("no {} subscription for user {user} on symbol {symbol}", side.as_str())]
    UnknownSubscription {
        /// Subscribing user.
        user: UserId,
        /// Symbol of the attempted removal.
        symbol: SymbolId,
        /// Side of the attempted removal.
        side: OrderSide,
    },
    /// The subscription's rule parameters failed validation.
    #[error(transparent)]
    Rule(#[from] RuleError),
    /// Persistence failed. In-memory state is unaffected and remains
    /// authoritative for live evaluation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// Broker
// =============================================================================

struct AnalyserHolder {
    analyser: Arc<Mutex<Analyser>>,
    token: CancellationToken,
}

impl AnalyserHolder {
    fn new(symbol: SymbolId) -> Self {
        Self {
            analyser: Arc::new(Mutex::new(Analyser::new(symbol))),
            token: CancellationToken::new(),
        }
    }
}

/// Owns the per-symbol analyser map and routes price streams into it.
pub struct AnalyserBroker {
    analysers: Mutex<HashMap<SymbolId, AnalyserHolder>>,
    subscriptions: Arc<dyn SubscriptionRepository>,
}

impl AnalyserBroker {
    /// Create a broker persisting subscriptions to the given store.
    #[must_use]
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository>) -> Self {
        Self {
            analysers: Mutex::new(HashMap::new()),
            subscriptions,
        }
    }

    // =========================================================================
    // Subscription Lifecycle
    // =========================================================================

    /// Add a user's trading-signal subscription.
    ///
    /// Creates the symbol's analyser on first subscription and, when a
    /// live feed is supplied, spawns the forwarding task that routes it
    /// into the analyser until teardown. Rule validation failure rolls
    /// the reference count (and a just-created analyser) back. A store
    /// failure after the in-memory insert is returned to the caller but
    /// leaves the subscription live.
    pub async fn subscribe(
        &self,
        subscription: Subscription,
        live_feed: Option<mpsc::UnboundedReceiver<PricePoint>>,
        callback: SignalCallback,
    ) -> Result<(), BrokerError> {
        let symbol = subscription.symbol.clone();
        let key = TriggerKey {
            user_id: subscription.user_id,
            side: subscription.side,
        };

        {
            let mut map = self.analysers.lock();
            let created = !map.contains_key(&symbol);
            let holder = map
                .entry(symbol.clone())
                .or_insert_with(|| AnalyserHolder::new(symbol.clone()));
            if created {
                if let Some(feed) = live_feed {
                    spawn_forwarding(
                        Arc::clone(&holder.analyser),
                        holder.token.clone(),
                        feed,
                    );
                }
            }

            let result = {
                let mut analyser = holder.analyser.lock();
                // Replacing an existing (user, side) trigger keeps the
                // count equal to the number of live triggers.
                let fresh = !analyser.has_trigger(&key);
                if fresh {
                    analyser.retain();
                }
                analyser
                    .add_or_replace_trigger(key, &subscription.rule, callback)
                    .map_err(|error| (error, fresh))
            };

            if let Err((error, fresh)) = result {
                let remaining = {
                    let mut analyser = holder.analyser.lock();
                    if fresh {
                        analyser.release()
                    } else {
                        analyser.count()
                    }
                };
                if remaining == 0 {
                    holder.token.cancel();
                    map.remove(&symbol);
                }
                return Err(BrokerError::Rule(error));
            }
        }

        self.subscriptions.upsert(&subscription).await?;
        tracing::info!(
            user = subscription.user_id,
            %symbol,
            side = subscription.side.as_str(),
            "subscription added"
        );
        Ok(())
    }

    /// Remove a user's subscription for (symbol, side).
    ///
    /// Fails if no analyser exists for the symbol or the analyser holds
    /// no trigger under that key. The release and, at zero, the teardown
    /// happen atomically under the map lock.
    pub async fn unsubscribe(
        &self,
        user: UserId,
        symbol: &str,
        side: OrderSide,
    ) -> Result<(), BrokerError> {
        {
            let mut map = self.analysers.lock();
            let holder = map
                .get(symbol)
                .ok_or_else(|| BrokerError::UnknownSymbol(symbol.to_string()))?;

            let key = TriggerKey { user_id: user, side };
            let remaining = {
                let mut analyser = holder.analyser.lock();
                if !analyser.has_trigger(&key) {
                    return Err(BrokerError::UnknownSubscription {
                        user,
                        symbol: symbol.to_string(),
                        side,
                    });
                }
                analyser.remove_trigger(&key);
                analyser.release()
            };
            if remaining == 0 {
                holder.token.cancel();
                map.remove(symbol);
            }
        }

        self.subscriptions.delete(user, symbol, side).await?;
        tracing::info!(user, symbol, side = side.as_str(), "subscription removed");
        Ok(())
    }

    /// All persisted subscriptions of one user.
    ///
    /// A store failure is logged and yields an empty list (non-fatal).
    pub async fn list_subscriptions(&self, user: UserId) -> Vec<Subscription> {
        match self.subscriptions.list_for_user(user).await {
            Ok(subscriptions) => subscriptions,
            Err(error) => {
                tracing::error!(user, %error, "failed to list subscriptions");
                Vec::new()
            }
        }
    }

    // =========================================================================
    // Price Routing
    // =========================================================================

    /// Attach (or re-attach) a live feed to an existing analyser.
    ///
    /// Used when a symbol's stream is restarted after the analyser was
    /// created. Dropped silently when no analyser exists.
    pub fn feed_prices(&self, symbol: &str, feed: mpsc::UnboundedReceiver<PricePoint>) {
        let map = self.analysers.lock();
        let Some(holder) = map.get(symbol) else {
            tracing::debug!(symbol, "no analyser to feed, dropping stream");
            return;
        };
        spawn_forwarding(Arc::clone(&holder.analyser), holder.token.clone(), feed);
    }

    /// Route a backfilled price point into its analyser's history
    /// without evaluation. No-op for symbols without an analyser.
    pub fn update_past_price(&self, point: PricePoint) {
        let map = self.analysers.lock();
        if let Some(holder) = map.get(&point.symbol) {
            holder.analyser.lock().append_historical(point);
        }
    }

    /// Scheduled full re-evaluation of every live analyser.
    ///
    /// Complements inline evaluation on arrival and covers rules that
    /// depend on time passing rather than a new tick.
    pub fn evaluate_all(&self) {
        let analysers: Vec<Arc<Mutex<Analyser>>> = self
            .analysers
            .lock()
            .values()
            .map(|holder| Arc::clone(&holder.analyser))
            .collect();
        for analyser in analysers {
            analyser.lock().reevaluate_all();
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Whether a live analyser exists for the symbol.
    #[must_use]
    pub fn is_active(&self, symbol: &str) -> bool {
        self.analysers.lock().contains_key(symbol)
    }

    /// Reference count of a symbol's analyser, if it exists.
    #[must_use]
    pub fn reference_count(&self, symbol: &str) -> Option<usize> {
        self.analysers
            .lock()
            .get(symbol)
            .map(|holder| holder.analyser.lock().count())
    }

    /// Number of active triggers on a symbol's analyser, if it exists.
    #[must_use]
    pub fn trigger_count(&self, symbol: &str) -> Option<usize> {
        self.analysers
            .lock()
            .get(symbol)
            .map(|holder| holder.analyser.lock().trigger_count())
    }

    /// Accumulated history length of a symbol's analyser, if it exists.
    #[must_use]
    pub fn history_len(&self, symbol: &str) -> Option<usize> {
        self.analysers
            .lock()
            .get(symbol)
            .map(|holder| holder.analyser.lock().history_len())
    }
}

/// Spawn the forwarding task bridging one live feed into one analyser.
///
/// Exits when the feed closes or the analyser's cancellation fires,
/// whichever comes first; no point is appended after cancellation.
fn spawn_forwarding(
    analyser: Arc<Mutex<Analyser>>,
    token: CancellationToken,
    mut feed: mpsc::UnboundedReceiver<PricePoint>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                point = feed.recv() => match point {
                    Some(point) => analyser.lock().append_live(point),
                    None => break,
                },
            }
        }
    });
}
