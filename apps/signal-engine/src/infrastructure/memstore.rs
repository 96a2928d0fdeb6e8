//! In-Memory Repositories
//!
//! A single shared store backing all three repository ports with
//! `parking_lot` locked maps. Used by the default binary wiring and by
//! integration tests; a database-backed implementation can replace it
//! behind the same traits without touching the services.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{
    PriceRepository, StoreError, SubscriptionRepository, WatchRepository,
};
use crate::domain::market::{OrderSide, PricePoint, Subscription, SymbolId, UserId, WatchState};

type SubscriptionKey = (UserId, SymbolId, OrderSide);

/// In-memory implementation of every persistence port.
#[derive(Default)]
pub struct MemoryStore {
    watches: RwLock<HashMap<SymbolId, WatchState>>,
    subscriptions: RwLock<HashMap<SubscriptionKey, Subscription>>,
    /// Per symbol, keyed by timestamp so history reads come out ascending
    /// and duplicate timestamps collapse.
    prices: RwLock<HashMap<SymbolId, BTreeMap<i64, PricePoint>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored price points across all symbols.
    #[must_use]
    pub fn price_count(&self) -> usize {
        self.prices.read().values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl WatchRepository for MemoryStore {
    async fn find(&self, symbol: &str) -> Result<Option<WatchState>, StoreError> {
        Ok(self.watches.read().get(symbol).cloned())
    }

    async fn find_watching(&self) -> Result<Vec<WatchState>, StoreError> {
        Ok(self
            .watches
            .read()
            .values()
            .filter(|state| state.watching)
            .cloned()
            .collect())
    }

    async fn insert(&self, state: &WatchState) -> Result<(), StoreError> {
        self.watches
            .write()
            .insert(state.symbol.clone(), state.clone());
        Ok(())
    }

    async fn update(&self, state: &WatchState) -> Result<(), StoreError> {
        self.watches
            .write()
            .insert(state.symbol.clone(), state.clone());
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn upsert(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let key = (
            subscription.user_id,
            subscription.symbol.clone(),
            subscription.side,
        );
        self.subscriptions.write().insert(key, subscription.clone());
        Ok(())
    }

    async fn delete(&self, user: UserId, symbol: &str, side: OrderSide) -> Result<(), StoreError> {
        self.subscriptions
            .write()
            .remove(&(user, symbol.to_string(), side));
        Ok(())
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Subscription>, StoreError> {
        Ok(self
            .subscriptions
            .read()
            .values()
            .filter(|sub| sub.user_id == user)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.subscriptions.read().values().cloned().collect())
    }
}

#[async_trait]
impl PriceRepository for MemoryStore {
    async fn insert(&self, point: &PricePoint) -> Result<(), StoreError> {
        self.prices
            .write()
            .entry(point.symbol.clone())
            .or_default()
            .entry(point.timestamp)
            .or_insert_with(|| point.clone());
        Ok(())
    }

    async fn history(&self, symbol: &str) -> Result<Vec<PricePoint>, StoreError> {
        Ok(self
            .prices
            .read()
            .get(symbol)
            .map(|by_ts| by_ts.values().cloned().collect())
            .unwrap_or_default())
    }
}
