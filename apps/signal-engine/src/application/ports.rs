//! Port Interfaces
//!
//! Contracts for the external collaborators the engine consumes:
//!
//! - `PriceSource`: point-in-time and paginated historical price fetches
//! - `WatchRepository` / `SubscriptionRepository` / `PriceRepository`:
//!   typed persistence for the records the core reads and writes
//!
//! Retry and backoff are not implemented here; the watcher spaces its
//! calls (inter-poll delay, staggered starts) and treats failures as
//! transient. Source fetches should carry their own timeouts.

use async_trait::async_trait;

use crate::domain::market::{OrderSide, PricePoint, Subscription, UserId, WatchState};

// =============================================================================
// Errors
// =============================================================================

/// Failure of a price-source fetch. Always treated as transient.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The fetch itself failed (network, upstream, decode).
    #[error("price fetch failed: {0}")]
    Fetch(String),
    /// The source does not know the symbol.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

/// Failure of a persistence operation.
///
/// Never fatal: in-memory state remains authoritative and live behavior
/// continues with degraded durability.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage backend rejected or failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),
}

// =============================================================================
// Price Source
// =============================================================================

/// External market-data adapter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch the latest price for a symbol.
    async fn fetch_latest(&self, symbol: &str) -> Result<PricePoint, SourceError>;

    /// Fetch one page of historical prices, ordered newest-first.
    ///
    /// Pages are 1-based; an empty page means the history is exhausted.
    async fn fetch_history_page(
        &self,
        symbol: &str,
        page: u32,
    ) -> Result<Vec<PricePoint>, SourceError>;
}

// =============================================================================
// Repositories
// =============================================================================

/// Persistence for per-symbol watch state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatchRepository: Send + Sync {
    /// Load the watch state for one symbol, if present.
    async fn find(&self, symbol: &str) -> Result<Option<WatchState>, StoreError>;

    /// Load the state of every symbol currently marked watching.
    async fn find_watching(&self) -> Result<Vec<WatchState>, StoreError>;

    /// Insert a new watch state record.
    async fn insert(&self, state: &WatchState) -> Result<(), StoreError>;

    /// Update an existing watch state record.
    async fn update(&self, state: &WatchState) -> Result<(), StoreError>;
}

/// Persistence for user subscriptions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert or replace the record for (user, symbol, side).
    async fn upsert(&self, subscription: &Subscription) -> Result<(), StoreError>;

    /// Delete the record for (user, symbol, side).
    async fn delete(&self, user: UserId, symbol: &str, side: OrderSide) -> Result<(), StoreError>;

    /// All subscriptions of one user.
    async fn list_for_user(&self, user: UserId) -> Result<Vec<Subscription>, StoreError>;

    /// Every persisted subscription (startup restore).
    async fn list_all(&self) -> Result<Vec<Subscription>, StoreError>;
}

/// Persistence for price points, keyed by (symbol, timestamp).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceRepository: Send + Sync {
    /// Insert a price point; inserting a known (symbol, timestamp) pair
    /// again is a no-op.
    async fn insert(&self, point: &PricePoint) -> Result<(), StoreError>;

    /// Full stored history for a symbol, ascending by timestamp.
    async fn history(&self, symbol: &str) -> Result<Vec<PricePoint>, StoreError>;
}
