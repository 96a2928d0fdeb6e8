//! Signal Engine - Market Data Watcher & Trading-Signal Evaluator
//!
//! Ingests streaming and historical market-price data for a set of tracked
//! securities and evaluates, per security, a dynamic set of user-defined
//! trading-signal subscriptions, invoking a callback whenever a
//! subscription's condition becomes true.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and evaluation logic
//!   - `market`: Securities, price points, watch state, subscriptions
//!   - `rule`: Validated trading-rule predicates
//!   - `trigger`: Side + rule + callback bundles
//!   - `analyser`: Per-symbol history and trigger evaluation
//!
//! - **Application**: Ports and orchestrating services
//!   - `ports`: Interfaces for the price source and persistence
//!   - `watcher`: Live polling and paginated history backfill
//!   - `broker`: Reference-counted analyser lifecycle and routing
//!
//! - **Infrastructure**: Adapters and wiring
//!   - `config`: Environment-based configuration
//!   - `telemetry`: Structured logging setup
//!   - `memstore`: In-memory repositories for dev and tests
//!   - `sim`: Simulated random-walk price source
//!
//! # Data Flow
//!
//! ```text
//! PriceSource ──► PriceWatcher ──► AnalyserBroker ──► Analyser ──► SignalCallback
//!                 (poll/backfill)  (route per symbol) (evaluate)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure market and evaluation types.
pub mod domain;

/// Application layer - Ports and orchestrating services.
pub mod application;

/// Infrastructure layer - Adapters and wiring.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::analyser::Analyser;
pub use domain::market::{
    MarketKind, OrderSide, PricePoint, SignalCallback, SignalEvent, StockInfo, Subscription,
    SymbolId, UserId, WatchState,
};
pub use domain::rule::{CrossDirection, RuleError, RuleSpec, TradeRule};
pub use domain::trigger::{EventTrigger, TriggerKey};

// Application services
pub use application::broker::{AnalyserBroker, BrokerError};
pub use application::ports::{
    PriceRepository, PriceSource, SourceError, StoreError, SubscriptionRepository, WatchRepository,
};
pub use application::watcher::{PriceWatcher, WatcherError, WatcherSettings};

// Infrastructure
pub use infrastructure::config::{ConfigError, EngineConfig};
pub use infrastructure::memstore::MemoryStore;
pub use infrastructure::sim::SimulatedSource;
