//! Domain Layer - Pure market and evaluation types.
//!
//! This layer contains the core domain types and the trigger-evaluation
//! logic. Everything here is synchronous and free of I/O; the application
//! layer owns the tasks that drive it.

/// Securities, price points, watch state, and subscription records.
pub mod market;

/// Validated trading-rule predicates.
pub mod rule;

/// Event triggers pairing a side, a rule, and a callback.
pub mod trigger;

/// Per-symbol price history and trigger evaluation.
pub mod analyser;
