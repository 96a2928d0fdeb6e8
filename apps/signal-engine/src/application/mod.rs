//! Application Layer - Ports and orchestrating services.
//!
//! Port traits define the contracts external collaborators must satisfy;
//! the watcher and broker services drive the domain over those ports.

/// Port interfaces for the price source and persistence.
pub mod ports;

/// Live price polling and paginated history backfill.
pub mod watcher;

/// Reference-counted analyser lifecycle and stream routing.
pub mod broker;
