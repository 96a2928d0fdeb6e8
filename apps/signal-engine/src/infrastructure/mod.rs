//! Infrastructure Layer - Adapters and wiring.
//!
//! Environment-based configuration, logging setup, and the concrete
//! price-source and persistence adapters the binary wires together.

/// Environment-based engine configuration.
pub mod config;

/// Structured logging setup.
pub mod telemetry;

/// In-memory repository implementations.
pub mod memstore;

/// Simulated random-walk price source.
pub mod sim;
