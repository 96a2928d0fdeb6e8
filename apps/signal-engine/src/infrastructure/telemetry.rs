//! Structured Logging Setup
//!
//! Installs the global `tracing` subscriber with an environment-driven
//! filter. `RUST_LOG` controls verbosity (default `info` for the engine,
//! `warn` elsewhere).
//!
//! # Usage
//!
//! ```ignore
//! use signal_engine::infrastructure::telemetry;
//!
//! telemetry::init();
//! tracing::info!("starting");
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "warn,signal_engine=info";

/// Install the global subscriber. Call once at startup; later calls are
/// ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false),
        )
        .try_init();
}
