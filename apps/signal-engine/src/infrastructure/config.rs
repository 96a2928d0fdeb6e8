//! Engine Configuration
//!
//! Configuration for the signal engine, loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `SIGNAL_SYMBOLS`: Required. Comma-separated tracked securities, each
//!   `symbol:name:market` (market is `kospi` or `kosdaq`, default kospi).
//! - `SIGNAL_POLL_INTERVAL_SECS`: Live polling interval (default 5).
//! - `SIGNAL_PAGE_DELAY_MS`: Delay between backfill page fetches (default 500).
//! - `SIGNAL_SYMBOL_STAGGER_MS`: Stagger between per-symbol backfill starts
//!   (default 200).
//! - `SIGNAL_LOOKBACK_DAYS`: Maximum backfill depth (default 365).
//! - `SIGNAL_EVALUATION_INTERVAL_SECS`: Scheduled full-evaluation interval
//!   (default 60).

use std::time::Duration;

use crate::application::watcher::WatcherSettings;
use crate::domain::market::{MarketKind, StockInfo};

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Securities to track at startup.
    pub symbols: Vec<StockInfo>,
    /// Polling and backfill pacing.
    pub watcher: WatcherSettings,
    /// Interval of the scheduled full-evaluation pass.
    pub evaluation_interval: Duration,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `SIGNAL_SYMBOLS` is missing, empty, or contains
    /// a malformed entry.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_symbols = std::env::var("SIGNAL_SYMBOLS")
            .map_err(|_| ConfigError::MissingEnvVar("SIGNAL_SYMBOLS".to_string()))?;

        if raw_symbols.trim().is_empty() {
            return Err(ConfigError::EmptyValue("SIGNAL_SYMBOLS".to_string()));
        }

        let symbols = raw_symbols
            .split(',')
            .map(parse_symbol_entry)
            .collect::<Result<Vec<_>, _>>()?;

        let defaults = WatcherSettings::default();
        let watcher = WatcherSettings {
            poll_interval: parse_env_duration_secs(
                "SIGNAL_POLL_INTERVAL_SECS",
                defaults.poll_interval,
            ),
            page_delay: parse_env_duration_millis("SIGNAL_PAGE_DELAY_MS", defaults.page_delay),
            symbol_stagger: parse_env_duration_millis(
                "SIGNAL_SYMBOL_STAGGER_MS",
                defaults.symbol_stagger,
            ),
            lookback: parse_env_duration_days("SIGNAL_LOOKBACK_DAYS", defaults.lookback),
        };

        let evaluation_interval =
            parse_env_duration_secs("SIGNAL_EVALUATION_INTERVAL_SECS", Duration::from_secs(60));

        Ok(Self {
            symbols,
            watcher,
            evaluation_interval,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// A symbol entry could not be parsed.
    #[error("malformed symbol entry: {0}")]
    MalformedSymbol(String),
}

/// Parse one `symbol:name:market` entry. Name defaults to the symbol,
/// market to KOSPI.
fn parse_symbol_entry(entry: &str) -> Result<StockInfo, ConfigError> {
    let entry = entry.trim();
    let mut parts = entry.splitn(3, ':');

    let symbol = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MalformedSymbol(entry.to_string()))?;
    let name = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(symbol);
    let market = parts
        .next()
        .map_or(MarketKind::Kospi, parse_market_case_insensitive);

    Ok(StockInfo::new(symbol, name, market))
}

fn parse_market_case_insensitive(s: &str) -> MarketKind {
    match s.trim().to_lowercase().as_str() {
        "kosdaq" => MarketKind::Kosdaq,
        _ => MarketKind::Kospi,
    }
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_env_duration_days(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, |days| Duration::from_secs(days * 86_400))
}
