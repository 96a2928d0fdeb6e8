//! Signal Engine Binary
//!
//! Tracks the configured securities, backfills their price history,
//! restores persisted subscriptions, and streams live prices through the
//! per-symbol analysers until shutdown.
//!
//! # Usage
//!
//! ```bash
//! SIGNAL_SYMBOLS="005930:Samsung Electronics:kospi" cargo run --bin signal-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `SIGNAL_SYMBOLS`: Comma-separated `symbol:name:market` entries
//!
//! ## Optional
//! - `SIGNAL_POLL_INTERVAL_SECS`: Live polling interval (default: 5)
//! - `SIGNAL_PAGE_DELAY_MS`: Backfill page pacing (default: 500)
//! - `SIGNAL_SYMBOL_STAGGER_MS`: Per-symbol backfill stagger (default: 200)
//! - `SIGNAL_LOOKBACK_DAYS`: Maximum backfill depth (default: 365)
//! - `SIGNAL_EVALUATION_INTERVAL_SECS`: Scheduled evaluation pass (default: 60)
//! - `RUST_LOG`: Log filter (default: warn,signal_engine=info)

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use signal_engine::infrastructure::telemetry;
use signal_engine::{
    AnalyserBroker, EngineConfig, MemoryStore, PriceRepository, PriceWatcher, SignalCallback,
    SignalEvent, SimulatedSource, SubscriptionRepository, SymbolId, WatchRepository,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    telemetry::init();

    tracing::info!("Starting signal engine");

    let config = EngineConfig::from_env().context("configuration")?;
    log_config(&config);

    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(SimulatedSource::new());

    let watcher = Arc::new(PriceWatcher::new(
        source,
        Arc::clone(&store) as Arc<dyn WatchRepository>,
        config.watcher.clone(),
    ));
    let broker = Arc::new(AnalyserBroker::new(
        Arc::clone(&store) as Arc<dyn SubscriptionRepository>
    ));

    for stock in &config.symbols {
        watcher.register(stock).await?;
    }

    backfill_history(&watcher, &store, &broker).await?;

    let routes = restore_subscriptions(&store, &broker).await;

    // Live stream fans in every tracked symbol; the router persists each
    // point and forwards it to the symbol's analyser feed.
    let live_rx = watcher.start_watching_all(config.watcher.poll_interval);
    let router_store = Arc::clone(&store);
    tokio::spawn(route_live_prices(live_rx, router_store, routes));

    // Scheduled pass covering triggers no live tick has re-checked.
    let shutdown_token = CancellationToken::new();
    let eval_broker = Arc::clone(&broker);
    let eval_token = shutdown_token.clone();
    let eval_interval = config.evaluation_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(eval_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = eval_token.cancelled() => break,
                _ = ticker.tick() => eval_broker.evaluate_all(),
            }
        }
    });

    tracing::info!("Signal engine ready");

    await_shutdown(shutdown_token).await;
    watcher.stop_watching_all();

    tracing::info!("Signal engine stopped");
    Ok(())
}

/// Drain the backfill stream into the price store and the analysers.
async fn backfill_history(
    watcher: &Arc<PriceWatcher>,
    store: &Arc<MemoryStore>,
    broker: &Arc<AnalyserBroker>,
) -> anyhow::Result<()> {
    let mut history_rx = watcher.collect_history().await.context("history backfill")?;
    let mut collected = 0_u64;
    while let Some(point) = history_rx.recv().await {
        if let Err(error) = PriceRepository::insert(store.as_ref(), &point).await {
            tracing::error!(%error, symbol = %point.symbol, "failed to persist backfill point");
        }
        broker.update_past_price(point);
        collected += 1;
    }
    tracing::info!(points = collected, "history backfill complete");
    Ok(())
}

/// Re-create analysers for persisted subscriptions and return the live
/// feed senders, one per symbol with at least one subscription.
async fn restore_subscriptions(
    store: &Arc<MemoryStore>,
    broker: &Arc<AnalyserBroker>,
) -> HashMap<SymbolId, mpsc::UnboundedSender<signal_engine::PricePoint>> {
    let persisted = match SubscriptionRepository::list_all(store.as_ref()).await {
        Ok(subscriptions) => subscriptions,
        Err(error) => {
            tracing::error!(%error, "failed to load persisted subscriptions");
            return HashMap::new();
        }
    };

    let mut routes = HashMap::new();
    for subscription in persisted {
        let symbol = subscription.symbol.clone();
        let feed = if routes.contains_key(&symbol) {
            None
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            routes.insert(symbol.clone(), tx);
            Some(rx)
        };

        if let Err(error) = broker
            .subscribe(subscription, feed, logging_callback())
            .await
        {
            tracing::error!(%error, %symbol, "failed to restore subscription");
            // Drop the route if the symbol ended up without an analyser.
            if !broker.is_active(&symbol) {
                routes.remove(&symbol);
            }
        }
    }
    routes
}

/// Forward live points to the price store and the per-symbol feeds.
async fn route_live_prices(
    mut live_rx: mpsc::UnboundedReceiver<signal_engine::PricePoint>,
    store: Arc<MemoryStore>,
    routes: HashMap<SymbolId, mpsc::UnboundedSender<signal_engine::PricePoint>>,
) {
    while let Some(point) = live_rx.recv().await {
        if let Err(error) = PriceRepository::insert(store.as_ref(), &point).await {
            tracing::error!(%error, symbol = %point.symbol, "failed to persist live point");
        }
        if let Some(tx) = routes.get(&point.symbol) {
            let _ = tx.send(point);
        }
    }
}

/// Callback that reports fired signals on the log.
fn logging_callback() -> SignalCallback {
    Arc::new(|event: SignalEvent| {
        tracing::info!(
            symbol = %event.symbol,
            side = event.side.as_str(),
            price = %event.price,
            user = event.user_id,
            repeat = event.repeat,
            "signal fired"
        );
    })
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        symbols = config.symbols.len(),
        poll_interval_secs = config.watcher.poll_interval.as_secs(),
        lookback_days = config.watcher.lookback.as_secs() / 86_400,
        evaluation_interval_secs = config.evaluation_interval.as_secs(),
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
