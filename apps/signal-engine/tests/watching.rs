//! Live Watching Integration Tests
//!
//! Tests registration lifecycle, per-symbol and bulk polling streams, and
//! cancellation promptness.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::timeout;

use signal_engine::{
    MarketKind, MemoryStore, PricePoint, PriceSource, PriceWatcher, SourceError, StockInfo,
    WatchRepository, WatcherError, WatcherSettings,
};

/// Source that fabricates a fresh latest price on every poll.
struct TickingSource {
    counter: AtomicI64,
}

impl TickingSource {
    fn new() -> Self {
        Self {
            counter: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl PriceSource for TickingSource {
    async fn fetch_latest(&self, symbol: &str) -> Result<PricePoint, SourceError> {
        let tick = self.counter.fetch_add(1, Ordering::Relaxed);
        let close = Decimal::from(70_000 + tick);
        Ok(PricePoint {
            symbol: symbol.to_string(),
            timestamp: Utc::now().timestamp() + tick,
            open: close,
            high: close,
            low: close,
            close,
            volume: None,
        })
    }

    async fn fetch_history_page(
        &self,
        _symbol: &str,
        _page: u32,
    ) -> Result<Vec<PricePoint>, SourceError> {
        Ok(Vec::new())
    }
}

fn fast_settings() -> WatcherSettings {
    WatcherSettings {
        poll_interval: Duration::from_millis(10),
        ..WatcherSettings::default()
    }
}

async fn setup() -> (Arc<PriceWatcher>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let watcher = Arc::new(PriceWatcher::new(
        Arc::new(TickingSource::new()),
        Arc::clone(&store) as Arc<dyn WatchRepository>,
        fast_settings(),
    ));
    (watcher, store)
}

#[tokio::test]
async fn register_is_idempotent() {
    let (watcher, store) = setup().await;
    let stock = StockInfo::new("005930", "Samsung", MarketKind::Kospi);

    watcher.register(&stock).await.unwrap();
    watcher.register(&stock).await.unwrap();

    assert!(watcher.is_tracked("005930"));
    let state = store.find("005930").await.unwrap().unwrap();
    assert!(state.watching);
    assert_eq!(state.high_water_mark, 0);
}

#[tokio::test]
async fn register_resumes_a_previously_watched_symbol() {
    let (watcher, store) = setup().await;

    let mut prior = signal_engine::WatchState::new("005930");
    prior.watching = false;
    prior.high_water_mark = 1_700_000_000;
    store.insert(&prior).await.unwrap();

    watcher
        .register(&StockInfo::new("005930", "Samsung", MarketKind::Kospi))
        .await
        .unwrap();

    // Watching is switched back on, the durable mark survives.
    let state = store.find("005930").await.unwrap().unwrap();
    assert!(state.watching);
    assert_eq!(state.high_water_mark, 1_700_000_000);
    assert_eq!(watcher.high_water_mark("005930"), Some(1_700_000_000));
}

#[tokio::test]
async fn withdraw_requires_a_tracked_symbol() {
    let (watcher, store) = setup().await;
    watcher
        .register(&StockInfo::new("005930", "Samsung", MarketKind::Kospi))
        .await
        .unwrap();

    watcher.withdraw("005930").await.unwrap();
    assert!(!watcher.is_tracked("005930"));
    assert!(!store.find("005930").await.unwrap().unwrap().watching);

    let err = watcher.withdraw("005930").await;
    assert!(matches!(err, Err(WatcherError::NotTracked(_))));
}

#[tokio::test]
async fn symbol_stream_delivers_and_closes_on_stop() {
    let (watcher, _store) = setup().await;
    watcher
        .register(&StockInfo::new("005930", "Samsung", MarketKind::Kospi))
        .await
        .unwrap();

    let mut rx = watcher.start_watching_symbol("005930").unwrap();

    let first = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("no price within the poll interval")
        .expect("stream closed unexpectedly");
    assert_eq!(first.symbol, "005930");

    watcher.stop_watching_symbol("005930");

    // Drain whatever was in flight; the channel must then close promptly.
    let closed = timeout(Duration::from_secs(1), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "stream did not close after stop");
}

#[tokio::test]
async fn watching_an_untracked_symbol_fails() {
    let (watcher, _store) = setup().await;
    let err = watcher.start_watching_symbol("005930");
    assert!(matches!(err, Err(WatcherError::NotTracked(_))));
}

#[tokio::test]
async fn restart_replaces_the_previous_stream() {
    let (watcher, _store) = setup().await;
    watcher
        .register(&StockInfo::new("005930", "Samsung", MarketKind::Kospi))
        .await
        .unwrap();

    let mut first = watcher.start_watching_symbol("005930").unwrap();
    let mut second = watcher.start_watching_symbol("005930").unwrap();

    // The first stream's producer was cancelled by the restart.
    let first_closed = timeout(Duration::from_secs(1), async {
        while first.recv().await.is_some() {}
    })
    .await;
    assert!(first_closed.is_ok(), "replaced stream did not close");

    let point = timeout(Duration::from_secs(1), second.recv())
        .await
        .expect("no price from the fresh stream")
        .expect("fresh stream closed unexpectedly");
    assert_eq!(point.symbol, "005930");

    watcher.stop_watching_symbol("005930");
}

#[tokio::test]
async fn bulk_watching_skips_symbols_without_history() {
    let (watcher, store) = setup().await;

    // One symbol with a durable mark, one never backfilled.
    let mut seeded = signal_engine::WatchState::new("005930");
    seeded.high_water_mark = 1_700_000_000;
    store.insert(&seeded).await.unwrap();

    watcher
        .register(&StockInfo::new("005930", "Samsung", MarketKind::Kospi))
        .await
        .unwrap();
    watcher
        .register(&StockInfo::new("035720", "Kakao", MarketKind::Kospi))
        .await
        .unwrap();

    let mut rx = watcher.start_watching_all(Duration::from_millis(10));

    let deadline = tokio::time::Instant::now() + Duration::from_millis(100);
    let mut seen = Vec::new();
    while let Ok(Some(point)) = timeout(Duration::from_millis(200), rx.recv()).await {
        seen.push(point.symbol);
        if tokio::time::Instant::now() >= deadline && seen.len() >= 3 {
            break;
        }
    }

    assert!(!seen.is_empty());
    assert!(seen.iter().all(|symbol| symbol == "005930"));

    watcher.stop_watching_all();
    let closed = timeout(Duration::from_secs(1), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "bulk stream did not close after stop");
}
