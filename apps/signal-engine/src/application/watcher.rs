//! Price Watcher
//!
//! Maintains the authoritative per-symbol watch state and produces two
//! kinds of output: a live stream of freshly-polled price points, and a
//! backfill of historical points that never re-fetches ranges already
//! known.
//!
//! # Concurrency
//!
//! One polling task per watched symbol, each guarded by its own
//! `CancellationToken`; the bulk start shares one token across all its
//! tasks. Producers fan into a single unbounded channel, which closes
//! once every producer has drained and exited. Tokens are one-shot:
//! restarting a symbol allocates a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ports::{PriceSource, StoreError, WatchRepository};
use crate::domain::market::{PricePoint, StockInfo, SymbolId, WatchState};

// =============================================================================
// Settings
// =============================================================================

/// Timing configuration for polling and backfill.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Delay between two live polls of the same symbol.
    pub poll_interval: Duration,
    /// Delay between two history-page fetches of the same symbol.
    pub page_delay: Duration,
    /// Delay between backfill starts of consecutive symbols.
    pub symbol_stagger: Duration,
    /// How far back a fresh symbol's backfill reaches.
    pub lookback: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            page_delay: Duration::from_millis(500),
            symbol_stagger: Duration::from_millis(200),
            lookback: Duration::from_secs(60 * 60 * 24 * 365),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Watcher operation failure.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// The symbol has not been registered with the watcher.
    #[error("symbol {0} is not tracked")]
    NotTracked(SymbolId),
    /// A persistence operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// Watcher
// =============================================================================

struct TrackedSymbol {
    high_water_mark: i64,
    live_token: Option<CancellationToken>,
}

/// Maintains watch state and produces live and historical price streams.
pub struct PriceWatcher {
    source: Arc<dyn PriceSource>,
    watch_repo: Arc<dyn WatchRepository>,
    settings: WatcherSettings,
    tracked: Mutex<HashMap<SymbolId, TrackedSymbol>>,
    bulk_token: Mutex<Option<CancellationToken>>,
}

impl PriceWatcher {
    /// Create a watcher over the given source and watch-state store.
    #[must_use]
    pub fn new(
        source: Arc<dyn PriceSource>,
        watch_repo: Arc<dyn WatchRepository>,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            source,
            watch_repo,
            settings,
            tracked: Mutex::new(HashMap::new()),
            bulk_token: Mutex::new(None),
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a security of interest.
    ///
    /// No-op if already tracked. Otherwise the persisted watch state is
    /// loaded (or created with a zero high-water mark), marked watching,
    /// and persisted back.
    pub async fn register(&self, stock: &StockInfo) -> Result<(), WatcherError> {
        if self.tracked.lock().contains_key(&stock.symbol) {
            return Ok(());
        }

        let state = match self.watch_repo.find(&stock.symbol).await? {
            Some(mut existing) => {
                existing.watching = true;
                self.watch_repo.update(&existing).await?;
                existing
            }
            None => {
                let fresh = WatchState::new(stock.symbol.clone());
                self.watch_repo.insert(&fresh).await?;
                fresh
            }
        };

        self.tracked.lock().insert(
            stock.symbol.clone(),
            TrackedSymbol {
                high_water_mark: state.high_water_mark,
                live_token: None,
            },
        );
        tracing::info!(symbol = %stock.symbol, mark = state.high_water_mark, "symbol registered");
        Ok(())
    }

    /// Withdraw a security from interest.
    ///
    /// Persists `watching = false` with the last known high-water mark
    /// and drops the in-memory entry. Does not stop an in-flight live
    /// task; callers stop watching first or let it drain on its own
    /// cancellation path. Withdrawing an untracked symbol is an error.
    pub async fn withdraw(&self, symbol: &str) -> Result<(), WatcherError> {
        let mark = {
            let tracked = self.tracked.lock();
            match tracked.get(symbol) {
                Some(entry) => entry.high_water_mark,
                None => return Err(WatcherError::NotTracked(symbol.to_string())),
            }
        };

        let state = WatchState {
            symbol: symbol.to_string(),
            watching: false,
            high_water_mark: mark,
        };
        self.watch_repo.update(&state).await?;
        self.tracked.lock().remove(symbol);
        tracing::info!(symbol, "symbol withdrawn");
        Ok(())
    }

    /// Whether a symbol is currently tracked.
    #[must_use]
    pub fn is_tracked(&self, symbol: &str) -> bool {
        self.tracked.lock().contains_key(symbol)
    }

    /// In-memory high-water mark for a tracked symbol.
    #[must_use]
    pub fn high_water_mark(&self, symbol: &str) -> Option<i64> {
        self.tracked.lock().get(symbol).map(|t| t.high_water_mark)
    }

    // =========================================================================
    // Live Watching
    // =========================================================================

    /// Start live polling for one tracked symbol.
    ///
    /// Allocates a fresh cancellation token (cancelling any prior one for
    /// the symbol) and spawns a poll loop that fetches the latest price,
    /// emits it, and sleeps the configured interval, exiting as soon as
    /// the token fires.
    pub fn start_watching_symbol(
        &self,
        symbol: &str,
    ) -> Result<mpsc::UnboundedReceiver<PricePoint>, WatcherError> {
        let token = CancellationToken::new();
        {
            let mut tracked = self.tracked.lock();
            let entry = tracked
                .get_mut(symbol)
                .ok_or_else(|| WatcherError::NotTracked(symbol.to_string()))?;
            if let Some(prior) = entry.live_token.replace(token.clone()) {
                prior.cancel();
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_poll_loop(
            Arc::clone(&self.source),
            symbol.to_string(),
            self.settings.poll_interval,
            token,
            tx,
        );
        Ok(rx)
    }

    /// Stop live polling for one symbol. Idempotent.
    pub fn stop_watching_symbol(&self, symbol: &str) {
        if let Some(entry) = self.tracked.lock().get_mut(symbol) {
            if let Some(token) = entry.live_token.take() {
                token.cancel();
            }
        }
    }

    /// Start live polling for every tracked symbol that has been
    /// backfilled (positive high-water mark), fanned into one stream.
    ///
    /// The returned channel closes once every poll task has observed the
    /// shared cancellation and exited.
    #[must_use]
    pub fn start_watching_all(
        &self,
        poll_interval: Duration,
    ) -> mpsc::UnboundedReceiver<PricePoint> {
        let token = CancellationToken::new();
        if let Some(prior) = self.bulk_token.lock().replace(token.clone()) {
            prior.cancel();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let tracked = self.tracked.lock();
        for (symbol, entry) in tracked.iter() {
            if entry.high_water_mark <= 0 {
                continue;
            }
            spawn_poll_loop(
                Arc::clone(&self.source),
                symbol.clone(),
                poll_interval,
                token.clone(),
                tx.clone(),
            );
        }
        // Dropping the original sender leaves the channel open exactly as
        // long as some poll task still holds a clone.
        rx
    }

    /// Cancel the shared token of the last bulk start. Idempotent.
    pub fn stop_watching_all(&self) {
        if let Some(token) = self.bulk_token.lock().take() {
            token.cancel();
        }
    }

    // =========================================================================
    // History Backfill
    // =========================================================================

    /// Collect historical prices for every tracked symbol.
    ///
    /// Per symbol, pages are fetched newest-first until a timestamp at or
    /// below the pivot (`max(high_water_mark, now - lookback)`) shows up,
    /// meaning the fetched data overlaps what is already known. Emitted
    /// points from all symbols fan into the returned channel; the caller
    /// drains it and persists the points. The watcher persists only the
    /// advanced high-water marks. Symbol starts are staggered to smooth
    /// load on the source.
    pub async fn collect_history(
        self: &Arc<Self>,
    ) -> Result<mpsc::UnboundedReceiver<PricePoint>, WatcherError> {
        // Resume from the durably recorded marks.
        let watching = self.watch_repo.find_watching().await?;
        {
            let mut tracked = self.tracked.lock();
            for state in watching {
                tracked
                    .entry(state.symbol.clone())
                    .or_insert_with(|| TrackedSymbol {
                        high_water_mark: 0,
                        live_token: None,
                    })
                    .high_water_mark = state.high_water_mark;
            }
        }

        let pivot_floor = chrono::Utc::now().timestamp()
            - i64::try_from(self.settings.lookback.as_secs()).unwrap_or(i64::MAX);

        let snapshot: Vec<(SymbolId, i64)> = self
            .tracked
            .lock()
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), entry.high_water_mark))
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Arc::clone(self);
        let stagger = self.settings.symbol_stagger;
        tokio::spawn(async move {
            for (symbol, mark) in snapshot {
                let task_watcher = Arc::clone(&watcher);
                let task_tx = tx.clone();
                tokio::spawn(async move {
                    task_watcher
                        .backfill_symbol(symbol, mark, pivot_floor, task_tx)
                        .await;
                });
                tokio::time::sleep(stagger).await;
            }
        });
        Ok(rx)
    }

    /// Backfill one symbol from its pivot and persist the advanced mark.
    async fn backfill_symbol(
        &self,
        symbol: SymbolId,
        mark: i64,
        pivot_floor: i64,
        tx: mpsc::UnboundedSender<PricePoint>,
    ) {
        let pivot = mark.max(pivot_floor);
        let mut max_seen = 0_i64;
        let mut page = 1_u32;

        loop {
            let points = match self.source.fetch_history_page(&symbol, page).await {
                Ok(points) => points,
                Err(error) => {
                    // Next run resumes from the unadvanced mark.
                    tracing::warn!(%symbol, page, %error, "history page fetch failed, stopping backfill");
                    return;
                }
            };
            if points.is_empty() {
                break;
            }

            // Pages are sorted newest-first; find the first entry at or
            // below the pivot.
            let boundary = points.partition_point(|p| p.timestamp > pivot);
            for point in &points[..boundary] {
                max_seen = max_seen.max(point.timestamp);
                if tx.send(point.clone()).is_err() {
                    return;
                }
            }
            if boundary < points.len() {
                // Overlap with known data: this symbol is done.
                break;
            }
            page += 1;
            tokio::time::sleep(self.settings.page_delay).await;
        }

        let new_mark = mark.max(max_seen);
        if let Err(error) = self.persist_high_water_mark(&symbol, new_mark).await {
            tracing::error!(%symbol, %error, "failed to persist high-water mark");
        } else {
            tracing::info!(%symbol, mark = new_mark, "backfill complete");
        }
    }

    /// Persist a (non-decreasing) high-water mark and mirror it in the
    /// tracking table.
    ///
    /// The stored `watching` flag is preserved so a withdraw that lands
    /// while this symbol's backfill is in flight stays withdrawn.
    async fn persist_high_water_mark(&self, symbol: &str, mark: i64) -> Result<(), StoreError> {
        match self.watch_repo.find(symbol).await? {
            Some(mut state) => {
                state.high_water_mark = mark;
                self.watch_repo.update(&state).await?;
            }
            None => {
                let state = WatchState {
                    symbol: symbol.to_string(),
                    watching: true,
                    high_water_mark: mark,
                };
                self.watch_repo.insert(&state).await?;
            }
        }

        if let Some(entry) = self.tracked.lock().get_mut(symbol) {
            entry.high_water_mark = entry.high_water_mark.max(mark);
        }
        Ok(())
    }
}

/// Spawn one live poll loop: fetch, emit, sleep, racing the token at
/// every suspension point.
fn spawn_poll_loop(
    source: Arc<dyn PriceSource>,
    symbol: SymbolId,
    poll_interval: Duration,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<PricePoint>,
) {
    tokio::spawn(async move {
        loop {
            if token.is_cancelled() {
                break;
            }
            match source.fetch_latest(&symbol).await {
                Ok(point) => {
                    if tx.send(point).is_err() {
                        // Consumer dropped the stream.
                        break;
                    }
                }
                Err(error) => {
                    tracing::warn!(%symbol, %error, "live poll failed");
                }
            }
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(poll_interval) => {}
            }
        }
        tracing::debug!(%symbol, "poll loop stopped");
    });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::super::ports::{MockPriceSource, MockWatchRepository};
    use super::*;
    use crate::domain::market::{MarketKind, StockInfo};

    fn watcher(repo: MockWatchRepository) -> Arc<PriceWatcher> {
        Arc::new(PriceWatcher::new(
            Arc::new(MockPriceSource::new()),
            Arc::new(repo),
            WatcherSettings::default(),
        ))
    }

    fn stock() -> StockInfo {
        StockInfo::new("005930", "Samsung Electronics", MarketKind::Kospi)
    }

    #[tokio::test]
    async fn register_inserts_fresh_state() {
        let mut repo = MockWatchRepository::new();
        repo.expect_find().returning(|_| Ok(None));
        repo.expect_insert()
            .withf(|state| state.symbol == "005930" && state.watching && state.high_water_mark == 0)
            .times(1)
            .returning(|_| Ok(()));

        let watcher = watcher(repo);
        watcher.register(&stock()).await.unwrap();
        assert!(watcher.is_tracked("005930"));
        assert_eq!(watcher.high_water_mark("005930"), Some(0));
    }

    #[tokio::test]
    async fn register_reactivates_known_state_keeping_the_mark() {
        let mut repo = MockWatchRepository::new();
        repo.expect_find().returning(|_| {
            Ok(Some(WatchState {
                symbol: "005930".to_string(),
                watching: false,
                high_water_mark: 42,
            }))
        });
        repo.expect_update()
            .withf(|state| state.watching && state.high_water_mark == 42)
            .times(1)
            .returning(|_| Ok(()));

        let watcher = watcher(repo);
        watcher.register(&stock()).await.unwrap();
        assert_eq!(watcher.high_water_mark("005930"), Some(42));
    }

    #[tokio::test]
    async fn second_register_skips_the_store() {
        let mut repo = MockWatchRepository::new();
        repo.expect_find().times(1).returning(|_| Ok(None));
        repo.expect_insert().times(1).returning(|_| Ok(()));

        let watcher = watcher(repo);
        watcher.register(&stock()).await.unwrap();
        watcher.register(&stock()).await.unwrap();
    }

    #[tokio::test]
    async fn withdraw_persists_not_watching() {
        let mut repo = MockWatchRepository::new();
        repo.expect_find().returning(|_| Ok(None));
        repo.expect_insert().returning(|_| Ok(()));
        repo.expect_update()
            .withf(|state| !state.watching)
            .times(1)
            .returning(|_| Ok(()));

        let watcher = watcher(repo);
        watcher.register(&stock()).await.unwrap();
        watcher.withdraw("005930").await.unwrap();
        assert!(!watcher.is_tracked("005930"));
    }

    #[tokio::test]
    async fn withdraw_unknown_symbol_is_an_error() {
        let watcher = watcher(MockWatchRepository::new());
        let err = watcher.withdraw("000000").await;
        assert!(matches!(err, Err(WatcherError::NotTracked(_))));
    }
}
