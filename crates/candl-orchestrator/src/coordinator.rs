use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use candl_core::{
    AnalysisError, ConsensusProvider, Facet, MarketDataProvider, NewsItem, NewsProvider,
    SentimentReport, SentimentScorer, Snapshot, Symbol,
};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::aggregator::Aggregator;
use crate::cache::SnapshotCache;
use crate::config::OrchestratorConfig;
use crate::dedupe::dedupe;
use crate::fetchers::{guarded, FetchOutcome, SourceFetchers};
use crate::refresh::RefreshScheduler;
use crate::retry::{RetryDecision, RetryScheduler, RetryState};
use crate::state::{
    persist, persist_in_background, AppState, Theme, KEY_LAST_SYMBOL, KEY_THEME, KEY_TIPS_VISIBLE,
    KEY_WATCHLIST,
};
use crate::store::LocalStore;

const EVENT_CAPACITY: usize = 256;

/// What started an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Refresh,
    Retry,
}

#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    Started {
        symbol: Symbol,
        generation: u64,
        trigger: Trigger,
    },
    /// Last-known snapshot shown while a fresh fetch runs.
    Restored {
        snapshot: Arc<Snapshot>,
        stored_at: DateTime<Utc>,
    },
    Committed {
        snapshot: Arc<Snapshot>,
    },
    Failed {
        symbol: Symbol,
        generation: u64,
        error: AnalysisError,
    },
    RetryScheduled {
        symbol: Symbol,
        attempt: u32,
        delay: Duration,
    },
    RetryExhausted {
        symbol: Symbol,
        attempts: u32,
    },
    Cleared,
}

#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    /// `missing` lists secondary facets that failed (partial success).
    Committed {
        snapshot: Arc<Snapshot>,
        missing: Vec<Facet>,
    },
    /// Canceled or overtaken by a newer generation. Not an error.
    Superseded,
}

/// External collaborators the coordinator fans out to.
pub struct Collaborators {
    pub market: Arc<dyn MarketDataProvider>,
    pub news: Arc<dyn NewsProvider>,
    pub consensus: Arc<dyn ConsensusProvider>,
    pub sentiment: Option<Arc<dyn SentimentScorer>>,
}

/// Mutable session state. Single writer: only coordinator methods touch it,
/// and the lock is never held across a fetch.
struct Session {
    generation: u64,
    current_symbol: Option<Symbol>,
    cancel: CancellationToken,
    in_flight: Option<u64>,
    displayed: Option<Arc<Snapshot>>,
    last_error: Option<AnalysisError>,
    app: AppState,
    closed: bool,
    retry: RetryScheduler,
    refresh: RefreshScheduler,
}

struct Inner {
    fetchers: SourceFetchers,
    aggregator: Aggregator,
    sentiment: Option<Arc<dyn SentimentScorer>>,
    cache: SnapshotCache,
    store: Option<LocalStore>,
    root: CancellationToken,
    events: broadcast::Sender<CoordinatorEvent>,
    market_news_limit: usize,
    auto_refresh: bool,
    session: Mutex<Session>,
}

/// Entry point for symbol analysis.
///
/// Every run is tagged with a generation. Starting a run cancels the previous
/// generation's token; results are committed only if their generation is still
/// the latest when they arrive. Retry and refresh timers call back into
/// [`RequestCoordinator`] and go through the same gate.
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

/// Timer callback. Boxed so the run future can arm timers that re-enter it.
fn scheduled_run(
    weak: Weak<Inner>,
    symbol: Symbol,
    trigger: Trigger,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let coordinator = RequestCoordinator { inner };
        if let Err(e) = coordinator.run(symbol, trigger).await {
            tracing::debug!("{:?} run ended with error: {}", trigger, e);
        }
    })
}

impl RequestCoordinator {
    /// Build the coordinator and load `AppState` from the store (defaults if absent).
    pub async fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        store: Option<LocalStore>,
    ) -> Self {
        let app = AppState::load(store.as_ref()).await;
        let fetchers = SourceFetchers::new(
            collaborators.market,
            collaborators.news,
            collaborators.consensus,
            &config,
        );
        let root = CancellationToken::new();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let session = Session {
            generation: 0,
            current_symbol: None,
            cancel: root.child_token(),
            in_flight: None,
            displayed: None,
            last_error: None,
            app,
            closed: false,
            retry: RetryScheduler::new(config.retry),
            refresh: RefreshScheduler::new(config.refresh_interval),
        };

        Self {
            inner: Arc::new(Inner {
                fetchers,
                aggregator: Aggregator::new(config.news_limit),
                sentiment: collaborators.sentiment,
                cache: SnapshotCache::new(store.clone()),
                store,
                root,
                events,
                market_news_limit: config.market_news_limit,
                auto_refresh: config.auto_refresh,
                session: Mutex::new(session),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    /// Normalize `raw` and analyze it. Preempts any in-flight or scheduled run.
    pub async fn start_analysis(&self, raw: &str) -> Result<AnalysisOutcome, AnalysisError> {
        let symbol = Symbol::parse(raw)?;
        self.run(symbol, Trigger::Manual).await
    }

    async fn run(&self, symbol: Symbol, trigger: Trigger) -> Result<AnalysisOutcome, AnalysisError> {
        let (generation, token) = {
            let mut s = self.inner.session.lock().await;
            if s.closed {
                return Err(AnalysisError::SessionClosed);
            }

            match trigger {
                Trigger::Manual => s.retry.reset(),
                Trigger::Refresh | Trigger::Retry => {
                    if s.current_symbol.as_ref() != Some(&symbol) {
                        tracing::debug!("Skipping {:?} for {}: no longer current", trigger, symbol);
                        return Ok(AnalysisOutcome::Superseded);
                    }
                    if s.in_flight.is_some() {
                        tracing::debug!("Skipping {:?} for {}: fetch already in flight", trigger, symbol);
                        return Ok(AnalysisOutcome::Superseded);
                    }
                    if trigger == Trigger::Refresh && s.retry.state() != RetryState::Idle {
                        tracing::debug!("Skipping refresh for {}: retry cycle active", symbol);
                        return Ok(AnalysisOutcome::Superseded);
                    }
                }
            }

            s.cancel.cancel();
            s.generation += 1;
            let generation = s.generation;
            let token = self.inner.root.child_token();
            s.cancel = token.clone();
            s.in_flight = Some(generation);

            if trigger == Trigger::Manual {
                if s.current_symbol.as_ref() != Some(&symbol) {
                    s.refresh.disarm();
                    s.displayed = None;
                }
                s.current_symbol = Some(symbol.clone());
                s.app.last_symbol = Some(symbol.clone());
                persist_in_background(self.inner.store.as_ref(), KEY_LAST_SYMBOL, symbol.clone());
            }

            self.emit(CoordinatorEvent::Started {
                symbol: symbol.clone(),
                generation,
                trigger,
            });
            (generation, token)
        };

        tracing::info!("Analyzing {} (generation {}, {:?})", symbol, generation, trigger);

        let restore = async {
            if trigger == Trigger::Manual {
                self.restore_cached(&symbol, generation, &token).await;
            }
        };
        let (_, outcomes) = tokio::join!(restore, self.inner.fetchers.fetch_all(&symbol, &token));

        let Some(settled) = outcomes.settle() else {
            tracing::debug!("Generation {} for {} canceled, discarding", generation, symbol);
            self.release(generation).await;
            return Ok(AnalysisOutcome::Superseded);
        };

        match self.inner.aggregator.build(&symbol, generation, settled, Utc::now()) {
            Ok(mut snapshot) => {
                snapshot.sentiment = self.score_headlines(&snapshot, &token).await;
                self.commit(snapshot, &token).await
            }
            Err(error) => self.fail(symbol, generation, &token, error).await,
        }
    }

    async fn restore_cached(&self, symbol: &Symbol, generation: u64, token: &CancellationToken) {
        let Some(entry) = self.inner.cache.load(symbol).await else {
            return;
        };

        let mut s = self.inner.session.lock().await;
        if s.generation != generation || token.is_cancelled() || s.displayed.is_some() {
            return;
        }
        let snapshot = Arc::new(entry.snapshot);
        s.displayed = Some(snapshot.clone());
        tracing::debug!("Restored cached snapshot for {} from {}", symbol, entry.stored_at);
        self.emit(CoordinatorEvent::Restored {
            snapshot,
            stored_at: entry.stored_at,
        });
    }

    async fn score_headlines(&self, snapshot: &Snapshot, token: &CancellationToken) -> Option<SentimentReport> {
        let scorer = self.inner.sentiment.as_ref()?;
        let headlines: Vec<String> = snapshot
            .news
            .as_ref()?
            .iter()
            .map(|n| n.headline.clone())
            .collect();
        if headlines.is_empty() {
            return None;
        }

        match guarded(
            "sentiment",
            &snapshot.symbol,
            token,
            self.inner.fetchers.timeout(),
            scorer.score(&headlines),
        )
        .await
        {
            FetchOutcome::Ready(report) => Some(report),
            FetchOutcome::Failed(_) | FetchOutcome::Canceled => None,
        }
    }

    /// Clear the in-flight marker if it still belongs to `generation`.
    async fn release(&self, generation: u64) {
        let mut s = self.inner.session.lock().await;
        if s.in_flight == Some(generation) {
            s.in_flight = None;
        }
    }

    async fn commit(
        &self,
        snapshot: Snapshot,
        token: &CancellationToken,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let generation = snapshot.generation;
        let symbol = snapshot.symbol.clone();

        let mut s = self.inner.session.lock().await;
        if s.generation != generation || token.is_cancelled() {
            if s.in_flight == Some(generation) {
                s.in_flight = None;
            }
            tracing::debug!(
                "Discarding stale generation {} for {} (current {})",
                generation,
                symbol,
                s.generation
            );
            return Ok(AnalysisOutcome::Superseded);
        }

        let snapshot = Arc::new(snapshot);
        s.in_flight = None;
        s.displayed = Some(snapshot.clone());
        s.last_error = None;
        s.retry.record_success();

        if self.inner.auto_refresh && !s.refresh.is_armed_for(&symbol) {
            let weak = Arc::downgrade(&self.inner);
            let tick_symbol = symbol.clone();
            s.refresh.arm(symbol.clone(), move || {
                scheduled_run(weak.clone(), tick_symbol.clone(), Trigger::Refresh)
            });
        }

        self.inner
            .cache
            .store_in_background(&symbol, (*snapshot).clone(), snapshot.last_updated);

        if snapshot.is_partial() {
            tracing::info!(
                "Committed {} generation {} (missing: {:?})",
                symbol,
                generation,
                snapshot.missing
            );
        } else {
            tracing::info!("Committed {} generation {}", symbol, generation);
        }
        self.emit(CoordinatorEvent::Committed {
            snapshot: snapshot.clone(),
        });

        Ok(AnalysisOutcome::Committed {
            missing: snapshot.missing.clone(),
            snapshot,
        })
    }

    async fn fail(
        &self,
        symbol: Symbol,
        generation: u64,
        token: &CancellationToken,
        error: AnalysisError,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let mut s = self.inner.session.lock().await;
        if s.generation != generation || token.is_cancelled() {
            if s.in_flight == Some(generation) {
                s.in_flight = None;
            }
            tracing::debug!("Dropping failure of stale generation {} for {}", generation, symbol);
            return Ok(AnalysisOutcome::Superseded);
        }

        s.in_flight = None;
        s.last_error = Some(error.clone());
        tracing::warn!("{}", error);
        self.emit(CoordinatorEvent::Failed {
            symbol: symbol.clone(),
            generation,
            error: error.clone(),
        });

        match s.retry.record_failure() {
            RetryDecision::Schedule { attempt, delay } => {
                tracing::info!("Retry {} for {} in {:?}", attempt, symbol, delay);
                let weak = Arc::downgrade(&self.inner);
                s.retry.arm(delay, scheduled_run(weak, symbol.clone(), Trigger::Retry));
                self.emit(CoordinatorEvent::RetryScheduled {
                    symbol,
                    attempt,
                    delay,
                });
            }
            RetryDecision::GiveUp { attempts } => {
                tracing::warn!("Giving up on {} after {} retries", symbol, attempts);
                self.emit(CoordinatorEvent::RetryExhausted { symbol, attempts });
            }
        }

        Err(error)
    }

    /// Disarm both schedulers, cancel the in-flight generation and drop the
    /// displayed state. Cache entries survive unless `purge_cache` is set.
    pub async fn clear(&self, purge_cache: bool) {
        let symbol = {
            let mut s = self.inner.session.lock().await;
            s.cancel.cancel();
            // Bump so anything still running for the old generation cannot commit.
            s.generation += 1;
            s.in_flight = None;
            s.retry.reset();
            s.refresh.disarm();
            s.displayed = None;
            s.last_error = None;
            let symbol = s.current_symbol.take();
            self.emit(CoordinatorEvent::Cleared);
            symbol
        };

        if purge_cache {
            if let Some(symbol) = symbol {
                self.inner.cache.clear(&symbol).await;
            }
        }
    }

    /// Session teardown: cancel every generation and timer. Later calls to
    /// `start_analysis` fail with `SessionClosed`.
    pub async fn shutdown(&self) {
        let mut s = self.inner.session.lock().await;
        if s.closed {
            return;
        }
        s.closed = true;
        self.inner.root.cancel();
        s.cancel.cancel();
        s.in_flight = None;
        s.retry.reset();
        s.refresh.disarm();
        tracing::info!("Coordinator shut down at generation {}", s.generation);
    }

    /// Show the cached snapshot for the last analyzed symbol without fetching.
    pub async fn restore_last(&self) -> Option<Arc<Snapshot>> {
        let symbol = {
            let s = self.inner.session.lock().await;
            if s.closed {
                return None;
            }
            s.app.last_symbol.clone()?
        };

        let entry = self.inner.cache.load(&symbol).await?;

        let mut s = self.inner.session.lock().await;
        if s.closed || s.in_flight.is_some() || s.displayed.is_some() {
            return None;
        }
        let snapshot = Arc::new(entry.snapshot);
        s.current_symbol = Some(symbol);
        s.displayed = Some(snapshot.clone());
        self.emit(CoordinatorEvent::Restored {
            snapshot: snapshot.clone(),
            stored_at: entry.stored_at,
        });
        Some(snapshot)
    }

    /// General market headlines, deduplicated. Empty on any failure.
    pub async fn market_news(&self) -> Vec<NewsItem> {
        let token = self.inner.root.child_token();
        match self.inner.fetchers.market_news(&token).await {
            FetchOutcome::Ready(items) => {
                let mut items = dedupe(items);
                items.truncate(self.inner.market_news_limit);
                items
            }
            FetchOutcome::Failed(_) | FetchOutcome::Canceled => Vec::new(),
        }
    }

    pub async fn add_watch(&self, raw: &str) -> Result<bool, AnalysisError> {
        let symbol = Symbol::parse(raw)?;
        let watchlist = {
            let mut s = self.inner.session.lock().await;
            if !s.app.add_watch(symbol) {
                return Ok(false);
            }
            s.app.watchlist.clone()
        };
        persist(self.inner.store.as_ref(), KEY_WATCHLIST, &watchlist).await;
        Ok(true)
    }

    pub async fn remove_watch(&self, raw: &str) -> Result<bool, AnalysisError> {
        let symbol = Symbol::parse(raw)?;
        let watchlist = {
            let mut s = self.inner.session.lock().await;
            if !s.app.remove_watch(&symbol) {
                return Ok(false);
            }
            s.app.watchlist.clone()
        };
        persist(self.inner.store.as_ref(), KEY_WATCHLIST, &watchlist).await;
        Ok(true)
    }

    pub async fn set_theme(&self, theme: Theme) {
        self.inner.session.lock().await.app.theme = theme;
        persist(self.inner.store.as_ref(), KEY_THEME, &theme).await;
    }

    pub async fn set_tips_visible(&self, visible: bool) {
        self.inner.session.lock().await.app.tips_visible = visible;
        persist(self.inner.store.as_ref(), KEY_TIPS_VISIBLE, &visible).await;
    }

    /// Currently displayed snapshot (committed or restored from cache).
    pub async fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.session.lock().await.displayed.clone()
    }

    pub async fn current_symbol(&self) -> Option<Symbol> {
        self.inner.session.lock().await.current_symbol.clone()
    }

    pub async fn generation(&self) -> u64 {
        self.inner.session.lock().await.generation
    }

    pub async fn is_in_flight(&self) -> bool {
        self.inner.session.lock().await.in_flight.is_some()
    }

    pub async fn last_error(&self) -> Option<AnalysisError> {
        self.inner.session.lock().await.last_error.clone()
    }

    pub async fn retry_state(&self) -> RetryState {
        self.inner.session.lock().await.retry.state()
    }

    pub async fn app_state(&self) -> AppState {
        self.inner.session.lock().await.app.clone()
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        coordinator, coordinator_with, sample_quote, sample_snapshot, FakeMarket, FakeNews,
        FakeSentiment,
    };
    use candl_core::FetchError;
    use std::sync::atomic::Ordering;

    fn committed(outcome: AnalysisOutcome) -> Arc<Snapshot> {
        match outcome {
            AnalysisOutcome::Committed { snapshot, .. } => snapshot,
            AnalysisOutcome::Superseded => panic!("expected a committed snapshot"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_newest_generation_wins_when_older_finishes_later() {
        let market = Arc::new(
            FakeMarket::new(1.0)
                .then_quote(Duration::from_millis(500), Ok(sample_quote(1.0)))
                .then_quote(Duration::from_millis(10), Ok(sample_quote(2.0))),
        );
        let coord = coordinator(market.clone()).await;

        let first = {
            let c = coord.clone();
            tokio::spawn(async move { c.start_analysis("AAPL").await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        let second = coord.start_analysis("msft").await.unwrap();

        let snapshot = committed(second);
        assert_eq!(snapshot.symbol.as_str(), "MSFT");
        assert_eq!(snapshot.quote.price, 2.0);
        assert_eq!(snapshot.generation, 2);

        assert!(matches!(first.await.unwrap(), Ok(AnalysisOutcome::Superseded)));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let shown = coord.snapshot().await.unwrap();
        assert_eq!(shown.symbol.as_str(), "MSFT");
        assert_eq!(shown.generation, 2);
    }

    #[tokio::test]
    async fn test_stale_generation_cannot_commit() {
        let market = Arc::new(FakeMarket::new(10.0));
        let coord = coordinator(market).await;

        committed(coord.start_analysis("AAPL").await.unwrap());
        committed(coord.start_analysis("AAPL").await.unwrap());
        assert_eq!(coord.generation().await, 2);

        let late = sample_snapshot("AAPL", 1, 999.0);
        let outcome = coord.commit(late, &CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, AnalysisOutcome::Superseded));
        assert_eq!(coord.snapshot().await.unwrap().quote.price, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_while_in_flight_discards_result() {
        let market = Arc::new(FakeMarket::new(10.0).with_quote_delay(Duration::from_millis(500)));
        let coord = coordinator(market).await;
        let mut events = coord.subscribe();

        let pending = {
            let c = coord.clone();
            tokio::spawn(async move { c.start_analysis("AAPL").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coord.is_in_flight().await);

        coord.clear(false).await;
        assert!(matches!(pending.await.unwrap(), Ok(AnalysisOutcome::Superseded)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(coord.snapshot().await.is_none());
        assert!(coord.current_symbol().await.is_none());
        assert!(!coord.is_in_flight().await);

        let mut saw_commit = false;
        while let Ok(event) = events.try_recv() {
            saw_commit |= matches!(event, CoordinatorEvent::Committed { .. });
        }
        assert!(!saw_commit);
    }

    #[tokio::test]
    async fn test_purge_removes_durable_entry() {
        let store = LocalStore::in_memory().await.unwrap();
        let coord = coordinator_with(Arc::new(FakeMarket::new(10.0)), Some(store.clone()), None).await;

        committed(coord.start_analysis("AAPL").await.unwrap());
        coord.clear(true).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(store.get_raw("snapshot:AAPL").await.unwrap().is_none());
        let reopened = SnapshotCache::new(Some(store));
        assert!(reopened.load(&Symbol::parse("AAPL").unwrap()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_failure_is_silent() {
        let market = Arc::new(
            FakeMarket::new(20.0)
                .then_quote(Duration::from_millis(500), Err(FetchError::Provider { status: 503 }))
                .then_quote(Duration::from_millis(10), Ok(sample_quote(21.0))),
        );
        let coord = coordinator(market.clone()).await;
        let mut events = coord.subscribe();

        let first = {
            let c = coord.clone();
            tokio::spawn(async move { c.start_analysis("AAPL").await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        let second = committed(coord.start_analysis("AAPL").await.unwrap());
        assert_eq!(second.generation, 2);

        assert!(matches!(first.await.unwrap(), Ok(AnalysisOutcome::Superseded)));
        tokio::time::sleep(Duration::from_secs(2)).await;

        while let Ok(event) = events.try_recv() {
            assert!(
                !matches!(
                    event,
                    CoordinatorEvent::Failed { .. }
                        | CoordinatorEvent::RetryScheduled { .. }
                        | CoordinatorEvent::RetryExhausted { .. }
                ),
                "unexpected {:?}",
                event
            );
        }
        assert_eq!(coord.retry_state().await, RetryState::Idle);
        assert!(coord.last_error().await.is_none());
        assert_eq!(market.quote_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_until_exhausted() {
        let market = Arc::new(FakeMarket::failing(FetchError::Provider { status: 503 }));
        let coord = coordinator(market.clone()).await;
        let mut events = coord.subscribe();

        let err = coord.start_analysis("AAPL").await.unwrap_err();
        assert!(err.is_retryable());

        let mut delays = Vec::new();
        let exhausted_after = loop {
            match events.recv().await.unwrap() {
                CoordinatorEvent::RetryScheduled { delay, .. } => delays.push(delay.as_millis()),
                CoordinatorEvent::RetryExhausted { attempts, .. } => break attempts,
                _ => {}
            }
        };

        assert_eq!(delays, vec![100, 200, 400]);
        assert_eq!(exhausted_after, 3);
        assert_eq!(market.quote_calls.load(Ordering::SeqCst), 4);
        assert_eq!(coord.retry_state().await, RetryState::Exhausted { attempts: 3 });
        assert!(coord.last_error().await.is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(market.quote_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retry_resets_state() {
        let market = Arc::new(
            FakeMarket::new(42.0).then_quote(Duration::ZERO, Err(FetchError::Timeout)),
        );
        let coord = coordinator(market.clone()).await;
        let mut events = coord.subscribe();

        assert!(coord.start_analysis("AAPL").await.is_err());
        assert_eq!(
            coord.retry_state().await,
            RetryState::Armed {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );

        loop {
            if let CoordinatorEvent::Committed { snapshot } = events.recv().await.unwrap() {
                assert_eq!(snapshot.quote.price, 42.0);
                break;
            }
        }
        assert_eq!(coord.retry_state().await, RetryState::Idle);
        assert!(coord.last_error().await.is_none());
        assert_eq!(market.quote_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_start_cancels_pending_retry() {
        let market = Arc::new(
            FakeMarket::new(42.0).then_quote(Duration::ZERO, Err(FetchError::Provider { status: 502 })),
        );
        let coord = coordinator(market.clone()).await;

        assert!(coord.start_analysis("AAPL").await.is_err());
        committed(coord.start_analysis("AAPL").await.unwrap());
        assert_eq!(coord.retry_state().await, RetryState::Idle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(market.quote_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_validation_makes_no_calls() {
        let market = Arc::new(FakeMarket::new(1.0));
        let coord = coordinator(market.clone()).await;

        let err = coord.start_analysis("   ").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
        assert!(!err.is_retryable());
        assert_eq!(market.quote_calls.load(Ordering::SeqCst), 0);
        assert_eq!(coord.generation().await, 0);
    }

    #[tokio::test]
    async fn test_partial_success_reports_missing_facets() {
        let market = Arc::new(FakeMarket::new(75.0).with_failing_secondary());
        let coord = coordinator(market).await;

        match coord.start_analysis("aapl").await.unwrap() {
            AnalysisOutcome::Committed { snapshot, missing } => {
                assert_eq!(missing, vec![Facet::Profile, Facet::Metrics, Facet::Dividends]);
                assert!(snapshot.profile.is_none());
                assert!(snapshot.news.is_some());
                assert_eq!(snapshot.quote.price, 75.0);
            }
            AnalysisOutcome::Superseded => panic!("expected commit"),
        }
        assert!(coord.last_error().await.is_none());
        assert_eq!(coord.retry_state().await, RetryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_fires_on_interval_and_clear_disarms() {
        let market = Arc::new(FakeMarket::new(10.0));
        let coord = coordinator(market.clone()).await;

        committed(coord.start_analysis("AAPL").await.unwrap());
        assert_eq!(market.quote_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(market.quote_calls.load(Ordering::SeqCst), 2);
        assert_eq!(coord.snapshot().await.unwrap().generation, 2);

        coord.clear(false).await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(market.quote_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_skipped_while_fetch_in_flight() {
        let market = Arc::new(
            FakeMarket::new(10.0)
                .then_quote(Duration::ZERO, Ok(sample_quote(10.0)))
                .then_quote(Duration::from_secs(4), Ok(sample_quote(11.0))),
        );
        let coord = coordinator(market.clone()).await;
        committed(coord.start_analysis("AAPL").await.unwrap());

        // Manual run straddles the first refresh tick at t=30s.
        tokio::time::sleep(Duration::from_secs(28)).await;
        let manual = {
            let c = coord.clone();
            tokio::spawn(async move { c.start_analysis("AAPL").await })
        };
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(market.quote_calls.load(Ordering::SeqCst), 2);

        let snapshot = committed(manual.await.unwrap().unwrap());
        assert_eq!(snapshot.quote.price, 11.0);
        assert_eq!(market.quote_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_restore_last_and_instant_reload() {
        let store = LocalStore::in_memory().await.unwrap();
        let seeded = SnapshotCache::new(Some(store.clone()));
        let sym = Symbol::parse("NVDA").unwrap();
        seeded.store(&sym, sample_snapshot("NVDA", 9, 500.0), Utc::now()).await;
        store.put_json("last_symbol", &sym).await.unwrap();

        let market = Arc::new(FakeMarket::new(510.0));
        let coord = coordinator_with(market, Some(store), None).await;
        let mut events = coord.subscribe();

        let restored = coord.restore_last().await.unwrap();
        assert_eq!(restored.quote.price, 500.0);
        assert_eq!(coord.current_symbol().await, Some(sym.clone()));
        assert!(matches!(events.try_recv(), Ok(CoordinatorEvent::Restored { .. })));

        coord.clear(false).await;
        let fresh = committed(coord.start_analysis("nvda").await.unwrap());
        assert_eq!(fresh.quote.price, 510.0);

        let mut order = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                CoordinatorEvent::Restored { snapshot, .. } => order.push(("restored", snapshot.quote.price)),
                CoordinatorEvent::Committed { snapshot } => order.push(("committed", snapshot.quote.price)),
                _ => {}
            }
        }
        assert_eq!(order, vec![("restored", 500.0), ("committed", 510.0)]);
    }

    #[tokio::test]
    async fn test_sentiment_enrichment_scores_deduped_headlines() {
        let market = Arc::new(FakeMarket::new(10.0));
        let coord = coordinator_with(market, None, Some(Arc::new(FakeSentiment) as Arc<dyn SentimentScorer>)).await;

        let snapshot = committed(coord.start_analysis("AAPL").await.unwrap());
        let news_len = snapshot.news.as_ref().unwrap().len();
        let report = snapshot.sentiment.as_ref().unwrap();
        assert_eq!(report.results.len(), news_len);
        assert_eq!(report.summary.positive as usize, news_len);
    }

    #[tokio::test]
    async fn test_market_news_deduped_and_limited() {
        let coord = coordinator(Arc::new(FakeMarket::new(1.0))).await;
        let news = coord.market_news().await;
        assert_eq!(news.len(), 10);
        let distinct: std::collections::HashSet<_> =
            news.iter().map(|n| crate::dedupe::normalize(&n.headline)).collect();
        assert_eq!(distinct.len(), news.len());
        assert_eq!(FakeNews::default().market.len(), 14);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_work() {
        let coord = coordinator(Arc::new(FakeMarket::new(1.0))).await;
        coord.shutdown().await;
        assert!(matches!(
            coord.start_analysis("AAPL").await,
            Err(AnalysisError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_watchlist_and_preferences_persist() {
        let store = LocalStore::in_memory().await.unwrap();
        let coord = coordinator_with(Arc::new(FakeMarket::new(1.0)), Some(store.clone()), None).await;

        assert!(coord.add_watch("aapl").await.unwrap());
        assert!(coord.add_watch("MSFT").await.unwrap());
        assert!(!coord.add_watch("AAPL").await.unwrap());
        assert!(coord.remove_watch("aapl").await.unwrap());
        assert!(coord.add_watch("").await.is_err());
        coord.set_theme(Theme::Light).await;
        coord.set_tips_visible(false).await;

        let state = coord.app_state().await;
        assert_eq!(state.watchlist, vec![Symbol::parse("MSFT").unwrap()]);
        assert_eq!(state.theme, Theme::Light);

        let reloaded = AppState::load(Some(&store)).await;
        assert_eq!(reloaded.watchlist, state.watchlist);
        assert_eq!(reloaded.theme, Theme::Light);
        assert!(!reloaded.tips_visible);
    }
}
