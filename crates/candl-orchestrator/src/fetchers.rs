use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use candl_core::{
    CompanyProfile, ConsensusProvider, DateRange, Dividend, EarningsEvent, FetchError, KeyMetrics,
    MarketDataProvider, NewsItem, NewsProvider, Quote, RecommendationTally, Symbol,
};
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;

/// Result of one facet fetch. `Canceled` is neither success nor failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Ready(T),
    Failed(FetchError),
    Canceled,
}

impl<T> FetchOutcome<T> {
    pub fn is_canceled(&self) -> bool {
        matches!(self, FetchOutcome::Canceled)
    }

    /// `None` when canceled.
    pub fn into_result(self) -> Option<Result<T, FetchError>> {
        match self {
            FetchOutcome::Ready(value) => Some(Ok(value)),
            FetchOutcome::Failed(e) => Some(Err(e)),
            FetchOutcome::Canceled => None,
        }
    }
}

/// Run `fut` under the generation's cancellation token and the per-facet timeout.
/// Cancellation wins ties so a superseded generation never reports a value.
pub(crate) async fn guarded<T, F>(
    label: &'static str,
    symbol: &Symbol,
    cancel: &CancellationToken,
    timeout: Duration,
    fut: F,
) -> FetchOutcome<T>
where
    F: Future<Output = Result<T, FetchError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!("{} fetch for {} canceled", label, symbol);
            FetchOutcome::Canceled
        }
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(Ok(value)) => FetchOutcome::Ready(value),
            Ok(Err(e)) => {
                tracing::warn!("{} fetch for {} failed: {}", label, symbol, e);
                FetchOutcome::Failed(e)
            }
            Err(_) => {
                tracing::warn!("{} fetch for {} timed out after {:?}", label, symbol, timeout);
                FetchOutcome::Failed(FetchError::Timeout)
            }
        },
    }
}

/// Raw fan-in of every facet for one generation.
#[derive(Debug, Clone)]
pub struct FacetOutcomes {
    pub quote: FetchOutcome<Quote>,
    pub closes: FetchOutcome<Vec<f64>>,
    pub profile: FetchOutcome<CompanyProfile>,
    pub metrics: FetchOutcome<KeyMetrics>,
    pub recommendation: FetchOutcome<RecommendationTally>,
    pub news: FetchOutcome<Vec<NewsItem>>,
    pub dividends: FetchOutcome<Vec<Dividend>>,
    pub earnings: FetchOutcome<Option<EarningsEvent>>,
}

/// Facet results with cancellation ruled out. Only this reaches the aggregator.
#[derive(Debug, Clone)]
pub struct SettledFacets {
    pub quote: Result<Quote, FetchError>,
    pub closes: Result<Vec<f64>, FetchError>,
    pub profile: Result<CompanyProfile, FetchError>,
    pub metrics: Result<KeyMetrics, FetchError>,
    pub recommendation: Result<RecommendationTally, FetchError>,
    pub news: Result<Vec<NewsItem>, FetchError>,
    pub dividends: Result<Vec<Dividend>, FetchError>,
    pub earnings: Result<Option<EarningsEvent>, FetchError>,
}

impl FacetOutcomes {
    /// `None` if any facet was canceled: the whole generation is void.
    pub fn settle(self) -> Option<SettledFacets> {
        Some(SettledFacets {
            quote: self.quote.into_result()?,
            closes: self.closes.into_result()?,
            profile: self.profile.into_result()?,
            metrics: self.metrics.into_result()?,
            recommendation: self.recommendation.into_result()?,
            news: self.news.into_result()?,
            dividends: self.dividends.into_result()?,
            earnings: self.earnings.into_result()?,
        })
    }
}

/// One cancellable fetch per facet. Fetchers only return values; they never
/// touch coordinator state.
#[derive(Clone)]
pub struct SourceFetchers {
    market: Arc<dyn MarketDataProvider>,
    news: Arc<dyn NewsProvider>,
    consensus: Arc<dyn ConsensusProvider>,
    timeout: Duration,
    history_days: i64,
    news_lookback_days: i64,
    dividend_lookback_days: i64,
    earnings_horizon_days: i64,
}

impl SourceFetchers {
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        news: Arc<dyn NewsProvider>,
        consensus: Arc<dyn ConsensusProvider>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            market,
            news,
            consensus,
            timeout: config.fetch_timeout,
            history_days: config.history_days,
            news_lookback_days: config.news_lookback_days,
            dividend_lookback_days: config.dividend_lookback_days,
            earnings_horizon_days: config.earnings_horizon_days,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn quote(&self, symbol: &Symbol, cancel: &CancellationToken) -> FetchOutcome<Quote> {
        guarded("quote", symbol, cancel, self.timeout, self.market.quote(symbol)).await
    }

    pub async fn closes(&self, symbol: &Symbol, cancel: &CancellationToken) -> FetchOutcome<Vec<f64>> {
        let range = DateRange::last_days(self.history_days);
        guarded(
            "price_history",
            symbol,
            cancel,
            self.timeout,
            self.market.daily_closes(symbol, range),
        )
        .await
    }

    pub async fn profile(&self, symbol: &Symbol, cancel: &CancellationToken) -> FetchOutcome<CompanyProfile> {
        guarded("profile", symbol, cancel, self.timeout, self.market.profile(symbol)).await
    }

    pub async fn metrics(&self, symbol: &Symbol, cancel: &CancellationToken) -> FetchOutcome<KeyMetrics> {
        guarded("metrics", symbol, cancel, self.timeout, self.market.metrics(symbol)).await
    }

    pub async fn recommendation(
        &self,
        symbol: &Symbol,
        cancel: &CancellationToken,
    ) -> FetchOutcome<RecommendationTally> {
        guarded(
            "recommendation",
            symbol,
            cancel,
            self.timeout,
            self.consensus.recommendation(symbol),
        )
        .await
    }

    pub async fn news(&self, symbol: &Symbol, cancel: &CancellationToken) -> FetchOutcome<Vec<NewsItem>> {
        let range = DateRange::last_days(self.news_lookback_days);
        guarded(
            "news",
            symbol,
            cancel,
            self.timeout,
            self.news.company_news(symbol, range),
        )
        .await
    }

    pub async fn dividends(&self, symbol: &Symbol, cancel: &CancellationToken) -> FetchOutcome<Vec<Dividend>> {
        let range = DateRange::last_days(self.dividend_lookback_days);
        guarded(
            "dividends",
            symbol,
            cancel,
            self.timeout,
            self.market.dividends(symbol, range),
        )
        .await
    }

    pub async fn earnings(
        &self,
        symbol: &Symbol,
        cancel: &CancellationToken,
    ) -> FetchOutcome<Option<EarningsEvent>> {
        let range = DateRange::next_days(self.earnings_horizon_days);
        guarded(
            "earnings",
            symbol,
            cancel,
            self.timeout,
            self.market.next_earnings(symbol, range),
        )
        .await
    }

    /// Fan out every facet concurrently and wait for all of them to settle.
    /// One facet failing never aborts the others.
    pub async fn fetch_all(&self, symbol: &Symbol, cancel: &CancellationToken) -> FacetOutcomes {
        let (quote, closes, profile, metrics, recommendation, news, dividends, earnings) = tokio::join!(
            self.quote(symbol, cancel),
            self.closes(symbol, cancel),
            self.profile(symbol, cancel),
            self.metrics(symbol, cancel),
            self.recommendation(symbol, cancel),
            self.news(symbol, cancel),
            self.dividends(symbol, cancel),
            self.earnings(symbol, cancel),
        );

        FacetOutcomes {
            quote,
            closes,
            profile,
            metrics,
            recommendation,
            news,
            dividends,
            earnings,
        }
    }

    /// General market feed, raw (not yet deduplicated).
    pub async fn market_news(&self, cancel: &CancellationToken) -> FetchOutcome<Vec<NewsItem>> {
        let label = "market_news";
        tokio::select! {
            biased;
            _ = cancel.cancelled() => FetchOutcome::Canceled,
            result = tokio::time::timeout(self.timeout, self.news.market_news()) => match result {
                Ok(Ok(items)) => FetchOutcome::Ready(items),
                Ok(Err(e)) => {
                    tracing::warn!("{} fetch failed: {}", label, e);
                    FetchOutcome::Failed(e)
                }
                Err(_) => FetchOutcome::Failed(FetchError::Timeout),
            },
        }
    }
}
