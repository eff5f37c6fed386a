//! In-process fakes for the provider traits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use candl_core::{
    CompanyProfile, ConsensusLabel, ConsensusProvider, DateRange, Dividend, EarningsEvent,
    FetchError, KeyMetrics, MarketDataProvider, NewsItem, NewsProvider, Quote, RecommendationTally,
    SearchCandidate, SentimentReport, SentimentScorer, SentimentSummary, Snapshot, Symbol,
    SymbolSearch, TextPolarity,
};
use chrono::{TimeZone, Utc};

use crate::config::OrchestratorConfig;
use crate::coordinator::{Collaborators, RequestCoordinator};
use crate::retry::RetryPolicy;
use crate::store::LocalStore;

pub fn sample_quote(price: f64) -> Quote {
    Quote {
        price,
        change_abs: 1.5,
        change_pct: 0.8,
        open: price - 1.0,
        high: price + 2.0,
        low: price - 2.0,
        previous_close: price - 1.5,
        timestamp: None,
    }
}

pub fn news_item(headline: &str) -> NewsItem {
    NewsItem {
        headline: headline.to_string(),
        source: "Reuters".to_string(),
        url: format!("https://news.example.com/{}", headline.trim().replace(' ', "-")),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 2, 14, 30, 0).unwrap(),
    }
}

pub fn sample_snapshot(symbol: &str, generation: u64, price: f64) -> Snapshot {
    Snapshot {
        symbol: Symbol::parse(symbol).unwrap(),
        generation,
        quote: sample_quote(price),
        profile: None,
        metrics: None,
        recommendation: RecommendationTally::zeroed("no data"),
        consensus: ConsensusLabel::Hold,
        news: Some(vec![news_item("Cached headline")]),
        dividends: None,
        earnings: None,
        risk_meter: Some(1.25),
        close_history_len: 2,
        sentiment: None,
        missing: Vec::new(),
        last_updated: Utc::now(),
    }
}

/// Market data with a scripted quote queue. Once the script runs out every
/// call returns `fallback` after `quote_delay`.
pub struct FakeMarket {
    script: Mutex<VecDeque<(Duration, Result<Quote, FetchError>)>>,
    fallback: Result<Quote, FetchError>,
    quote_delay: Duration,
    fail_secondary: bool,
    pub quote_calls: AtomicUsize,
}

impl FakeMarket {
    pub fn new(price: f64) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(sample_quote(price)),
            quote_delay: Duration::ZERO,
            fail_secondary: false,
            quote_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: FetchError) -> Self {
        Self {
            fallback: Err(error),
            ..Self::new(0.0)
        }
    }

    pub fn then_quote(self, delay: Duration, result: Result<Quote, FetchError>) -> Self {
        self.script.lock().unwrap().push_back((delay, result));
        self
    }

    pub fn with_quote_delay(mut self, delay: Duration) -> Self {
        self.quote_delay = delay;
        self
    }

    /// Profile, metrics and dividends fail with HTTP 500.
    pub fn with_failing_secondary(mut self) -> Self {
        self.fail_secondary = true;
        self
    }

    fn secondary<T>(&self, value: T) -> Result<T, FetchError> {
        if self.fail_secondary {
            Err(FetchError::Provider { status: 500 })
        } else {
            Ok(value)
        }
    }
}

#[async_trait]
impl MarketDataProvider for FakeMarket {
    async fn quote(&self, _symbol: &Symbol) -> Result<Quote, FetchError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        let (delay, result) = scripted.unwrap_or_else(|| (self.quote_delay, self.fallback.clone()));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn profile(&self, symbol: &Symbol) -> Result<CompanyProfile, FetchError> {
        self.secondary(CompanyProfile {
            name: format!("{} Inc", symbol),
            exchange: Some("NASDAQ".to_string()),
            currency: Some("USD".to_string()),
            country: Some("US".to_string()),
            market_cap: Some(2_900_000.0),
            ipo: None,
        })
    }

    async fn metrics(&self, _symbol: &Symbol) -> Result<KeyMetrics, FetchError> {
        self.secondary(KeyMetrics {
            week52_high: Some(199.6),
            week52_low: Some(164.1),
            beta: Some(1.29),
            pe_ratio: Some(29.4),
            dividend_yield: Some(0.5),
        })
    }

    async fn daily_closes(&self, _symbol: &Symbol, _range: DateRange) -> Result<Vec<f64>, FetchError> {
        Ok(vec![100.0, 110.0, 99.0, 105.0])
    }

    async fn dividends(&self, _symbol: &Symbol, _range: DateRange) -> Result<Vec<Dividend>, FetchError> {
        self.secondary(Vec::new())
    }

    async fn next_earnings(
        &self,
        _symbol: &Symbol,
        _range: DateRange,
    ) -> Result<Option<EarningsEvent>, FetchError> {
        Ok(None)
    }
}

/// Company feed: 4 items, one near-duplicate. Market feed: 14 items, two duplicates.
pub struct FakeNews {
    pub company: Vec<NewsItem>,
    pub market: Vec<NewsItem>,
}

impl Default for FakeNews {
    fn default() -> Self {
        let company = vec![
            news_item("Apple Beats Estimates"),
            news_item("  apple   beats estimates "),
            news_item("Supply chain update"),
            news_item("New product launch"),
        ];
        let mut market: Vec<NewsItem> = (1..=12)
            .map(|i| news_item(&format!("Market story {}", i)))
            .collect();
        market.insert(1, news_item("MARKET STORY 1"));
        market.push(news_item("market  story 5"));
        Self { company, market }
    }
}

#[async_trait]
impl NewsProvider for FakeNews {
    async fn company_news(&self, _symbol: &Symbol, _range: DateRange) -> Result<Vec<NewsItem>, FetchError> {
        Ok(self.company.clone())
    }

    async fn market_news(&self) -> Result<Vec<NewsItem>, FetchError> {
        Ok(self.market.clone())
    }
}

#[derive(Default)]
pub struct FakeConsensus;

#[async_trait]
impl ConsensusProvider for FakeConsensus {
    async fn recommendation(&self, _symbol: &Symbol) -> Result<RecommendationTally, FetchError> {
        Ok(RecommendationTally {
            strong_buy: 5,
            buy: 2,
            hold: 1,
            sell: 0,
            strong_sell: 0,
            period: Some("2024-05-01".to_string()),
            note: None,
        })
    }
}

/// Records every query it receives.
#[derive(Default)]
pub struct FakeSearch {
    queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SymbolSearch for FakeSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchCandidate>, FetchError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(vec![SearchCandidate {
            symbol: query.to_uppercase(),
            description: format!("{} Corp", query),
            kind: "Common Stock".to_string(),
        }])
    }
}

/// Scores every text as mildly positive.
pub struct FakeSentiment;

#[async_trait]
impl SentimentScorer for FakeSentiment {
    async fn score(&self, texts: &[String]) -> Result<SentimentReport, FetchError> {
        let results: Vec<TextPolarity> = texts
            .iter()
            .map(|t| TextPolarity {
                text: t.clone(),
                compound: 0.5,
            })
            .collect();
        Ok(SentimentReport {
            summary: SentimentSummary {
                positive: results.len() as u32,
                positive_pct: 1.0,
                ..SentimentSummary::default()
            },
            results,
        })
    }
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        consensus_api_url: None,
        database_url: "sqlite::memory:".to_string(),
        refresh_interval: Duration::from_secs(30),
        retry: RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: 3,
        },
        fetch_timeout: Duration::from_secs(5),
        ..OrchestratorConfig::default()
    }
}

pub async fn coordinator(market: Arc<FakeMarket>) -> RequestCoordinator {
    coordinator_with(market, None, None).await
}

pub async fn coordinator_with(
    market: Arc<FakeMarket>,
    store: Option<LocalStore>,
    sentiment: Option<Arc<dyn SentimentScorer>>,
) -> RequestCoordinator {
    let collaborators = Collaborators {
        market,
        news: Arc::new(FakeNews::default()),
        consensus: Arc::new(FakeConsensus),
        sentiment,
    };
    RequestCoordinator::new(test_config(), collaborators, store).await
}
