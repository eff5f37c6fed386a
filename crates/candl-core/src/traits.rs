use async_trait::async_trait;

use crate::{
    CompanyProfile, DateRange, Dividend, EarningsEvent, FetchError, KeyMetrics, NewsItem, Quote,
    RecommendationTally, SearchCandidate, SentimentReport, Symbol,
};

/// Market-data collaborator: quotes, reference data and price history
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn quote(&self, symbol: &Symbol) -> Result<Quote, FetchError>;

    async fn profile(&self, symbol: &Symbol) -> Result<CompanyProfile, FetchError>;

    async fn metrics(&self, symbol: &Symbol) -> Result<KeyMetrics, FetchError>;

    /// Daily closes, oldest first
    async fn daily_closes(&self, symbol: &Symbol, range: DateRange) -> Result<Vec<f64>, FetchError>;

    async fn dividends(&self, symbol: &Symbol, range: DateRange) -> Result<Vec<Dividend>, FetchError>;

    /// Earliest scheduled earnings release inside `range`, if any
    async fn next_earnings(
        &self,
        symbol: &Symbol,
        range: DateRange,
    ) -> Result<Option<EarningsEvent>, FetchError>;
}

/// News collaborator
#[async_trait]
pub trait NewsProvider: Send + Sync {
    async fn company_news(&self, symbol: &Symbol, range: DateRange) -> Result<Vec<NewsItem>, FetchError>;

    /// General market feed
    async fn market_news(&self) -> Result<Vec<NewsItem>, FetchError>;
}

/// Recommendation tally source. Implementations return a zeroed tally with a
/// note instead of an error when no data exists.
#[async_trait]
pub trait ConsensusProvider: Send + Sync {
    async fn recommendation(&self, symbol: &Symbol) -> Result<RecommendationTally, FetchError>;
}

/// Free-text symbol lookup backing autocomplete
#[async_trait]
pub trait SymbolSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchCandidate>, FetchError>;
}

/// Headline polarity scoring collaborator
#[async_trait]
pub trait SentimentScorer: Send + Sync {
    async fn score(&self, texts: &[String]) -> Result<SentimentReport, FetchError>;
}
