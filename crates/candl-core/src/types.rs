use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::AnalysisError;

const MAX_SYMBOL_LEN: usize = 24;

/// Normalized ticker (trimmed, uppercased). Identity key for all per-symbol state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Normalize raw user input. Empty input and characters no provider
    /// accepts are rejected before any request is built.
    pub fn parse(raw: &str) -> Result<Self, AnalysisError> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(AnalysisError::Validation("symbol is empty".to_string()));
        }
        if normalized.len() > MAX_SYMBOL_LEN {
            return Err(AnalysisError::Validation(format!(
                "symbol longer than {} characters",
                MAX_SYMBOL_LEN
            )));
        }
        if let Some(c) = normalized
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '^' | '=')))
        {
            return Err(AnalysisError::Validation(format!(
                "unsupported character {:?} in {}",
                c, normalized
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Symbol::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = AnalysisError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Inclusive calendar range used for history, news and event lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// The `days` calendar days ending today (UTC).
    pub fn last_days(days: i64) -> Self {
        let to = Utc::now().date_naive();
        Self {
            from: to - Duration::days(days),
            to,
        }
    }

    /// The `days` calendar days starting today (UTC).
    pub fn next_days(days: i64) -> Self {
        let from = Utc::now().date_naive();
        Self {
            from,
            to: from + Duration::days(days),
        }
    }
}

/// Point quote for the current session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub change_abs: f64,
    pub change_pct: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Company profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: String,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub country: Option<String>,
    /// Market capitalization in millions of `currency`
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub ipo: Option<String>,
}

/// Headline valuation/volatility metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMetrics {
    pub week52_high: Option<f64>,
    pub week52_low: Option<f64>,
    pub beta: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub dividend_yield: Option<f64>,
}

/// Analyst recommendation counts for one period
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationTally {
    pub strong_buy: u32,
    pub buy: u32,
    pub hold: u32,
    pub sell: u32,
    pub strong_sell: u32,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl RecommendationTally {
    /// Well-formed empty tally used whenever no recommendation data exists.
    pub fn zeroed(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Self::default()
        }
    }

    /// Widened so malformed upstream counts cannot overflow.
    pub fn total(&self) -> u64 {
        [self.strong_buy, self.buy, self.hold, self.sell, self.strong_sell]
            .iter()
            .map(|&n| u64::from(n))
            .sum()
    }
}

/// Consensus label derived from a recommendation tally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusLabel {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl ConsensusLabel {
    pub fn to_label(&self) -> &'static str {
        match self {
            ConsensusLabel::StrongBuy => "Strong Buy",
            ConsensusLabel::Buy => "Buy",
            ConsensusLabel::Hold => "Hold",
            ConsensusLabel::Sell => "Sell",
            ConsensusLabel::StrongSell => "Strong Sell",
        }
    }
}

impl fmt::Display for ConsensusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_label())
    }
}

/// News headline. Identity is the normalized headline text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub headline: String,
    pub source: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

/// Dividend record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dividend {
    pub ex_date: NaiveDate,
    #[serde(default)]
    pub pay_date: Option<NaiveDate>,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Next scheduled earnings release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsEvent {
    pub date: NaiveDate,
    #[serde(default)]
    pub hour: Option<String>,
    #[serde(default)]
    pub eps_estimate: Option<f64>,
    #[serde(default)]
    pub revenue_estimate: Option<f64>,
}

/// Autocomplete candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub symbol: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Polarity of one scored text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPolarity {
    pub text: String,
    /// -1.0 (negative) to 1.0 (positive)
    pub compound: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentSummary {
    pub positive: u32,
    pub neutral: u32,
    pub negative: u32,
    pub positive_pct: f64,
    pub neutral_pct: f64,
    pub negative_pct: f64,
}

/// Output of the sentiment-scoring collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentReport {
    pub results: Vec<TextPolarity>,
    pub summary: SentimentSummary,
}

/// Data facets fetched for one analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Quote,
    PriceHistory,
    Profile,
    Metrics,
    Recommendation,
    News,
    Dividends,
    Earnings,
}

impl Facet {
    pub const ALL: [Facet; 8] = [
        Facet::Quote,
        Facet::PriceHistory,
        Facet::Profile,
        Facet::Metrics,
        Facet::Recommendation,
        Facet::News,
        Facet::Dividends,
        Facet::Earnings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Facet::Quote => "quote",
            Facet::PriceHistory => "price_history",
            Facet::Profile => "profile",
            Facet::Metrics => "metrics",
            Facet::Recommendation => "recommendation",
            Facet::News => "news",
            Facet::Dividends => "dividends",
            Facet::Earnings => "earnings",
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated point-in-time view of one symbol, built for exactly one
/// generation. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: Symbol,
    pub generation: u64,
    pub quote: Quote,
    pub profile: Option<CompanyProfile>,
    pub metrics: Option<KeyMetrics>,
    pub recommendation: RecommendationTally,
    pub consensus: ConsensusLabel,
    pub news: Option<Vec<NewsItem>>,
    pub dividends: Option<Vec<Dividend>>,
    pub earnings: Option<EarningsEvent>,
    /// Sample std-dev of daily % returns, 2 decimals
    pub risk_meter: Option<f64>,
    #[serde(default)]
    pub close_history_len: usize,
    #[serde(default)]
    pub sentiment: Option<SentimentReport>,
    /// Secondary facets whose fetch failed
    #[serde(default)]
    pub missing: Vec<Facet>,
    pub last_updated: DateTime<Utc>,
}

impl Snapshot {
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }
}
