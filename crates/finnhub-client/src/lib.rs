use async_trait::async_trait;
use candl_core::{
    CompanyProfile, ConsensusProvider, DateRange, Dividend, EarningsEvent, FetchError, KeyMetrics,
    MarketDataProvider, NewsItem, NewsProvider, Quote, RecommendationTally, SearchCandidate,
    Symbol, SymbolSearch,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub mod consensus;
pub mod sentiment;

pub use consensus::ConsensusClient;
pub use sentiment::SentimentClient;

const BASE_URL: &str = "https://finnhub.io/api/v1";

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            let oldest = match ts.front() {
                Some(&oldest) if ts.len() >= self.max_requests => oldest,
                _ => {
                    ts.push_back(now);
                    return;
                }
            };

            // Wait until the oldest request falls out of the window
            let sleep_dur = (oldest + self.window).duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("Rate limiter: waiting {:.1}s for Finnhub slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Map a transport error onto the fetch taxonomy.
pub(crate) fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_decode() {
        FetchError::Decode(e.to_string())
    } else if let Some(status) = e.status() {
        FetchError::Provider { status: status.as_u16() }
    } else {
        FetchError::Network(e.to_string())
    }
}

/// Finnhub REST client. Serves quotes, reference data, price history,
/// recommendation tallies, news and symbol search.
#[derive(Clone)]
pub struct FinnhubClient {
    api_key: String,
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl FinnhubClient {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        // Free tier allows 60 calls/min; paid plans can raise FINNHUB_RATE_LIMIT.
        let rate_limit: usize = std::env::var("FINNHUB_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
        }
    }

    /// Point the client at a different host (self-hosted proxy, test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, FetchError> {
        let request = builder.build().map_err(map_reqwest_error)?;

        for attempt in 0..3u32 {
            self.rate_limiter.acquire().await;
            let req_clone = request
                .try_clone()
                .ok_or_else(|| FetchError::Network("cannot clone request".to_string()))?;
            let response = self.client.execute(req_clone).await.map_err(map_reqwest_error)?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            let wait_secs = 5u64;
            tracing::warn!("Finnhub 429 rate limited, waiting {}s before retry {}/3", wait_secs, attempt + 1);
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(FetchError::Provider { status: 429 })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .send_request(
                self.client
                    .get(&url)
                    .query(query)
                    .query(&[("token", self.api_key.as_str())]),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Finnhub {} returned HTTP {}", path, status);
            return Err(FetchError::Provider { status: status.as_u16() });
        }

        response.json::<T>().await.map_err(map_reqwest_error)
    }
}

#[async_trait]
impl MarketDataProvider for FinnhubClient {
    async fn quote(&self, symbol: &Symbol) -> Result<Quote, FetchError> {
        let raw: RawQuote = self
            .get_json("/quote", &[("symbol", symbol.to_string())])
            .await?;
        raw.into_quote()
    }

    async fn profile(&self, symbol: &Symbol) -> Result<CompanyProfile, FetchError> {
        let raw: RawProfile = self
            .get_json("/stock/profile2", &[("symbol", symbol.to_string())])
            .await?;
        raw.into_profile()
    }

    async fn metrics(&self, symbol: &Symbol) -> Result<KeyMetrics, FetchError> {
        let raw: RawMetricResponse = self
            .get_json(
                "/stock/metric",
                &[("symbol", symbol.to_string()), ("metric", "all".to_string())],
            )
            .await?;
        Ok(raw.into_metrics())
    }

    async fn daily_closes(&self, symbol: &Symbol, range: DateRange) -> Result<Vec<f64>, FetchError> {
        let raw: RawCandles = self
            .get_json(
                "/stock/candle",
                &[
                    ("symbol", symbol.to_string()),
                    ("resolution", "D".to_string()),
                    ("from", unix_start(range.from).to_string()),
                    ("to", unix_end(range.to).to_string()),
                ],
            )
            .await?;
        Ok(raw.into_closes())
    }

    async fn dividends(&self, symbol: &Symbol, range: DateRange) -> Result<Vec<Dividend>, FetchError> {
        let raw: Vec<RawDividend> = self
            .get_json(
                "/stock/dividend",
                &[
                    ("symbol", symbol.to_string()),
                    ("from", range.from.to_string()),
                    ("to", range.to.to_string()),
                ],
            )
            .await?;
        Ok(raw.into_iter().filter_map(RawDividend::into_dividend).collect())
    }

    async fn next_earnings(
        &self,
        symbol: &Symbol,
        range: DateRange,
    ) -> Result<Option<EarningsEvent>, FetchError> {
        let raw: RawEarningsCalendar = self
            .get_json(
                "/calendar/earnings",
                &[
                    ("symbol", symbol.to_string()),
                    ("from", range.from.to_string()),
                    ("to", range.to.to_string()),
                ],
            )
            .await?;
        Ok(raw.next_event(range.from))
    }
}

#[async_trait]
impl NewsProvider for FinnhubClient {
    async fn company_news(&self, symbol: &Symbol, range: DateRange) -> Result<Vec<NewsItem>, FetchError> {
        let raw: Vec<RawNews> = self
            .get_json(
                "/company-news",
                &[
                    ("symbol", symbol.to_string()),
                    ("from", range.from.to_string()),
                    ("to", range.to.to_string()),
                ],
            )
            .await?;
        Ok(raw.into_iter().filter_map(RawNews::into_item).collect())
    }

    async fn market_news(&self) -> Result<Vec<NewsItem>, FetchError> {
        let raw: Vec<RawNews> = self
            .get_json("/news", &[("category", "general".to_string())])
            .await?;
        Ok(raw.into_iter().filter_map(RawNews::into_item).collect())
    }
}

#[async_trait]
impl ConsensusProvider for FinnhubClient {
    async fn recommendation(&self, symbol: &Symbol) -> Result<RecommendationTally, FetchError> {
        let raw: Vec<RawRecommendation> = self
            .get_json("/stock/recommendation", &[("symbol", symbol.to_string())])
            .await?;
        Ok(latest_tally(raw))
    }
}

#[async_trait]
impl SymbolSearch for FinnhubClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchCandidate>, FetchError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let raw: RawSearchResponse = self.get_json("/search", &[("q", query.to_string())]).await?;
        Ok(raw.result)
    }
}

fn unix_start(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

fn unix_end(date: NaiveDate) -> i64 {
    unix_start(date) + 86_399
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
}

/// Finnhub lists periods newest first; only the latest one is tallied.
fn latest_tally(mut raw: Vec<RawRecommendation>) -> RecommendationTally {
    raw.sort_by(|a, b| b.period.cmp(&a.period));
    match raw.into_iter().next() {
        Some(r) => RecommendationTally {
            strong_buy: r.strong_buy,
            buy: r.buy,
            hold: r.hold,
            sell: r.sell,
            strong_sell: r.strong_sell,
            period: r.period,
            note: None,
        },
        None => RecommendationTally::zeroed("No analyst recommendations on record"),
    }
}

// Response structures
#[derive(Debug, Deserialize)]
struct RawQuote {
    c: Option<f64>, // current
    d: Option<f64>, // change
    dp: Option<f64>, // change percent
    h: Option<f64>,
    l: Option<f64>,
    o: Option<f64>,
    pc: Option<f64>, // previous close
    t: Option<i64>,
}

impl RawQuote {
    /// Unknown tickers come back as an all-zero quote rather than a 404.
    fn into_quote(self) -> Result<Quote, FetchError> {
        let price = match self.c {
            Some(c) if c > 0.0 => c,
            _ => return Err(FetchError::Provider { status: 404 }),
        };
        let previous_close = self.pc.unwrap_or(0.0);
        let change_abs = self.d.unwrap_or(price - previous_close);
        let change_pct = self.dp.unwrap_or_else(|| {
            if previous_close > 0.0 {
                change_abs / previous_close * 100.0
            } else {
                0.0
            }
        });

        Ok(Quote {
            price,
            change_abs,
            change_pct,
            open: self.o.unwrap_or(0.0),
            high: self.h.unwrap_or(0.0),
            low: self.l.unwrap_or(0.0),
            previous_close,
            timestamp: self.t.filter(|t| *t > 0).and_then(|t| DateTime::from_timestamp(t, 0)),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    name: Option<String>,
    exchange: Option<String>,
    currency: Option<String>,
    country: Option<String>,
    #[serde(rename = "marketCapitalization")]
    market_capitalization: Option<f64>,
    ipo: Option<String>,
}

impl RawProfile {
    fn into_profile(self) -> Result<CompanyProfile, FetchError> {
        let name = match self.name {
            Some(n) if !n.trim().is_empty() => n,
            _ => return Err(FetchError::Provider { status: 404 }),
        };
        Ok(CompanyProfile {
            name,
            exchange: self.exchange,
            currency: self.currency,
            country: self.country,
            market_cap: self.market_capitalization,
            ipo: self.ipo.filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawMetricResponse {
    #[serde(default)]
    metric: HashMap<String, serde_json::Value>,
}

impl RawMetricResponse {
    fn into_metrics(self) -> KeyMetrics {
        let get = |key: &str| self.metric.get(key).and_then(|v| v.as_f64());
        KeyMetrics {
            week52_high: get("52WeekHigh"),
            week52_low: get("52WeekLow"),
            beta: get("beta"),
            pe_ratio: get("peTTM").or_else(|| get("peBasicExclExtraTTM")),
            dividend_yield: get("dividendYieldIndicatedAnnual"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCandles {
    #[serde(default)]
    c: Vec<f64>,
    s: String, // "ok" | "no_data"
}

impl RawCandles {
    fn into_closes(self) -> Vec<f64> {
        if self.s == "ok" {
            self.c
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDividend {
    date: Option<String>,
    amount: Option<f64>,
    #[serde(rename = "payDate")]
    pay_date: Option<String>,
    currency: Option<String>,
}

impl RawDividend {
    fn into_dividend(self) -> Option<Dividend> {
        Some(Dividend {
            ex_date: parse_date(self.date.as_deref())?,
            pay_date: parse_date(self.pay_date.as_deref()),
            amount: self.amount?,
            currency: self.currency,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEarningsCalendar {
    #[serde(rename = "earningsCalendar", default)]
    earnings_calendar: Vec<RawEarnings>,
}

#[derive(Debug, Deserialize)]
struct RawEarnings {
    date: Option<String>,
    hour: Option<String>,
    #[serde(rename = "epsEstimate")]
    eps_estimate: Option<f64>,
    #[serde(rename = "revenueEstimate")]
    revenue_estimate: Option<f64>,
}

impl RawEarningsCalendar {
    fn next_event(self, not_before: NaiveDate) -> Option<EarningsEvent> {
        self.earnings_calendar
            .into_iter()
            .filter_map(|e| {
                let date = parse_date(e.date.as_deref())?;
                Some(EarningsEvent {
                    date,
                    hour: e.hour.filter(|h| !h.is_empty()),
                    eps_estimate: e.eps_estimate,
                    revenue_estimate: e.revenue_estimate,
                })
            })
            .filter(|e| e.date >= not_before)
            .min_by_key(|e| e.date)
    }
}

#[derive(Debug, Deserialize)]
struct RawNews {
    #[serde(default)]
    headline: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    datetime: i64,
}

impl RawNews {
    fn into_item(self) -> Option<NewsItem> {
        if self.headline.trim().is_empty() {
            return None;
        }
        Some(NewsItem {
            headline: self.headline,
            source: self.source,
            url: self.url,
            timestamp: DateTime::from_timestamp(self.datetime, 0).unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawRecommendation {
    #[serde(rename = "strongBuy", default)]
    strong_buy: u32,
    #[serde(default)]
    buy: u32,
    #[serde(default)]
    hold: u32,
    #[serde(default)]
    sell: u32,
    #[serde(rename = "strongSell", default)]
    strong_sell: u32,
    period: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    #[serde(default)]
    result: Vec<SearchCandidate>,
}
