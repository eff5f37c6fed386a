use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::retry::RetryPolicy;

const DEFAULT_CONSENSUS_API_URL: &str = "https://candl-api.vercel.app";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    // Collaborators
    pub finnhub_api_key: Option<String>,
    pub consensus_api_url: Option<String>, // None = ask Finnhub directly
    pub sentiment_api_url: Option<String>, // None = no headline scoring

    // Storage
    pub database_url: String,

    // Timers
    pub auto_refresh: bool,
    pub refresh_interval: Duration,  // 30s
    pub retry: RetryPolicy,          // 2s doubling to 30s, 3 attempts
    pub suggest_debounce: Duration,  // 160ms
    pub fetch_timeout: Duration,     // 12s per facet

    // Fetch windows
    pub history_days: i64,           // 90
    pub news_lookback_days: i64,     // 7
    pub dividend_lookback_days: i64, // 365
    pub earnings_horizon_days: i64,  // 90

    // Output limits
    pub news_limit: usize,           // 14
    pub market_news_limit: usize,    // 10
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            finnhub_api_key: None,
            consensus_api_url: Some(DEFAULT_CONSENSUS_API_URL.to_string()),
            sentiment_api_url: None,
            database_url: default_database_url(),
            auto_refresh: true,
            refresh_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            suggest_debounce: Duration::from_millis(160),
            fetch_timeout: Duration::from_secs(12),
            history_days: 90,
            news_lookback_days: 7,
            dividend_lookback_days: 365,
            earnings_horizon_days: 90,
            news_limit: 14,
            market_news_limit: 10,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            finnhub_api_key: non_empty(env::var("FINNHUB_API_KEY").ok()),
            consensus_api_url: match env::var("CONSENSUS_API_URL") {
                Ok(url) => non_empty(Some(url)),
                Err(_) => defaults.consensus_api_url,
            },
            sentiment_api_url: non_empty(env::var("SENTIMENT_API_URL").ok()),

            database_url: env::var("CANDL_DATABASE_URL").unwrap_or(defaults.database_url),

            auto_refresh: env::var("AUTO_REFRESH")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "off"))
                .unwrap_or(true),
            refresh_interval: Duration::from_secs(
                env::var("REFRESH_INTERVAL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse::<u64>()
                    .context("REFRESH_INTERVAL_SECS must be a whole number of seconds")?
                    .max(1),
            ),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(
                    env::var("RETRY_BASE_DELAY_MS")
                        .unwrap_or_else(|_| "2000".to_string())
                        .parse()
                        .context("RETRY_BASE_DELAY_MS must be milliseconds")?,
                ),
                max_delay: Duration::from_millis(
                    env::var("RETRY_MAX_DELAY_MS")
                        .unwrap_or_else(|_| "30000".to_string())
                        .parse()
                        .context("RETRY_MAX_DELAY_MS must be milliseconds")?,
                ),
                max_attempts: env::var("RETRY_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .context("RETRY_MAX_ATTEMPTS must be a whole number")?,
            },
            suggest_debounce: Duration::from_millis(
                env::var("SUGGEST_DEBOUNCE_MS")
                    .unwrap_or_else(|_| "160".to_string())
                    .parse()
                    .context("SUGGEST_DEBOUNCE_MS must be milliseconds")?,
            ),
            fetch_timeout: Duration::from_secs(
                env::var("FETCH_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "12".to_string())
                    .parse::<u64>()
                    .context("FETCH_TIMEOUT_SECS must be a whole number of seconds")?
                    .max(1),
            ),

            history_days: env::var("HISTORY_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .context("HISTORY_DAYS must be a whole number")?,
            news_lookback_days: env::var("NEWS_LOOKBACK_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .context("NEWS_LOOKBACK_DAYS must be a whole number")?,
            dividend_lookback_days: defaults.dividend_lookback_days,
            earnings_horizon_days: defaults.earnings_horizon_days,

            news_limit: env::var("NEWS_LIMIT")
                .unwrap_or_else(|_| "14".to_string())
                .parse()
                .context("NEWS_LIMIT must be a whole number")?,
            market_news_limit: env::var("MARKET_NEWS_LIMIT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("MARKET_NEWS_LIMIT must be a whole number")?,
        };

        if config.retry.max_delay < config.retry.base_delay {
            anyhow::bail!(
                "RETRY_MAX_DELAY_MS ({}ms) is below RETRY_BASE_DELAY_MS ({}ms)",
                config.retry.max_delay.as_millis(),
                config.retry.base_delay.as_millis()
            );
        }

        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// `sqlite:<local data dir>/candl/candl.db`, falling back to the working directory.
pub fn default_database_url() -> String {
    match dirs::data_local_dir() {
        Some(dir) => format!("sqlite:{}", dir.join("candl").join("candl.db").display()),
        None => "sqlite:candl.db".to_string(),
    }
}
