use candl_core::stats::{daily_returns, round_to, std_dev};
use candl_core::{
    AnalysisError, ConsensusLabel, Facet, RecommendationTally, Snapshot, Symbol,
};
use chrono::{DateTime, Utc};

use crate::dedupe::dedupe;
use crate::fetchers::SettledFacets;

/// Sample standard deviation of day-over-day % returns, rounded to 2 decimals.
/// `None` unless at least one valid return exists (two consecutive positive closes).
pub fn risk_meter(closes: &[f64]) -> Option<f64> {
    let returns = daily_returns(closes);
    if returns.is_empty() {
        return None;
    }
    Some(round_to(std_dev(&returns) * 100.0, 2))
}

/// Symmetric majority rule: a side wins only if it outnumbers the other side
/// plus holds. All ties resolve to Hold.
pub fn consensus_label(tally: &RecommendationTally) -> ConsensusLabel {
    let bull = u64::from(tally.strong_buy) + u64::from(tally.buy);
    let bear = u64::from(tally.sell) + u64::from(tally.strong_sell);
    let hold = u64::from(tally.hold);

    if bull > bear + hold {
        if tally.strong_buy > 0 {
            ConsensusLabel::StrongBuy
        } else {
            ConsensusLabel::Buy
        }
    } else if bear > bull + hold {
        if tally.strong_sell > 0 {
            ConsensusLabel::StrongSell
        } else {
            ConsensusLabel::Sell
        }
    } else {
        ConsensusLabel::Hold
    }
}

/// Folds settled facet results into one snapshot for one generation.
#[derive(Debug, Clone)]
pub struct Aggregator {
    news_limit: usize,
}

impl Aggregator {
    pub fn new(news_limit: usize) -> Self {
        Self { news_limit }
    }

    /// Fails only when the quote failed. Secondary failures leave their
    /// field absent and are listed in `missing`.
    pub fn build(
        &self,
        symbol: &Symbol,
        generation: u64,
        facets: SettledFacets,
        now: DateTime<Utc>,
    ) -> Result<Snapshot, AnalysisError> {
        let quote = facets.quote.map_err(|source| AnalysisError::AggregateFailure {
            symbol: symbol.clone(),
            source,
        })?;

        let mut missing = Vec::new();

        let (risk_meter, close_history_len) = match facets.closes {
            Ok(closes) => (risk_meter(&closes), closes.len()),
            Err(_) => {
                missing.push(Facet::PriceHistory);
                (None, 0)
            }
        };

        let profile = facets.profile.ok();
        if profile.is_none() {
            missing.push(Facet::Profile);
        }

        let metrics = facets.metrics.ok();
        if metrics.is_none() {
            missing.push(Facet::Metrics);
        }

        let recommendation = match facets.recommendation {
            Ok(tally) => tally,
            Err(e) => {
                missing.push(Facet::Recommendation);
                RecommendationTally::zeroed(format!("Recommendation data unavailable: {}", e))
            }
        };
        let consensus = consensus_label(&recommendation);

        let news = match facets.news {
            Ok(items) => {
                let mut items = dedupe(items);
                items.truncate(self.news_limit);
                Some(items)
            }
            Err(_) => {
                missing.push(Facet::News);
                None
            }
        };

        let dividends = facets.dividends.ok();
        if dividends.is_none() {
            missing.push(Facet::Dividends);
        }

        let earnings = match facets.earnings {
            Ok(event) => event,
            Err(_) => {
                missing.push(Facet::Earnings);
                None
            }
        };

        Ok(Snapshot {
            symbol: symbol.clone(),
            generation,
            quote,
            profile,
            metrics,
            recommendation,
            consensus,
            news,
            dividends,
            earnings,
            risk_meter,
            close_history_len,
            sentiment: None,
            missing,
            last_updated: now,
        })
    }
}
