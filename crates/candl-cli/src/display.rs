use std::fmt::Write;

use candl_core::{NewsItem, Snapshot};
use candl_orchestrator::{CoordinatorEvent, Suggestions};

const HEADLINES_SHOWN: usize = 5;

fn opt_num(value: Option<f64>, places: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", places, v),
        None => "-".to_string(),
    }
}

/// Multi-line summary of a snapshot.
pub fn render_snapshot(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let q = &snapshot.quote;

    let name = snapshot
        .profile
        .as_ref()
        .map(|p| p.name.as_str())
        .unwrap_or("");
    let _ = writeln!(out, "{} {}", snapshot.symbol, name);
    let _ = writeln!(
        out,
        "  price {:.2}  {:+.2} ({:+.2}%)  open {:.2}  high {:.2}  low {:.2}  prev {:.2}",
        q.price, q.change_abs, q.change_pct, q.open, q.high, q.low, q.previous_close
    );

    if let Some(p) = &snapshot.profile {
        let _ = writeln!(
            out,
            "  {} · {} · {} · mkt cap {}M",
            p.exchange.as_deref().unwrap_or("-"),
            p.currency.as_deref().unwrap_or("-"),
            p.country.as_deref().unwrap_or("-"),
            opt_num(p.market_cap, 0)
        );
    }

    if let Some(m) = &snapshot.metrics {
        let _ = writeln!(
            out,
            "  52w {} - {}  beta {}  P/E {}  yield {}%",
            opt_num(m.week52_low, 2),
            opt_num(m.week52_high, 2),
            opt_num(m.beta, 2),
            opt_num(m.pe_ratio, 1),
            opt_num(m.dividend_yield, 2)
        );
    }

    let r = &snapshot.recommendation;
    let _ = write!(
        out,
        "  consensus {}  (SB {} B {} H {} S {} SS {})",
        snapshot.consensus, r.strong_buy, r.buy, r.hold, r.sell, r.strong_sell
    );
    if let Some(note) = &r.note {
        let _ = write!(out, "  [{}]", note);
    }
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "  risk meter {}  ({} closes)",
        snapshot
            .risk_meter
            .map(|v| format!("{:.2}%", v))
            .unwrap_or_else(|| "-".to_string()),
        snapshot.close_history_len
    );

    if let Some(e) = &snapshot.earnings {
        let _ = writeln!(
            out,
            "  next earnings {} {}  EPS est {}",
            e.date,
            e.hour.as_deref().unwrap_or(""),
            opt_num(e.eps_estimate, 2)
        );
    }

    if let Some(divs) = &snapshot.dividends {
        if let Some(last) = divs.first() {
            let _ = writeln!(out, "  last dividend {:.4} (ex {})", last.amount, last.ex_date);
        }
    }

    if let Some(s) = &snapshot.sentiment {
        let _ = writeln!(
            out,
            "  headline sentiment +{} ={} -{}",
            s.summary.positive, s.summary.neutral, s.summary.negative
        );
    }

    if let Some(news) = &snapshot.news {
        for item in news.iter().take(HEADLINES_SHOWN) {
            let _ = writeln!(out, "  • {}", render_headline(item));
        }
    }

    if snapshot.is_partial() {
        let missing: Vec<_> = snapshot.missing.iter().map(|f| f.as_str()).collect();
        let _ = writeln!(out, "  (unavailable: {})", missing.join(", "));
    }
    let _ = write!(out, "  updated {}", snapshot.last_updated.format("%H:%M:%S UTC"));

    out
}

pub fn render_headline(item: &NewsItem) -> String {
    format!("{} ({}, {})", item.headline, item.source, item.timestamp.format("%b %d %H:%M"))
}

pub fn render_suggestions(suggestions: &Suggestions) -> String {
    if suggestions.candidates.is_empty() {
        return format!("no matches for '{}'", suggestions.query);
    }
    suggestions
        .candidates
        .iter()
        .map(|c| format!("  {:<10} {} [{}]", c.symbol, c.description, c.kind))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line (or block) per coordinator event. `None` for events not worth printing.
pub fn render_event(event: &CoordinatorEvent) -> Option<String> {
    match event {
        CoordinatorEvent::Started { .. } => None,
        CoordinatorEvent::Restored { snapshot, stored_at } => Some(format!(
            "(cached {})\n{}",
            stored_at.format("%Y-%m-%d %H:%M"),
            render_snapshot(snapshot)
        )),
        CoordinatorEvent::Committed { snapshot } => Some(render_snapshot(snapshot)),
        CoordinatorEvent::Failed { error, .. } => Some(format!("! {}", error)),
        CoordinatorEvent::RetryScheduled { symbol, attempt, delay } => Some(format!(
            "  retrying {} in {:.1}s (attempt {})",
            symbol,
            delay.as_secs_f64(),
            attempt
        )),
        CoordinatorEvent::RetryExhausted { symbol, attempts } => Some(format!(
            "  giving up on {} after {} retries; run 'analyze {}' to try again",
            symbol, attempts, symbol
        )),
        CoordinatorEvent::Cleared => Some("cleared".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candl_core::{ConsensusLabel, Facet, Quote, RecommendationTally, Symbol};
    use chrono::{TimeZone, Utc};

    fn snapshot() -> Snapshot {
        Snapshot {
            symbol: Symbol::parse("AAPL").unwrap(),
            generation: 4,
            quote: Quote {
                price: 189.5,
                change_abs: -1.25,
                change_pct: -0.66,
                open: 190.0,
                high: 191.2,
                low: 188.7,
                previous_close: 190.75,
                timestamp: None,
            },
            profile: None,
            metrics: None,
            recommendation: RecommendationTally::zeroed("no analyst coverage"),
            consensus: ConsensusLabel::Hold,
            news: None,
            dividends: None,
            earnings: None,
            risk_meter: Some(1.42),
            close_history_len: 62,
            sentiment: None,
            missing: vec![Facet::Profile, Facet::Metrics],
            last_updated: Utc.with_ymd_and_hms(2024, 5, 2, 14, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_render_partial_snapshot() {
        let text = render_snapshot(&snapshot());
        assert!(text.starts_with("AAPL"));
        assert!(text.contains("price 189.50  -1.25 (-0.66%)"));
        assert!(text.contains("consensus Hold"));
        assert!(text.contains("[no analyst coverage]"));
        assert!(text.contains("risk meter 1.42%  (62 closes)"));
        assert!(text.contains("(unavailable: profile, metrics)"));
        assert!(text.ends_with("updated 14:30:00 UTC"));
    }

    #[test]
    fn test_started_event_is_silent() {
        let event = CoordinatorEvent::Started {
            symbol: Symbol::parse("AAPL").unwrap(),
            generation: 1,
            trigger: candl_orchestrator::Trigger::Manual,
        };
        assert!(render_event(&event).is_none());
        assert_eq!(render_event(&CoordinatorEvent::Cleared).as_deref(), Some("cleared"));
    }
}
