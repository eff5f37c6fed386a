use async_trait::async_trait;
use candl_core::stats::round_to;
use candl_core::{FetchError, SentimentReport, SentimentScorer, SentimentSummary, TextPolarity};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::map_reqwest_error;

/// Compound score at or above which a text counts as positive (and at or
/// below the negation of which it counts as negative).
const POLARITY_THRESHOLD: f64 = 0.05;

/// Client for the sentiment-scoring collaborator (`POST /api/sentiment`).
#[derive(Clone)]
pub struct SentimentClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct SentimentRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SentimentResponse {
    #[serde(default)]
    results: Vec<ScoredText>,
}

#[derive(Debug, Deserialize)]
struct ScoredText {
    #[serde(default)]
    text: String,
    scores: PolarityScores,
}

#[derive(Debug, Deserialize)]
struct PolarityScores {
    compound: f64,
}

/// Bucket compound scores into positive/neutral/negative counts and shares.
pub fn summarize(results: &[TextPolarity]) -> SentimentSummary {
    let (mut pos, mut neu, mut neg) = (0u32, 0u32, 0u32);
    for r in results {
        if r.compound >= POLARITY_THRESHOLD {
            pos += 1;
        } else if r.compound <= -POLARITY_THRESHOLD {
            neg += 1;
        } else {
            neu += 1;
        }
    }
    let total = (pos + neu + neg).max(1) as f64;
    SentimentSummary {
        positive: pos,
        neutral: neu,
        negative: neg,
        positive_pct: round_to(pos as f64 / total, 3),
        neutral_pct: round_to(neu as f64 / total, 3),
        negative_pct: round_to(neg as f64 / total, 3),
    }
}

impl SentimentClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl SentimentScorer for SentimentClient {
    async fn score(&self, texts: &[String]) -> Result<SentimentReport, FetchError> {
        if texts.is_empty() {
            return Ok(SentimentReport::default());
        }

        let url = format!("{}/api/sentiment", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SentimentRequest { texts })
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(FetchError::Provider {
                status: response.status().as_u16(),
            });
        }

        let body: SentimentResponse = response.json().await.map_err(map_reqwest_error)?;
        let results: Vec<TextPolarity> = body
            .results
            .into_iter()
            .map(|r| TextPolarity {
                text: r.text,
                compound: r.scores.compound,
            })
            .collect();

        // Recount locally so the summary always agrees with the per-text scores.
        let summary = summarize(&results);
        Ok(SentimentReport { results, summary })
    }
}
