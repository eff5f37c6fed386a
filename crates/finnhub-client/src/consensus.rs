use async_trait::async_trait;
use candl_core::{ConsensusProvider, FetchError, RecommendationTally, Symbol};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::map_reqwest_error;

/// Client for the consensus proxy (`POST /api/consensus`). The proxy holds
/// the upstream credential and answers with a zeroed tally plus a note when
/// it has none, so callers can always rely on the shape.
#[derive(Clone)]
pub struct ConsensusClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ConsensusRequest<'a> {
    symbol: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConsensusResponse {
    summary: Option<ConsensusSummary>,
    latest: Option<ConsensusLatest>,
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsensusSummary {
    #[serde(default)]
    strong_buy: u32,
    #[serde(default)]
    buy: u32,
    #[serde(default)]
    hold: u32,
    #[serde(default)]
    sell: u32,
    #[serde(default)]
    strong_sell: u32,
}

#[derive(Debug, Deserialize)]
struct ConsensusLatest {
    period: Option<String>,
}

impl ConsensusResponse {
    fn into_tally(self) -> RecommendationTally {
        match self.summary {
            Some(s) => RecommendationTally {
                strong_buy: s.strong_buy,
                buy: s.buy,
                hold: s.hold,
                sell: s.sell,
                strong_sell: s.strong_sell,
                period: self.latest.and_then(|l| l.period),
                note: self.note,
            },
            None => RecommendationTally::zeroed(
                self.note
                    .unwrap_or_else(|| "Consensus proxy returned no summary".to_string()),
            ),
        }
    }
}

impl ConsensusClient {
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
impl ConsensusProvider for ConsensusClient {
    async fn recommendation(&self, symbol: &Symbol) -> Result<RecommendationTally, FetchError> {
        let url = format!("{}/api/consensus", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&ConsensusRequest { symbol: symbol.as_str() })
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(FetchError::Provider {
                status: response.status().as_u16(),
            });
        }

        let body: ConsensusResponse = response.json().await.map_err(map_reqwest_error)?;
        Ok(body.into_tally())
    }
}
