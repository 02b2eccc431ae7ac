//! HTTP client for the remote combination optimizer.

use renderflow_core::combination::Combination;
use renderflow_core::ranking::{CombinationRanker, RankedCombination, RankingError, ScoreSource};
use serde::{Deserialize, Serialize};

/// Scores combinations through `POST {base_url}/rank`.
pub struct HttpCombinationRanker {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct RankRequest<'a> {
    combinations: &'a [Combination],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RankResponse {
    scores: Vec<ScoreEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreEntry {
    combination_id: String,
    score: f64,
}

impl HttpCombinationRanker {
    pub fn new(base_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl CombinationRanker for HttpCombinationRanker {
    async fn rank(
        &self,
        combinations: &[Combination],
    ) -> Result<Vec<RankedCombination>, RankingError> {
        let response = self
            .client
            .post(format!("{}/rank", self.base_url))
            .json(&RankRequest { combinations })
            .send()
            .await
            .map_err(|e| RankingError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RankingError::Request(format!(
                "optimizer returned {}",
                status.as_u16()
            )));
        }

        let body: RankResponse = response
            .json()
            .await
            .map_err(|e| RankingError::InvalidResponse(e.to_string()))?;

        into_ranked(body, combinations)
    }
}

/// Keep only scores for combinations that were asked about; a NaN score
/// invalidates the whole response.
fn into_ranked(
    body: RankResponse,
    combinations: &[Combination],
) -> Result<Vec<RankedCombination>, RankingError> {
    let mut ranked = Vec::with_capacity(body.scores.len());
    for entry in body.scores {
        if entry.score.is_nan() {
            return Err(RankingError::InvalidResponse(format!(
                "NaN score for {}",
                entry.combination_id
            )));
        }
        if combinations.iter().any(|c| c.id == entry.combination_id) {
            ranked.push(RankedCombination {
                combination_id: entry.combination_id,
                score: entry.score,
                source: ScoreSource::Optimizer,
            });
        }
    }
    Ok(ranked)
}
