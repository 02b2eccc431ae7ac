//! Combination ranking with a local heuristic fallback.
//!
//! Ranking is best-effort: if the remote optimizer fails for any reason
//! the combinations are scored locally and the caller never sees an error.

use serde::{Deserialize, Serialize};

use crate::combination::{Combination, CombinationStatus};
use crate::types::CombinationId;

/// Where a score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    Optimizer,
    Heuristic,
}

/// A combination id with its score, highest first in ranked output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCombination {
    pub combination_id: CombinationId,
    pub score: f64,
    pub source: ScoreSource,
}

#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("Ranking request failed: {0}")]
    Request(String),

    #[error("Ranking response invalid: {0}")]
    InvalidResponse(String),
}

/// Remote scoring service.
#[async_trait::async_trait]
pub trait CombinationRanker: Send + Sync {
    async fn rank(&self, combinations: &[Combination])
        -> Result<Vec<RankedCombination>, RankingError>;
}

/// Score one combination locally.
///
/// Favourites and finished renders rank first; among equals, fuller
/// combinations (fewer empty slots) win.
pub fn heuristic_score(combination: &Combination) -> f64 {
    let mut score = 0.0;
    if combination.is_favourite {
        score += 0.5;
    }
    score += match combination.status {
        CombinationStatus::Completed => 0.3,
        CombinationStatus::Generating => 0.1,
        CombinationStatus::Pending => 0.0,
        CombinationStatus::Failed => -0.3,
    };

    let slots = combination.assignments.len();
    if slots > 0 {
        let filled = combination
            .assignments
            .values()
            .filter(|v| v.is_some())
            .count();
        score += 0.2 * filled as f64 / slots as f64;
    }
    score
}

/// Rank with the local heuristic only. Stable for equal scores.
pub fn rank_heuristically(combinations: &[Combination]) -> Vec<RankedCombination> {
    let mut ranked: Vec<RankedCombination> = combinations
        .iter()
        .map(|c| RankedCombination {
            combination_id: c.id.clone(),
            score: heuristic_score(c),
            source: ScoreSource::Heuristic,
        })
        .collect();
    sort_by_score(&mut ranked);
    ranked
}

/// Rank through `ranker` when available, falling back to the heuristic
/// on error or when the optimizer returns nothing usable.
pub async fn rank_combinations(
    ranker: Option<&dyn CombinationRanker>,
    combinations: &[Combination],
) -> Vec<RankedCombination> {
    let Some(ranker) = ranker else {
        return rank_heuristically(combinations);
    };

    match ranker.rank(combinations).await {
        Ok(mut ranked) if !ranked.is_empty() || combinations.is_empty() => {
            sort_by_score(&mut ranked);
            ranked
        }
        Ok(_) => {
            tracing::warn!(
                combinations = combinations.len(),
                "Optimizer returned no scores, using heuristic scores",
            );
            rank_heuristically(combinations)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Optimizer failed, using heuristic scores");
            rank_heuristically(combinations)
        }
    }
}

fn sort_by_score(ranked: &mut [RankedCombination]) {
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::combination::{generate, GenerateOptions, Selection, Slot, SlotType};

    struct FailingRanker;

    #[async_trait::async_trait]
    impl CombinationRanker for FailingRanker {
        async fn rank(
            &self,
            _combinations: &[Combination],
        ) -> Result<Vec<RankedCombination>, RankingError> {
            Err(RankingError::Request("connection refused".into()))
        }
    }

    struct ReverseRanker;

    #[async_trait::async_trait]
    impl CombinationRanker for ReverseRanker {
        async fn rank(
            &self,
            combinations: &[Combination],
        ) -> Result<Vec<RankedCombination>, RankingError> {
            Ok(combinations
                .iter()
                .enumerate()
                .map(|(i, c)| RankedCombination {
                    combination_id: c.id.clone(),
                    score: i as f64,
                    source: ScoreSource::Optimizer,
                })
                .collect())
        }
    }

    fn sample() -> Vec<Combination> {
        let slots = vec![Slot {
            name: "headline".into(),
            slot_type: SlotType::Text,
            locked: false,
            candidate_asset_ids: vec![],
        }];
        let selections = HashMap::from([(
            "headline".to_string(),
            Selection::Many(vec!["h1".into(), "h2".into(), "h3".into()]),
        )]);
        generate(&slots, &selections, &GenerateOptions::default())
    }

    #[test]
    fn favourite_outranks_plain() {
        let mut combos = sample();
        combos[2].is_favourite = true;
        let ranked = rank_heuristically(&combos);
        assert_eq!(ranked[0].combination_id, combos[2].id);
    }

    #[test]
    fn failed_ranks_last() {
        let mut combos = sample();
        combos[0].status = CombinationStatus::Failed;
        let ranked = rank_heuristically(&combos);
        assert_eq!(ranked.last().unwrap().combination_id, combos[0].id);
    }

    /// Collects formatted log output for the current thread.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let sink = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || sink.clone())
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    struct EmptyRanker;

    #[async_trait::async_trait]
    impl CombinationRanker for EmptyRanker {
        async fn rank(
            &self,
            _combinations: &[Combination],
        ) -> Result<Vec<RankedCombination>, RankingError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn optimizer_failure_is_logged() {
        let logs = LogBuffer::default();
        let _guard = logs.install();

        let ranked = rank_combinations(Some(&FailingRanker), &sample()).await;

        assert_eq!(ranked.len(), 3);
        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("Optimizer failed"));
        assert!(output.contains("connection refused"));
    }

    #[tokio::test]
    async fn empty_optimizer_result_falls_back_and_is_logged() {
        let logs = LogBuffer::default();
        let _guard = logs.install();

        let ranked = rank_combinations(Some(&EmptyRanker), &sample()).await;

        assert_eq!(ranked.len(), 3);
        assert!(ranked.iter().all(|r| r.source == ScoreSource::Heuristic));
        assert!(logs.contents().contains("Optimizer returned no scores"));
    }

    #[tokio::test]
    async fn failing_optimizer_falls_back_to_heuristic() {
        let combos = sample();
        let ranked = rank_combinations(Some(&FailingRanker), &combos).await;
        assert_eq!(ranked.len(), 3);
        assert!(ranked.iter().all(|r| r.source == ScoreSource::Heuristic));
    }

    #[tokio::test]
    async fn optimizer_scores_are_sorted_descending() {
        let combos = sample();
        let ranked = rank_combinations(Some(&ReverseRanker), &combos).await;
        assert_eq!(ranked[0].combination_id, combos[2].id);
        assert_eq!(ranked[0].source, ScoreSource::Optimizer);
    }
}
