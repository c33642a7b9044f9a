//! Counselor scoring
//!
//! ```text
//! score      = rating + category
//! rating     = 0                                   no rated history with this customer
//!            = (avg_rating - threshold) * weight   otherwise
//! category   = 0                                   category unknown or no history in it
//!            = min(count, cap) * category_weight   otherwise
//! ```
//!
//! Candidates are visited in ascending counselor id and only a strictly higher
//! score replaces the current best, so among equal top scores the lowest id wins.
//! That is an artefact of iteration order, not a preference policy.

use crate::config::ScoringSettings;
use crate::error::Result;
use crate::matching::{ConsultationHistory, HistoryAggregates};
use crate::types::CounselorId;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Weights of the scoring formula
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub rating_weight: f64,
    pub rating_threshold: f64,
    pub category_weight: f64,
    pub category_cap: u64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::from(&ScoringSettings::default())
    }
}

impl From<&ScoringSettings> for ScoringWeights {
    fn from(settings: &ScoringSettings) -> Self {
        Self {
            rating_weight: settings.rating_weight,
            rating_threshold: settings.rating_threshold,
            category_weight: settings.category_weight,
            category_cap: settings.category_cap,
        }
    }
}

/// History snapshot for one customer against a set of counselors
#[derive(Debug, Clone, Default)]
pub struct ScoreInputs {
    pub category: Option<String>,
    pub histories: HashMap<CounselorId, ConsultationHistory>,
    pub category_counts: HashMap<CounselorId, u64>,
}

impl ScoreInputs {
    /// Read everything scoring needs from the history collaborator
    pub async fn gather(
        history: &dyn HistoryAggregates,
        customer_id: &str,
        counselors: &BTreeSet<CounselorId>,
    ) -> Result<Self> {
        let category = history
            .latest_category(customer_id)
            .await?
            .filter(|c| !c.trim().is_empty());

        let mut inputs = ScoreInputs {
            category,
            ..Default::default()
        };
        for &counselor_id in counselors {
            let past = history
                .consultation_history(counselor_id, customer_id)
                .await?;
            inputs.histories.insert(counselor_id, past);

            if let Some(category) = &inputs.category {
                let count = history.category_count(counselor_id, category).await?;
                inputs.category_counts.insert(counselor_id, count);
            }
        }
        Ok(inputs)
    }
}

/// Pure scoring over pre-fetched inputs
#[derive(Debug, Clone, Default)]
pub struct CounselorScorer {
    weights: ScoringWeights,
}

impl CounselorScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn rating_component(&self, history: Option<&ConsultationHistory>) -> f64 {
        match history {
            Some(ConsultationHistory {
                count,
                avg_rating: Some(avg),
            }) if *count > 0 => (avg - self.weights.rating_threshold) * self.weights.rating_weight,
            _ => 0.0,
        }
    }

    pub fn category_component(&self, category: Option<&str>, count: u64) -> f64 {
        match category {
            Some(c) if !c.trim().is_empty() && count > 0 => {
                count.min(self.weights.category_cap) as f64 * self.weights.category_weight
            }
            _ => 0.0,
        }
    }

    pub fn score(&self, counselor_id: CounselorId, inputs: &ScoreInputs) -> f64 {
        let rating = self.rating_component(inputs.histories.get(&counselor_id));
        let category = self.category_component(
            inputs.category.as_deref(),
            inputs
                .category_counts
                .get(&counselor_id)
                .copied()
                .unwrap_or(0),
        );
        rating + category
    }

    /// Highest-scoring counselor, `None` only when `eligible` is empty
    pub fn select_best(
        &self,
        customer_id: &str,
        eligible: &BTreeSet<CounselorId>,
        inputs: &ScoreInputs,
    ) -> Option<CounselorId> {
        let mut best: Option<(CounselorId, f64)> = None;

        for &counselor_id in eligible {
            let score = self.score(counselor_id, inputs);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((counselor_id, score)),
            }
        }

        if let Some((counselor_id, score)) = best {
            debug!(
                "Selected counselor {} for customer '{}' with score {:.1} among {} candidates",
                counselor_id,
                customer_id,
                score,
                eligible.len()
            );
        }
        best.map(|(counselor_id, _)| counselor_id)
    }
}
