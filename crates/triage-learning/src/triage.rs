//! Two-stage triage: gate, rank, select top-K, assign tiers.
//!
//! Per applicant the state machine is `new → rejected_by_gate` (terminal)
//! or `new → passed_gate → ranked → selected | not_selected`. The
//! combined model is stateless across applicants: each triage call starts
//! from the feature matrix alone.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::Dataset;
use crate::error::Result;
use crate::gate::SafetyGate;
use crate::ranker::QualityRanker;
use triage_processing::taxonomy::{TIER_LABELS, assign_tier};

/// Terminal per-applicant triage state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicantState {
    /// `p_low` exceeded the gate threshold; never ranked.
    RejectedByGate,
    /// Passed the gate, ranked, and landed in the top-K.
    Selected,
    /// Passed the gate and was ranked, but outside the top-K.
    NotSelected,
}

/// Prediction confidence, downgraded by the drift audit for
/// out-of-domain applicants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// The consumer-facing prediction for one applicant.
#[derive(Debug, Clone, Serialize)]
pub struct TriagePrediction {
    pub amcas_id: i64,
    /// Conservative predicted review score; null for gate rejections.
    pub predicted_score: Option<f64>,
    pub p_low: f64,
    /// Tier 0-3; derived from the predicted score when ranked.
    pub tier: Option<u8>,
    pub tier_label: Option<&'static str>,
    pub gate_passed: bool,
    /// 1-based rank among gate passers; null for rejections.
    pub rank: Option<usize>,
    pub state: ApplicantState,
    pub confidence: Confidence,
    /// Feature names flagged by the drift audit for this applicant.
    pub drift_flags: Vec<String>,
}

/// Outcome of one triage run over a scoring pool.
#[derive(Debug, Clone, Serialize)]
pub struct TriageOutcome {
    pub predictions: Vec<TriagePrediction>,
    /// Indices into the scoring pool, ordered by descending rank.
    pub selected_indices: Vec<usize>,
    pub n_passed_gate: usize,
    pub gate_rejection_rate: f64,
    pub k_target: usize,
    /// Set when fewer applicants passed the gate than `k_target`; the
    /// threshold is never relaxed to fill the quota.
    pub short_pool: bool,
}

/// The combined two-stage model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoStageModel {
    pub gate: SafetyGate,
    pub ranker: QualityRanker,
}

impl TwoStageModel {
    pub fn new(gate: SafetyGate, ranker: QualityRanker) -> Self {
        Self { gate, ranker }
    }

    /// Triage a scoring pool: gate everyone, rank the passers, select the
    /// top `k_target`.
    pub fn triage(&self, dataset: &Dataset, k_target: usize) -> Result<TriageOutcome> {
        let p_low = self.gate.predict_p_low(&dataset.rows);
        let threshold = self.gate.threshold();

        let passed: Vec<usize> = (0..dataset.len())
            .filter(|&i| p_low[i] <= threshold)
            .collect();
        let n_passed_gate = passed.len();
        let gate_rejection_rate = 1.0 - n_passed_gate as f64 / dataset.len().max(1) as f64;

        let short_pool = n_passed_gate < k_target;
        if short_pool {
            warn!(
                passed = n_passed_gate,
                k_target, "fewer gate passers than K; pool stays short"
            );
        }

        let passed_rows: Vec<Vec<f64>> = passed.iter().map(|&i| dataset.rows[i].clone()).collect();
        let scores = self.ranker.predict(&passed_rows);

        // Order passers by descending predicted score; ties break by pool
        // order for determinism.
        let mut order: Vec<usize> = (0..passed.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .expect("finite scores")
                .then(passed[a].cmp(&passed[b]))
        });

        let k = k_target.min(order.len());
        let selected_indices: Vec<usize> = order[..k].iter().map(|&o| passed[o]).collect();

        let mut rank_of = vec![None; dataset.len()];
        let mut score_of = vec![None; dataset.len()];
        for (position, &o) in order.iter().enumerate() {
            rank_of[passed[o]] = Some(position + 1);
            score_of[passed[o]] = Some(scores[o]);
        }

        let predictions: Vec<TriagePrediction> = (0..dataset.len())
            .map(|i| {
                let gate_passed = p_low[i] <= threshold;
                let state = if !gate_passed {
                    ApplicantState::RejectedByGate
                } else if rank_of[i].is_some_and(|r| r <= k) {
                    ApplicantState::Selected
                } else {
                    ApplicantState::NotSelected
                };
                let tier = score_of[i].map(assign_tier);
                TriagePrediction {
                    amcas_id: dataset.ids[i],
                    predicted_score: score_of[i],
                    p_low: p_low[i],
                    tier,
                    tier_label: tier.map(|t| TIER_LABELS[t as usize]),
                    gate_passed,
                    rank: rank_of[i],
                    state,
                    confidence: Confidence::High,
                    drift_flags: Vec::new(),
                }
            })
            .collect();

        info!(
            pool = dataset.len(),
            passed = n_passed_gate,
            selected = selected_indices.len(),
            rejection_rate = format!("{gate_rejection_rate:.3}"),
            "triage complete"
        );

        Ok(TriageOutcome {
            predictions,
            selected_indices,
            n_passed_gate,
            gate_rejection_rate,
            k_target,
            short_pool,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateParams;
    use crate::ranker::RankerParams;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn model_and_pool() -> (TwoStageModel, Dataset) {
        let mut rng = StdRng::seed_from_u64(31);
        let mut rows = Vec::new();
        let mut scores = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..1_400 {
            let quality: f64 = rng.gen_range(0.0..1.0);
            let score = (quality * 25.0 + rng.gen_range(-1.0..1.0)).clamp(0.0, 25.0);
            rows.push(vec![quality, rng.gen_range(0.0..1.0)]);
            labels.push(score <= 15.0);
            scores.push(score);
        }

        let gate_params = GateParams {
            bootstrap_resamples: 20,
            n_estimators: 60,
            ..GateParams::default()
        };
        let (gate, _) = SafetyGate::train(&rows, &labels, &gate_params).unwrap();
        let ranker_params = RankerParams {
            alphas: vec![0.25],
            n_estimators: 40,
            ..RankerParams::default()
        };
        let (ranker, _) = QualityRanker::train(&rows, &scores, &ranker_params).unwrap();

        let pool_rows: Vec<Vec<f64>> = (0..300)
            .map(|_| vec![rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)])
            .collect();
        let dataset = Dataset {
            ids: (0..300).map(|i| 1_000 + i as i64).collect(),
            feature_names: vec!["quality".into(), "noise".into()],
            rows: pool_rows,
            targets: None,
        };
        (TwoStageModel::new(gate, ranker), dataset)
    }

    #[test]
    fn test_selected_subset_of_gate_passers_and_bounded_by_k() {
        let (model, pool) = model_and_pool();
        let outcome = model.triage(&pool, 80).unwrap();

        assert!(outcome.selected_indices.len() <= 80);
        let threshold = model.gate.threshold();
        for &i in &outcome.selected_indices {
            assert!(outcome.predictions[i].p_low <= threshold);
            assert_eq!(outcome.predictions[i].state, ApplicantState::Selected);
        }
    }

    #[test]
    fn test_states_partition_the_pool() {
        let (model, pool) = model_and_pool();
        let outcome = model.triage(&pool, 80).unwrap();

        let rejected = outcome
            .predictions
            .iter()
            .filter(|p| p.state == ApplicantState::RejectedByGate)
            .count();
        let selected = outcome
            .predictions
            .iter()
            .filter(|p| p.state == ApplicantState::Selected)
            .count();
        let not_selected = outcome
            .predictions
            .iter()
            .filter(|p| p.state == ApplicantState::NotSelected)
            .count();

        assert_eq!(rejected + selected + not_selected, 300);
        assert_eq!(rejected, 300 - outcome.n_passed_gate);
        assert_eq!(selected, outcome.selected_indices.len());

        // Rejections carry no score, rank, or tier.
        for p in &outcome.predictions {
            if p.state == ApplicantState::RejectedByGate {
                assert!(p.predicted_score.is_none());
                assert!(p.rank.is_none());
                assert!(p.tier.is_none());
            } else {
                assert!(p.predicted_score.is_some());
                assert!(p.rank.is_some());
            }
        }
    }

    #[test]
    fn test_ranks_are_dense_and_ordered_by_score() {
        let (model, pool) = model_and_pool();
        let outcome = model.triage(&pool, 50).unwrap();

        let mut ranked: Vec<(&usize, &f64)> = outcome
            .predictions
            .iter()
            .filter_map(|p| p.rank.as_ref().zip(p.predicted_score.as_ref()))
            .collect();
        ranked.sort_by_key(|(r, _)| **r);

        for window in ranked.windows(2) {
            assert!(window[0].1 >= window[1].1, "score increased with rank");
        }
        let ranks: Vec<usize> = ranked.iter().map(|(r, _)| **r).collect();
        assert_eq!(ranks, (1..=ranks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_short_pool_warns_but_never_relaxes() {
        let (model, pool) = model_and_pool();
        let outcome = model.triage(&pool, 10_000).unwrap();

        assert!(outcome.short_pool);
        assert_eq!(outcome.selected_indices.len(), outcome.n_passed_gate);
    }

    #[test]
    fn test_tiers_monotone_in_predicted_score() {
        let (model, pool) = model_and_pool();
        let outcome = model.triage(&pool, 100).unwrap();

        let mut scored: Vec<(f64, u8)> = outcome
            .predictions
            .iter()
            .filter_map(|p| p.predicted_score.zip(p.tier))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        for window in scored.windows(2) {
            assert!(window[0].1 <= window[1].1);
        }
    }
}
