//! Stage 2: the quantile-regression quality ranker.
//!
//! Trained only on applicants above the low threshold, predicting the
//! α-quantile of the review score — deliberately conservative, so an
//! applicant ranks highly only when most of their score distribution is
//! high. α is swept and chosen by validation contamination; when even the
//! best α leaks more than the configured bound of low-scorers into the
//! selected pool, training falls back to the expanded set
//! (`score >= threshold - 2`), trading selection bias for support.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::boosting::{BoostingParams, GradientBoostedTrees, LossKind};
use crate::error::{LearningError, Result};
use crate::split::stratified_two_way;

/// Ranker training parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankerParams {
    /// Candidate quantiles, swept by validation contamination.
    pub alphas: Vec<f64>,
    /// Low-score threshold defining the training cut and contamination.
    pub low_score_threshold: f64,
    /// Minimum training rows after the cut; below this, two-stage
    /// training is unsound and aborts.
    pub min_rows: usize,
    /// Contamination bound that triggers the expanded-training fallback.
    pub contamination_bound: f64,
    /// Selection ratio used when measuring validation contamination.
    pub k_ratio: f64,
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for RankerParams {
    fn default() -> Self {
        Self {
            alphas: vec![0.10, 0.15, 0.20, 0.25, 0.30],
            low_score_threshold: 15.0,
            min_rows: 400,
            contamination_bound: 0.02,
            k_ratio: 0.4,
            n_estimators: 200,
            max_depth: 3,
            learning_rate: 0.05,
            seed: 2025,
        }
    }
}

/// What the ranker sweep observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankerTrainingReport {
    pub chosen_alpha: f64,
    /// Validation contamination per candidate α.
    pub sweep: Vec<(f64, f64)>,
    pub n_train_rows: usize,
    /// Whether the expanded-training fallback fired.
    pub expanded_training: bool,
}

/// The fitted quality ranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRanker {
    booster: GradientBoostedTrees,
    alpha: f64,
}

impl QualityRanker {
    /// Train on the full labeled cohort; the above-threshold cut happens
    /// internally so the validation pool keeps both classes for
    /// contamination measurement.
    pub fn train(
        rows: &[Vec<f64>],
        scores: &[f64],
        params: &RankerParams,
    ) -> Result<(Self, RankerTrainingReport)> {
        if rows.len() != scores.len() {
            return Err(LearningError::InvalidData(format!(
                "{} rows but {} scores",
                rows.len(),
                scores.len()
            )));
        }

        // Hold out a validation pool with both classes.
        let is_low: Vec<bool> = scores
            .iter()
            .map(|s| *s <= params.low_score_threshold)
            .collect();
        let (train_idx, val_idx) = stratified_two_way(&is_low, 0.8, params.seed)?;

        let cut = |floor: f64, indices: &[usize]| -> (Vec<Vec<f64>>, Vec<f64>) {
            let mut x = Vec::new();
            let mut y = Vec::new();
            for &i in indices {
                if scores[i] > floor {
                    x.push(rows[i].clone());
                    y.push(scores[i]);
                }
            }
            (x, y)
        };

        let (train_x, train_y) = cut(params.low_score_threshold, &train_idx);
        if train_x.len() < params.min_rows {
            return Err(LearningError::InsufficientRanked {
                rows: train_x.len(),
                floor: params.min_rows,
            });
        }

        let val_rows: Vec<Vec<f64>> = val_idx.iter().map(|&i| rows[i].clone()).collect();
        let val_scores: Vec<f64> = val_idx.iter().map(|&i| scores[i]).collect();
        let k = ((val_rows.len() as f64) * params.k_ratio).floor().max(1.0) as usize;

        // α sweep: minimize contamination of the top-K on validation.
        let mut sweep = Vec::with_capacity(params.alphas.len());
        let mut best: Option<(f64, f64, GradientBoostedTrees)> = None;
        for &alpha in &params.alphas {
            let booster = fit_quantile(&train_x, &train_y, alpha, params)?;
            let contamination = selection_contamination(
                &booster.predict(&val_rows),
                &val_scores,
                params.low_score_threshold,
                k,
            );
            debug!(alpha, contamination = format!("{contamination:.4}"), "alpha sweep");
            sweep.push((alpha, contamination));

            let better = match &best {
                None => true,
                Some((_, best_contamination, _)) => contamination < *best_contamination,
            };
            if better {
                best = Some((alpha, contamination, booster));
            }
        }
        let (chosen_alpha, mut best_contamination, mut booster) =
            best.expect("at least one alpha candidate");

        // Fallback: widen the training set when contamination stays high.
        let mut expanded_training = false;
        if best_contamination > params.contamination_bound {
            warn!(
                contamination = format!("{best_contamination:.4}"),
                bound = params.contamination_bound,
                "contamination above bound; expanding ranker training set"
            );
            let (wide_x, wide_y) = cut(params.low_score_threshold - 2.0, &train_idx);
            let wide_booster = fit_quantile(&wide_x, &wide_y, chosen_alpha, params)?;
            let wide_contamination = selection_contamination(
                &wide_booster.predict(&val_rows),
                &val_scores,
                params.low_score_threshold,
                k,
            );
            if wide_contamination < best_contamination {
                booster = wide_booster;
                best_contamination = wide_contamination;
                expanded_training = true;
            }
        }

        let report = RankerTrainingReport {
            chosen_alpha,
            sweep,
            n_train_rows: train_x.len(),
            expanded_training,
        };
        info!(
            alpha = chosen_alpha,
            contamination = format!("{best_contamination:.4}"),
            expanded = expanded_training,
            "ranker trained"
        );

        Ok((
            Self {
                booster,
                alpha: chosen_alpha,
            },
            report,
        ))
    }

    /// Predicted conservative (α-quantile) review scores.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        self.booster.predict(rows)
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

fn fit_quantile(
    rows: &[Vec<f64>],
    scores: &[f64],
    alpha: f64,
    params: &RankerParams,
) -> Result<GradientBoostedTrees> {
    GradientBoostedTrees::fit(
        LossKind::Quantile { alpha },
        rows,
        scores,
        None,
        BoostingParams {
            n_estimators: params.n_estimators,
            learning_rate: params.learning_rate,
            max_depth: params.max_depth,
            min_samples_leaf: 5,
            lambda: 1.0,
            subsample: 0.8,
            early_stopping_rounds: None,
            seed: params.seed,
        },
    )
}

/// Fraction of the predicted top-K whose true score is at or below the
/// threshold.
pub fn selection_contamination(
    predictions: &[f64],
    true_scores: &[f64],
    threshold: f64,
    k: usize,
) -> f64 {
    let mut order: Vec<usize> = (0..predictions.len()).collect();
    order.sort_by(|&a, &b| {
        predictions[b]
            .partial_cmp(&predictions[a])
            .expect("finite predictions")
    });
    let k = k.min(order.len());
    if k == 0 {
        return 0.0;
    }
    let contaminated = order[..k]
        .iter()
        .filter(|&&i| true_scores[i] <= threshold)
        .count();
    contaminated as f64 / k as f64
}
