//! Stage 1: the calibrated safety gate.
//!
//! A shallow boosted classifier predicting `is_low`, wrapped in a Platt
//! calibrator and a cost-tuned rejection threshold. The three jobs use
//! three disjoint label-stratified slices of the training data:
//!
//! - **train-core (~60%)** fits the booster; the calibration slice serves
//!   only as its early-stopping eval set,
//! - **calibration (~20%)** fits the sigmoid calibrator on the already-
//!   trained booster's raw scores (prefit mode),
//! - **threshold (~20%)** tunes the rejection threshold under the
//!   asymmetric cost matrix, subject to the recall floor.
//!
//! Keeping the slices disjoint is the point: a threshold tuned on the
//! calibration data reports optimistic recall.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::boosting::{BoostingParams, GradientBoostedTrees, LossKind};
use crate::calibration::PlattCalibrator;
use crate::error::{LearningError, Result};
use crate::split::stratified_three_way;
use triage_processing::taxonomy::GATE_COST_MATRIX;

/// Gate training parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateParams {
    /// Minimum acceptable recall on low-scorers.
    pub recall_target: f64,
    /// Multiplier on the class-imbalance ratio for `scale_pos_weight`.
    pub pos_weight_factor: f64,
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Threshold sweep bounds and step.
    pub sweep_lo: f64,
    pub sweep_hi: f64,
    pub sweep_step: f64,
    /// Resamples for the threshold bootstrap CI.
    pub bootstrap_resamples: usize,
    pub seed: u64,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            recall_target: 0.95,
            pos_weight_factor: 2.5,
            n_estimators: 200,
            max_depth: 2,
            learning_rate: 0.1,
            sweep_lo: 0.01,
            sweep_hi: 0.50,
            sweep_step: 0.005,
            bootstrap_resamples: 500,
            seed: 2025,
        }
    }
}

/// What the gate training run observed; persisted into the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateTrainingReport {
    pub n_train: usize,
    pub n_calibration: usize,
    pub n_threshold: usize,
    pub scale_pos_weight: f64,
    pub threshold: f64,
    pub threshold_ci: (f64, f64),
    /// Recall on the threshold split at the chosen threshold.
    pub recall: f64,
    /// Total utility on the threshold split at the chosen threshold.
    pub utility: f64,
}

/// The fitted safety gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyGate {
    booster: GradientBoostedTrees,
    calibrator: PlattCalibrator,
    /// Rejection threshold: applicants with `p_low > threshold` are
    /// rejected by the gate.
    threshold: f64,
    threshold_ci: (f64, f64),
}

impl SafetyGate {
    /// Train the gate. `is_low` is the binary target
    /// (`score <= low_score_threshold`).
    pub fn train(
        rows: &[Vec<f64>],
        is_low: &[bool],
        params: &GateParams,
    ) -> Result<(Self, GateTrainingReport)> {
        if rows.len() != is_low.len() {
            return Err(LearningError::InvalidData(format!(
                "{} rows but {} labels",
                rows.len(),
                is_low.len()
            )));
        }

        let split = stratified_three_way(is_low, (0.6, 0.2), params.seed)?;

        let train_rows: Vec<Vec<f64>> = split.train.iter().map(|&i| rows[i].clone()).collect();
        let train_targets: Vec<f64> = split.train.iter().map(|&i| f64::from(is_low[i])).collect();
        let calib_rows: Vec<Vec<f64>> =
            split.calibration.iter().map(|&i| rows[i].clone()).collect();
        let calib_targets: Vec<f64> = split
            .calibration
            .iter()
            .map(|&i| f64::from(is_low[i]))
            .collect();

        let n_pos = train_targets.iter().filter(|t| **t > 0.5).count();
        let n_neg = train_targets.len() - n_pos;
        if n_pos == 0 || n_neg == 0 {
            return Err(LearningError::InvalidData(
                "gate training needs both classes".into(),
            ));
        }
        let scale_pos_weight = (n_neg as f64 / n_pos as f64) * params.pos_weight_factor;

        let boosting = BoostingParams {
            n_estimators: params.n_estimators,
            learning_rate: params.learning_rate,
            max_depth: params.max_depth,
            min_samples_leaf: 5,
            lambda: 1.0,
            subsample: 0.8,
            early_stopping_rounds: Some(20),
            seed: params.seed,
        };
        let booster = GradientBoostedTrees::fit(
            LossKind::Logistic { scale_pos_weight },
            &train_rows,
            &train_targets,
            Some((&calib_rows, &calib_targets)),
            boosting,
        )?;

        // Prefit calibration on the calibration slice's raw scores.
        let calib_raw = booster.predict_raw(&calib_rows);
        let calib_labels: Vec<bool> = split.calibration.iter().map(|&i| is_low[i]).collect();
        let calibrator = PlattCalibrator::fit(&calib_raw, &calib_labels)?;

        // Threshold sweep on the held-out threshold slice.
        let threshold_rows: Vec<Vec<f64>> =
            split.threshold.iter().map(|&i| rows[i].clone()).collect();
        let threshold_labels: Vec<bool> = split.threshold.iter().map(|&i| is_low[i]).collect();
        let p_low = calibrator.predict_batch(&booster.predict_raw(&threshold_rows));

        let chosen = sweep_threshold(&p_low, &threshold_labels, params)?;
        let threshold_ci =
            bootstrap_threshold_ci(&p_low, &threshold_labels, params)?;

        // Mode-collapse guard: the tuned gate must beat the majority-class
        // baseline on the held-out slice.
        let correct = p_low
            .iter()
            .zip(&threshold_labels)
            .filter(|(p, l)| (**p > chosen.threshold) == **l)
            .count();
        let accuracy = correct as f64 / threshold_labels.len() as f64;
        let prior = threshold_labels.iter().filter(|l| **l).count() as f64
            / threshold_labels.len() as f64;
        let baseline = prior.max(1.0 - prior);
        if accuracy + 1e-9 < baseline {
            return Err(LearningError::GateCollapse { accuracy, baseline });
        }

        let report = GateTrainingReport {
            n_train: split.train.len(),
            n_calibration: split.calibration.len(),
            n_threshold: split.threshold.len(),
            scale_pos_weight,
            threshold: chosen.threshold,
            threshold_ci,
            recall: chosen.recall,
            utility: chosen.utility,
        };
        info!(
            threshold = chosen.threshold,
            recall = format!("{:.3}", chosen.recall),
            ci = ?threshold_ci,
            "gate trained"
        );

        Ok((
            Self {
                booster,
                calibrator,
                threshold: chosen.threshold,
                threshold_ci,
            },
            report,
        ))
    }

    /// Calibrated probability of being a low-scorer, per row.
    pub fn predict_p_low(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        self.calibrator.predict_batch(&self.booster.predict_raw(rows))
    }

    /// The tuned rejection threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Bootstrap 95% CI of the tuned threshold.
    pub fn threshold_ci(&self) -> (f64, f64) {
        self.threshold_ci
    }
}

#[derive(Debug)]
struct SweepChoice {
    threshold: f64,
    recall: f64,
    utility: f64,
}

/// Maximize utility under the cost matrix subject to the recall floor.
///
/// Rejection is `p_low > t`: small thresholds reject aggressively (high
/// recall on lows, more good candidates lost), large thresholds the
/// reverse.
fn sweep_threshold(p_low: &[f64], is_low: &[bool], params: &GateParams) -> Result<SweepChoice> {
    let mut best: Option<SweepChoice> = None;
    let mut t = params.sweep_lo;

    while t <= params.sweep_hi + 1e-12 {
        let (recall, utility) = evaluate_threshold(p_low, is_low, t);
        if recall + 1e-12 >= params.recall_target {
            let better = match &best {
                None => true,
                Some(b) => utility > b.utility,
            };
            if better {
                best = Some(SweepChoice {
                    threshold: t,
                    recall,
                    utility,
                });
            }
        }
        t += params.sweep_step;
    }

    best.ok_or(LearningError::RecallUnreachable {
        lo: params.sweep_lo,
        hi: params.sweep_hi,
        target: params.recall_target,
    })
}

fn evaluate_threshold(p_low: &[f64], is_low: &[bool], t: f64) -> (f64, f64) {
    let mut utility = 0.0;
    let mut true_low = 0usize;
    let mut caught_low = 0usize;

    for (p, low) in p_low.iter().zip(is_low) {
        let predicted_low = *p > t;
        let actual = usize::from(*low);
        let predicted = usize::from(predicted_low);
        utility += GATE_COST_MATRIX[actual][predicted];
        if *low {
            true_low += 1;
            if predicted_low {
                caught_low += 1;
            }
        }
    }

    let recall = if true_low == 0 {
        1.0
    } else {
        caught_low as f64 / true_low as f64
    };
    (recall, utility)
}

/// Percentile bootstrap over the threshold split: re-pick the threshold
/// on each resample, report the 2.5/97.5 percentiles.
fn bootstrap_threshold_ci(
    p_low: &[f64],
    is_low: &[bool],
    params: &GateParams,
) -> Result<(f64, f64)> {
    let mut rng = StdRng::seed_from_u64(params.seed ^ 0x5eed);
    let mut thresholds = Vec::with_capacity(params.bootstrap_resamples);

    for _ in 0..params.bootstrap_resamples {
        let mut sample_p = Vec::with_capacity(p_low.len());
        let mut sample_l = Vec::with_capacity(p_low.len());
        for _ in 0..p_low.len() {
            let i = rng.gen_range(0..p_low.len());
            sample_p.push(p_low[i]);
            sample_l.push(is_low[i]);
        }
        match sweep_threshold(&sample_p, &sample_l, params) {
            Ok(choice) => thresholds.push(choice.threshold),
            // A resample can lose the minority class entirely; skip it.
            Err(_) => continue,
        }
    }

    if thresholds.is_empty() {
        warn!("no bootstrap resample satisfied the recall target; CI degenerate");
        return Ok((params.sweep_lo, params.sweep_hi));
    }

    thresholds.sort_by(|a, b| a.partial_cmp(b).expect("finite thresholds"));
    let lo = thresholds[((thresholds.len() as f64) * 0.025) as usize];
    let hi = thresholds
        [(((thresholds.len() as f64) * 0.975) as usize).min(thresholds.len() - 1)];
    Ok((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic cohort with a clean linear signal: low-scorers cluster at
    /// small feature values.
    fn cohort(n_high: usize, n_low: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<bool>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..n_high {
            rows.push(vec![
                rng.gen_range(0.4..1.0),
                rng.gen_range(0.3..1.0),
                rng.gen_range(0.0..1.0),
            ]);
            labels.push(false);
        }
        for _ in 0..n_low {
            rows.push(vec![
                rng.gen_range(0.0..0.5),
                rng.gen_range(0.0..0.6),
                rng.gen_range(0.0..1.0),
            ]);
            labels.push(true);
        }
        (rows, labels)
    }

    #[test]
    fn test_gate_meets_recall_target_on_clean_signal() {
        let (rows, labels) = cohort(807, 496, 9);
        let params = GateParams {
            bootstrap_resamples: 50,
            ..GateParams::default()
        };
        let (_gate, report) = SafetyGate::train(&rows, &labels, &params).unwrap();

        assert!(report.recall >= 0.95, "recall {}", report.recall);
        assert!(report.threshold >= 0.01 && report.threshold <= 0.50);
        assert!(report.threshold_ci.0 <= report.threshold_ci.1);
        assert!(report.scale_pos_weight > 2.0);
    }

    #[test]
    fn test_p_low_is_a_probability_and_ordered() {
        let (rows, labels) = cohort(400, 250, 10);
        let params = GateParams {
            bootstrap_resamples: 20,
            ..GateParams::default()
        };
        let (gate, _) = SafetyGate::train(&rows, &labels, &params).unwrap();

        let p = gate.predict_p_low(&rows);
        assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));

        // Low cluster should average a higher p_low than the high cluster.
        let mean_high: f64 = p[..400].iter().sum::<f64>() / 400.0;
        let mean_low: f64 = p[400..].iter().sum::<f64>() / 250.0;
        assert!(mean_low > mean_high + 0.2);
    }

    #[test]
    fn test_constant_features_collapse_to_guard_error() {
        // No signal at all: the recall floor forces blanket rejection,
        // which the majority-baseline guard must catch.
        let rows: Vec<Vec<f64>> = (0..600).map(|_| vec![1.0, 1.0]).collect();
        let labels: Vec<bool> = (0..600).map(|i| i % 10 < 3).collect();
        let params = GateParams {
            bootstrap_resamples: 10,
            ..GateParams::default()
        };

        let err = SafetyGate::train(&rows, &labels, &params).unwrap_err();
        assert!(
            matches!(err, LearningError::GateCollapse { .. }),
            "expected GateCollapse, got {err:?}"
        );
    }

    #[test]
    fn test_sweep_respects_recall_floor() {
        // Perfectly separable probabilities.
        let p_low = vec![0.9, 0.85, 0.8, 0.1, 0.05, 0.15, 0.2, 0.12];
        let is_low = vec![true, true, true, false, false, false, false, false];
        let params = GateParams::default();

        let choice = sweep_threshold(&p_low, &is_low, &params).unwrap();
        assert_eq!(choice.recall, 1.0);
        // All lows rejected (+1 each), no highs rejected (0 each).
        assert_eq!(choice.utility, 3.0);
    }

    #[test]
    fn test_unreachable_recall_errors() {
        // Inverted probabilities: lows look safe.
        let p_low = vec![0.01, 0.02, 0.9, 0.95];
        let is_low = vec![true, true, false, false];
        let params = GateParams::default();
        let err = sweep_threshold(&p_low, &is_low, &params).unwrap_err();
        assert!(matches!(err, LearningError::RecallUnreachable { .. }));
    }
}
