//! Scoring-time drift detection against persisted training marginals.
//!
//! Two granularities:
//!
//! - **Per feature**: PSI and a two-sample KS test of the scoring pool's
//!   marginal against the training sample stored in the artifact. A
//!   feature is flagged on KS p < 0.05 or a mean shift beyond 2σ; it is
//!   an *alert* (the retraining-decision severity) on PSI > 0.25 or
//!   KS p < 0.01. The global alert fires when more than 20% of features
//!   are flagged.
//! - **Per applicant**: any single feature beyond 3σ of the training
//!   marginal marks the applicant out-of-domain; their prediction is
//!   annotated `confidence = "low"`, never suppressed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::data::Dataset;
use crate::triage::{Confidence, TriageOutcome};
use triage_processing::features::FeatureMarginal;

/// PSI bin count; bins are training-sample deciles.
const PSI_BINS: usize = 10;

/// Drift result for one feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub feature: String,
    pub psi: f64,
    pub ks_statistic: f64,
    pub ks_p_value: f64,
    /// Mean shift in units of the training standard deviation.
    pub mean_shift_sigmas: f64,
    /// Scoring-time flag: KS p < 0.05 or |mean shift| > 2σ.
    pub flagged: bool,
    /// Retraining-decision severity: PSI > 0.25 or KS p < 0.01.
    pub alert: bool,
}

/// Drift result over a scoring pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub features: Vec<FeatureDrift>,
    pub n_flagged: usize,
    /// More than 20% of checked features flagged.
    pub global_alert: bool,
}

/// Population Stability Index between a training sample and the scoring
/// pool, over training-decile bins. Identical distributions give 0.
pub fn psi(training: &[f64], scoring: &[f64]) -> f64 {
    if training.is_empty() || scoring.is_empty() {
        return 0.0;
    }
    let mut sorted = training.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite"));

    // Decile edges from the training sample.
    let mut edges = Vec::with_capacity(PSI_BINS - 1);
    for bin in 1..PSI_BINS {
        let position = bin * sorted.len() / PSI_BINS;
        edges.push(sorted[position.min(sorted.len() - 1)]);
    }

    let bin_of = |v: f64| -> usize {
        edges.iter().take_while(|e| v > **e).count()
    };

    let mut expected = vec![0.0f64; PSI_BINS];
    let mut actual = vec![0.0f64; PSI_BINS];
    for v in training {
        expected[bin_of(*v)] += 1.0;
    }
    for v in scoring {
        actual[bin_of(*v)] += 1.0;
    }

    let epsilon = 1e-4;
    let mut total = 0.0;
    for bin in 0..PSI_BINS {
        let e = (expected[bin] / training.len() as f64).max(epsilon);
        let a = (actual[bin] / scoring.len() as f64).max(epsilon);
        total += (a - e) * (a / e).ln();
    }
    total
}

/// Two-sample Kolmogorov-Smirnov statistic and asymptotic p-value.
pub fn ks_test(a: &[f64], b: &[f64]) -> (f64, f64) {
    if a.is_empty() || b.is_empty() {
        return (0.0, 1.0);
    }
    let mut sa = a.to_vec();
    let mut sb = b.to_vec();
    sa.sort_by(|x, y| x.partial_cmp(y).expect("finite"));
    sb.sort_by(|x, y| x.partial_cmp(y).expect("finite"));

    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < sa.len() && j < sb.len() {
        let x = sa[i].min(sb[j]);
        while i < sa.len() && sa[i] <= x {
            i += 1;
        }
        while j < sb.len() && sb[j] <= x {
            j += 1;
        }
        let fa = i as f64 / sa.len() as f64;
        let fb = j as f64 / sb.len() as f64;
        d = d.max((fa - fb).abs());
    }

    let n_eff = (sa.len() * sb.len()) as f64 / (sa.len() + sb.len()) as f64;
    let lambda = (n_eff.sqrt() + 0.12 + 0.11 / n_eff.sqrt()) * d;
    let mut p = 0.0;
    for k in 1..=100 {
        let term = (-2.0 * (k as f64).powi(2) * lambda * lambda).exp();
        p += if k % 2 == 1 { 2.0 * term } else { -2.0 * term };
    }
    (d, p.clamp(0.0, 1.0))
}

/// Compute the per-feature drift report for a scoring pool.
pub fn compute_drift(
    marginals: &BTreeMap<String, FeatureMarginal>,
    dataset: &Dataset,
) -> DriftReport {
    let mut features = Vec::new();

    for (name, marginal) in marginals {
        let Some(index) = dataset.feature_index(name) else {
            continue;
        };
        let scoring = dataset.column(index);
        let scoring_mean = scoring.iter().sum::<f64>() / scoring.len().max(1) as f64;

        let psi_value = psi(&marginal.sample, &scoring);
        let (ks_statistic, ks_p_value) = ks_test(&marginal.sample, &scoring);
        let mean_shift_sigmas = if marginal.std > 0.0 {
            (scoring_mean - marginal.mean) / marginal.std
        } else {
            0.0
        };

        let flagged = ks_p_value < 0.05 || mean_shift_sigmas.abs() > 2.0;
        let alert = psi_value > 0.25 || ks_p_value < 0.01;
        features.push(FeatureDrift {
            feature: name.clone(),
            psi: psi_value,
            ks_statistic,
            ks_p_value,
            mean_shift_sigmas,
            flagged,
            alert,
        });
    }

    let n_flagged = features.iter().filter(|f| f.flagged).count();
    let global_alert = !features.is_empty()
        && (n_flagged as f64 / features.len() as f64) > 0.20;
    if global_alert {
        warn!(
            n_flagged,
            n_features = features.len(),
            "global drift alert: scoring pool diverges from training"
        );
    }

    DriftReport {
        features,
        n_flagged,
        global_alert,
    }
}

/// Per-applicant out-of-domain flags: feature names more than 3σ from the
/// training marginal.
pub fn out_of_domain_flags(
    marginals: &BTreeMap<String, FeatureMarginal>,
    dataset: &Dataset,
) -> Vec<Vec<String>> {
    let checks: Vec<(usize, &str, f64, f64)> = marginals
        .iter()
        .filter_map(|(name, m)| {
            dataset
                .feature_index(name)
                .filter(|_| m.std > 0.0)
                .map(|idx| (idx, name.as_str(), m.mean, m.std))
        })
        .collect();

    dataset
        .rows
        .iter()
        .map(|row| {
            checks
                .iter()
                .filter(|(idx, _, mean, std)| ((row[*idx] - mean) / std).abs() > 3.0)
                .map(|(_, name, _, _)| (*name).to_string())
                .collect()
        })
        .collect()
}

/// Downgrade confidence on OOD applicants and attach their drift flags.
pub fn annotate_predictions(
    outcome: &mut TriageOutcome,
    marginals: &BTreeMap<String, FeatureMarginal>,
    dataset: &Dataset,
) {
    let flags = out_of_domain_flags(marginals, dataset);
    for (prediction, applicant_flags) in outcome.predictions.iter_mut().zip(flags) {
        if !applicant_flags.is_empty() {
            prediction.confidence = Confidence::Low;
            prediction.drift_flags = applicant_flags;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn uniform(n: usize, lo: f64, hi: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(lo..hi)).collect()
    }

    #[test]
    fn test_psi_identical_distribution_is_zero() {
        let sample = uniform(1_000, 0.0, 1.0, 1);
        assert_eq!(psi(&sample, &sample.clone()), 0.0);
    }

    #[test]
    fn test_psi_detects_shift() {
        let training = uniform(1_000, 0.0, 1.0, 2);
        let shifted = uniform(1_000, 0.5, 1.5, 3);
        assert!(psi(&training, &shifted) > 0.25);
    }

    #[test]
    fn test_ks_same_distribution_high_p() {
        let a = uniform(500, 0.0, 1.0, 4);
        let b = uniform(500, 0.0, 1.0, 5);
        let (d, p) = ks_test(&a, &b);
        assert!(d < 0.1);
        assert!(p > 0.05);
    }

    #[test]
    fn test_ks_shifted_distribution_low_p() {
        let a = uniform(500, 0.0, 1.0, 6);
        let b = uniform(500, 0.4, 1.4, 7);
        let (d, p) = ks_test(&a, &b);
        assert!(d > 0.3);
        assert!(p < 0.01);
    }

    fn dataset_with(feature: &str, values: Vec<f64>) -> Dataset {
        Dataset {
            ids: (0..values.len() as i64).collect(),
            feature_names: vec![feature.to_string()],
            rows: values.into_iter().map(|v| vec![v]).collect(),
            targets: None,
        }
    }

    #[test]
    fn test_compute_drift_flags_shifted_feature() {
        let training = uniform(500, 0.0, 1.0, 8);
        let marginals = BTreeMap::from([(
            "Exp_Hour_Total".to_string(),
            FeatureMarginal::from_values(&training),
        )]);
        let dataset = dataset_with("Exp_Hour_Total", uniform(400, 2.0, 3.0, 9));

        let report = compute_drift(&marginals, &dataset);
        assert_eq!(report.features.len(), 1);
        assert!(report.features[0].flagged);
        assert!(report.features[0].alert);
        assert!(report.global_alert);
    }

    #[test]
    fn test_compute_drift_clean_pool_quiet() {
        let training = uniform(500, 0.0, 1.0, 10);
        let marginals = BTreeMap::from([(
            "Total_GPA".to_string(),
            FeatureMarginal::from_values(&training),
        )]);
        let dataset = dataset_with("Total_GPA", uniform(400, 0.0, 1.0, 11));

        let report = compute_drift(&marginals, &dataset);
        assert_eq!(report.n_flagged, 0);
        assert!(!report.global_alert);
    }

    #[test]
    fn test_out_of_domain_at_four_sigma() {
        let training = uniform(500, 0.0, 1.0, 12);
        let marginal = FeatureMarginal::from_values(&training);
        let outlier = marginal.mean + 4.0 * marginal.std;
        let marginals = BTreeMap::from([("Exp_Hour_Total".to_string(), marginal)]);

        let dataset = dataset_with("Exp_Hour_Total", vec![0.5, outlier]);
        let flags = out_of_domain_flags(&marginals, &dataset);
        assert!(flags[0].is_empty());
        assert_eq!(flags[1], vec!["Exp_Hour_Total".to_string()]);
    }
}
