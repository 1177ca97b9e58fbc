//! Evaluation and audit: metrics, drift, fairness, and report artifacts.

pub mod drift;
pub mod fairness;
pub mod metrics;
pub mod report;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::Dataset;
use crate::error::Result;
use crate::gate::{GateParams, SafetyGate};
use triage_processing::taxonomy::ADVERSITY_FLAGS;

pub use drift::{DriftReport, FeatureDrift, annotate_predictions, compute_drift, ks_test, out_of_domain_flags, psi};
pub use fairness::{AttributeAudit, AuditInputs, FairnessReport, GroupMetrics, age_band, audit};
pub use metrics::{
    bootstrap_ci, expected_calibration_error, ndcg_at_k, spearman, wilson_interval,
    wilson_lower_bound,
};
pub use report::{EvaluationSummary, ReportWriter, summarize};

/// The SES-derived model inputs zeroed by the ablation: the five flags
/// plus the composites built from them.
pub const SES_FEATURE_SET: &[&str] = &[
    "First_Generation_Ind",
    "Disadvantaged_Ind",
    "SES_Value_Ind",
    "Pell_Grant_Ind",
    "Fee_Assistance_Ind",
    "Adversity_Count",
    "Grit_Index",
];

/// Result of the with/without-SES ablation required on every training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SesAblation {
    pub recall_with: f64,
    pub recall_without: f64,
    pub rejection_rate_with: f64,
    pub rejection_rate_without: f64,
    /// Fraction of gate decisions that changed when SES inputs were
    /// removed.
    pub decision_flip_rate: f64,
}

/// Train the gate with and without the SES inputs and compare behavior.
///
/// The mission-aligned choice keeps SES flags as inputs; this ablation
/// makes the cost of that choice visible on every run instead of leaving
/// it to an annual review.
pub fn ses_ablation(
    dataset: &Dataset,
    is_low: &[bool],
    params: &GateParams,
) -> Result<SesAblation> {
    debug_assert!(ADVERSITY_FLAGS.iter().all(|f| SES_FEATURE_SET.contains(f)));

    let (gate_with, report_with) = SafetyGate::train(&dataset.rows, is_low, params)?;
    let blinded = dataset.with_columns_zeroed(SES_FEATURE_SET);
    let (gate_without, report_without) = SafetyGate::train(&blinded.rows, is_low, params)?;

    let decide = |gate: &SafetyGate, rows: &[Vec<f64>]| -> Vec<bool> {
        let threshold = gate.threshold();
        gate.predict_p_low(rows)
            .into_iter()
            .map(|p| p > threshold)
            .collect()
    };
    let with_decisions = decide(&gate_with, &dataset.rows);
    let without_decisions = decide(&gate_without, &blinded.rows);

    let flips = with_decisions
        .iter()
        .zip(&without_decisions)
        .filter(|(a, b)| a != b)
        .count();
    let rejection = |decisions: &[bool]| {
        decisions.iter().filter(|d| **d).count() as f64 / decisions.len().max(1) as f64
    };

    let ablation = SesAblation {
        recall_with: report_with.recall,
        recall_without: report_without.recall,
        rejection_rate_with: rejection(&with_decisions),
        rejection_rate_without: rejection(&without_decisions),
        decision_flip_rate: flips as f64 / dataset.len().max(1) as f64,
    };
    info!(
        flip_rate = format!("{:.3}", ablation.decision_flip_rate),
        "SES ablation complete"
    );
    Ok(ablation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_ses_ablation_runs_and_reports() {
        let mut rng = StdRng::seed_from_u64(51);
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..900 {
            let quality: f64 = rng.gen_range(0.0..1.0);
            let ses = f64::from(rng.gen_bool(0.3));
            rows.push(vec![quality, ses, rng.gen_range(0.0..1.0)]);
            labels.push(quality < 0.4);
        }
        let dataset = Dataset {
            ids: (0..900).collect(),
            feature_names: vec![
                "Total_GPA".into(),
                "Adversity_Count".into(),
                "noise".into(),
            ],
            rows,
            targets: None,
        };
        let params = GateParams {
            bootstrap_resamples: 10,
            n_estimators: 30,
            ..GateParams::default()
        };

        let ablation = ses_ablation(&dataset, &labels, &params).unwrap();
        assert!(ablation.recall_with >= 0.95);
        assert!(ablation.recall_without >= 0.95);
        assert!((0.0..=1.0).contains(&ablation.decision_flip_rate));
    }
}
