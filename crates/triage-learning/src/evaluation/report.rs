//! Evaluation report artifacts.
//!
//! A run writes structured files into the outputs directory: the overall
//! metric summary, the per-tier distribution, the bootstrap-CI table, and
//! the fairness and drift reports. Files are JSON plus a short plain-text
//! digest for reviewers who will never open a JSON file.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use tracing::info;

use super::drift::DriftReport;
use super::fairness::FairnessReport;
use super::metrics::{
    bootstrap_ci, expected_calibration_error, ndcg_at_k, spearman, wilson_lower_bound,
};
use crate::error::Result;
use crate::gate::GateTrainingReport;
use crate::ranker::{RankerTrainingReport, selection_contamination};
use crate::triage::TriageOutcome;
use triage_processing::taxonomy::TIER_LABELS;

/// Bootstrap resamples for metric CIs.
const METRIC_RESAMPLES: usize = 1_000;

/// The overall metric summary for one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub generated_at: String,
    pub n_pool: usize,
    pub n_passed_gate: usize,
    pub gate_rejection_rate: f64,
    pub k_target: usize,
    pub n_selected: usize,
    /// Point-estimate gate recall on low-scorers (labeled pools only).
    pub gate_recall: Option<f64>,
    /// Wilson 95% lower bound; acceptance gates read this, not the point.
    pub gate_recall_wilson_lower: Option<f64>,
    pub contamination: Option<f64>,
    pub ndcg_at_k: Option<f64>,
    pub ndcg_ci: Option<(f64, f64)>,
    pub spearman: Option<f64>,
    pub spearman_ci: Option<(f64, f64)>,
    /// ECE of the calibrated gate probabilities; target < 0.05.
    pub ece: Option<f64>,
    /// Tier label → count over ranked applicants.
    pub tier_distribution: BTreeMap<String, usize>,
}

/// Build the summary from a triage outcome, with test labels when known.
pub fn summarize(
    outcome: &TriageOutcome,
    actual_scores: Option<&[f64]>,
    low_threshold: f64,
    seed: u64,
) -> EvaluationSummary {
    let mut tier_distribution: BTreeMap<String, usize> = BTreeMap::new();
    for prediction in &outcome.predictions {
        if let Some(label) = prediction.tier_label {
            *tier_distribution.entry(label.to_string()).or_default() += 1;
        }
    }

    let labeled = actual_scores.map(|scores| {
        let is_low: Vec<bool> = scores.iter().map(|s| *s <= low_threshold).collect();

        let n_low = is_low.iter().filter(|l| **l).count();
        let caught = outcome
            .predictions
            .iter()
            .zip(&is_low)
            .filter(|(p, low)| **low && !p.gate_passed)
            .count();
        let recall = if n_low == 0 {
            1.0
        } else {
            caught as f64 / n_low as f64
        };

        let selected: Vec<bool> = {
            let mut s = vec![false; outcome.predictions.len()];
            for &i in &outcome.selected_indices {
                s[i] = true;
            }
            s
        };
        let n_selected_low = selected
            .iter()
            .zip(&is_low)
            .filter(|(sel, low)| **sel && **low)
            .count();
        let contamination = if outcome.selected_indices.is_empty() {
            0.0
        } else {
            n_selected_low as f64 / outcome.selected_indices.len() as f64
        };

        // Ranking metrics over the passed pool.
        let passed: Vec<usize> = (0..outcome.predictions.len())
            .filter(|&i| outcome.predictions[i].gate_passed)
            .collect();
        let passed_preds: Vec<f64> = passed
            .iter()
            .map(|&i| outcome.predictions[i].predicted_score.unwrap_or(0.0))
            .collect();
        let passed_actual: Vec<f64> = passed.iter().map(|&i| scores[i]).collect();

        let k = outcome.k_target.min(passed.len());
        let ndcg = ndcg_at_k(&passed_preds, &passed_actual, k);
        let rho = spearman(&passed_preds, &passed_actual);

        let ndcg_ci = bootstrap_ci(passed.len(), METRIC_RESAMPLES, seed, |idx| {
            let p: Vec<f64> = idx.iter().map(|&i| passed_preds[i]).collect();
            let a: Vec<f64> = idx.iter().map(|&i| passed_actual[i]).collect();
            ndcg_at_k(&p, &a, k.min(idx.len()))
        });
        let spearman_ci = bootstrap_ci(passed.len(), METRIC_RESAMPLES, seed ^ 1, |idx| {
            let p: Vec<f64> = idx.iter().map(|&i| passed_preds[i]).collect();
            let a: Vec<f64> = idx.iter().map(|&i| passed_actual[i]).collect();
            spearman(&p, &a)
        });

        let p_low: Vec<f64> = outcome.predictions.iter().map(|p| p.p_low).collect();
        let ece = expected_calibration_error(&p_low, &is_low, 10);

        (recall, n_low, contamination, ndcg, ndcg_ci, rho, spearman_ci, ece)
    });

    let (gate_recall, wilson_lower, contamination, ndcg, ndcg_ci, rho, spearman_ci, ece) =
        match labeled {
            Some((recall, n_low, contamination, ndcg, ndcg_ci, rho, spearman_ci, ece)) => {
                let caught = (recall * n_low as f64).round() as usize;
                (
                    Some(recall),
                    Some(wilson_lower_bound(caught, n_low)),
                    Some(contamination),
                    Some(ndcg),
                    Some(ndcg_ci),
                    Some(rho),
                    Some(spearman_ci),
                    Some(ece),
                )
            }
            None => (None, None, None, None, None, None, None, None),
        };

    EvaluationSummary {
        generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        n_pool: outcome.predictions.len(),
        n_passed_gate: outcome.n_passed_gate,
        gate_rejection_rate: outcome.gate_rejection_rate,
        k_target: outcome.k_target,
        n_selected: outcome.selected_indices.len(),
        gate_recall,
        gate_recall_wilson_lower: wilson_lower,
        contamination,
        ndcg_at_k: ndcg,
        ndcg_ci,
        spearman: rho,
        spearman_ci,
        ece,
        tier_distribution,
    }
}

/// Writes the report artifact set into an outputs directory.
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write every artifact that exists for this run.
    pub fn write(
        &self,
        summary: &EvaluationSummary,
        gate_report: Option<&GateTrainingReport>,
        ranker_report: Option<&RankerTrainingReport>,
        fairness: Option<&FairnessReport>,
        drift: Option<&DriftReport>,
    ) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;

        self.write_json("evaluation_summary.json", summary)?;
        if let Some(report) = gate_report {
            self.write_json("gate_training_report.json", report)?;
        }
        if let Some(report) = ranker_report {
            self.write_json("ranker_training_report.json", report)?;
        }
        if let Some(report) = fairness {
            self.write_json("fairness_report.json", report)?;
        }
        if let Some(report) = drift {
            self.write_json("drift_report.json", report)?;
        }
        self.write_digest(summary)?;

        info!(dir = %self.output_dir.display(), "report artifacts written");
        Ok(())
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.output_dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    fn write_digest(&self, summary: &EvaluationSummary) -> Result<()> {
        let mut file = fs::File::create(self.output_dir.join("summary.txt"))?;
        writeln!(file, "Triage evaluation — {}", summary.generated_at)?;
        writeln!(file, "{}", "=".repeat(48))?;
        writeln!(file, "Pool: {} applicants", summary.n_pool)?;
        writeln!(
            file,
            "Gate: {} passed ({:.1}% rejected)",
            summary.n_passed_gate,
            summary.gate_rejection_rate * 100.0
        )?;
        writeln!(
            file,
            "Selected: {} of K={}",
            summary.n_selected, summary.k_target
        )?;
        if let (Some(recall), Some(lower)) =
            (summary.gate_recall, summary.gate_recall_wilson_lower)
        {
            writeln!(
                file,
                "Gate recall: {:.3} (Wilson 95% lower bound {:.3})",
                recall, lower
            )?;
        }
        if let Some(contamination) = summary.contamination {
            writeln!(file, "Contamination: {:.3}", contamination)?;
        }
        if let Some(ece) = summary.ece {
            writeln!(file, "Calibration ECE: {:.4}", ece)?;
        }
        writeln!(file, "Tiers:")?;
        for label in TIER_LABELS {
            let count = summary.tier_distribution.get(*label).copied().unwrap_or(0);
            writeln!(file, "  {label:<12} {count}")?;
        }
        Ok(())
    }
}

/// Convenience: contamination of an explicit selection against labels.
pub fn contamination_of_selection(
    predictions: &[f64],
    true_scores: &[f64],
    threshold: f64,
    k: usize,
) -> f64 {
    selection_contamination(predictions, true_scores, threshold, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::{ApplicantState, Confidence, TriagePrediction};

    fn outcome() -> TriageOutcome {
        // Four applicants: two passed (ranked 1-2), one selected, two
        // rejected by the gate.
        let predictions = vec![
            TriagePrediction {
                amcas_id: 1,
                predicted_score: Some(20.0),
                p_low: 0.05,
                tier: Some(3),
                tier_label: Some("Strong"),
                gate_passed: true,
                rank: Some(1),
                state: ApplicantState::Selected,
                confidence: Confidence::High,
                drift_flags: vec![],
            },
            TriagePrediction {
                amcas_id: 2,
                predicted_score: Some(14.0),
                p_low: 0.10,
                tier: Some(2),
                tier_label: Some("Recommended"),
                gate_passed: true,
                rank: Some(2),
                state: ApplicantState::NotSelected,
                confidence: Confidence::High,
                drift_flags: vec![],
            },
            TriagePrediction {
                amcas_id: 3,
                predicted_score: None,
                p_low: 0.9,
                tier: None,
                tier_label: None,
                gate_passed: false,
                rank: None,
                state: ApplicantState::RejectedByGate,
                confidence: Confidence::High,
                drift_flags: vec![],
            },
            TriagePrediction {
                amcas_id: 4,
                predicted_score: None,
                p_low: 0.85,
                tier: None,
                tier_label: None,
                gate_passed: false,
                rank: None,
                state: ApplicantState::RejectedByGate,
                confidence: Confidence::High,
                drift_flags: vec![],
            },
        ];
        TriageOutcome {
            predictions,
            selected_indices: vec![0],
            n_passed_gate: 2,
            gate_rejection_rate: 0.5,
            k_target: 1,
            short_pool: false,
        }
    }

    #[test]
    fn test_summary_with_labels() {
        let scores = vec![22.0, 18.0, 10.0, 12.0];
        let summary = summarize(&outcome(), Some(&scores), 15.0, 7);

        assert_eq!(summary.gate_recall, Some(1.0));
        // 2/2 caught: Wilson lower bound well below 1.
        let lower = summary.gate_recall_wilson_lower.unwrap();
        assert!(lower < 0.95 && lower > 0.2);
        assert_eq!(summary.contamination, Some(0.0));
        assert_eq!(summary.tier_distribution["Strong"], 1);
        assert_eq!(summary.tier_distribution["Recommended"], 1);
    }

    #[test]
    fn test_summary_without_labels_has_no_metrics() {
        let summary = summarize(&outcome(), None, 15.0, 7);
        assert!(summary.gate_recall.is_none());
        assert!(summary.contamination.is_none());
        assert_eq!(summary.n_pool, 4);
        assert_eq!(summary.n_selected, 1);
    }

    #[test]
    fn test_writer_emits_artifact_files() {
        let dir = tempfile::tempdir().unwrap();
        let summary = summarize(&outcome(), Some(&[22.0, 18.0, 10.0, 12.0]), 15.0, 7);

        ReportWriter::new(dir.path())
            .write(&summary, None, None, None, None)
            .unwrap();

        assert!(dir.path().join("evaluation_summary.json").exists());
        let digest = fs::read_to_string(dir.path().join("summary.txt")).unwrap();
        assert!(digest.contains("Gate recall"));
        assert!(digest.contains("Strong"));
    }
}
