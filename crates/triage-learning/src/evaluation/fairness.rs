//! Disparate-impact audit over protected attributes and intersections.
//!
//! Protected attributes never enter the model; they re-enter here, and
//! only here, to measure what the model did. SES-value, first-generation,
//! and disadvantaged flags are mission-aligned model inputs by explicit
//! choice — they are still audited, and every training run pairs this
//! audit with a with/without-SES ablation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// The 80% rule: min group selection rate over max must reach this.
pub const DISPARATE_IMPACT_FLOOR: f64 = 0.8;

/// Selection and error-rate metrics for one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMetrics {
    pub group: String,
    pub n: usize,
    pub n_selected: usize,
    pub selection_rate: f64,
    /// True-positive rate of the gate's low-call within the group
    /// (requires ground truth).
    pub tpr: Option<f64>,
    /// False-positive rate of the gate's low-call within the group.
    pub fpr: Option<f64>,
}

/// Audit result for one attribute (or intersection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeAudit {
    pub attribute: String,
    pub groups: Vec<GroupMetrics>,
    /// `min_rate / max_rate` over groups with members.
    pub disparate_impact_ratio: f64,
    pub meets_80_rule: bool,
    /// Max pairwise gap in TPR or FPR across groups.
    pub equalized_odds_difference: Option<f64>,
    /// Demographic disparity conditioned on the stratum variable,
    /// size-weighted, max absolute over groups.
    pub conditional_demographic_disparity: Option<f64>,
}

/// The full fairness report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairnessReport {
    pub attributes: Vec<AttributeAudit>,
    pub intersections: Vec<AttributeAudit>,
}

/// Inputs for one audit pass.
pub struct AuditInputs<'a> {
    /// Attribute name → per-applicant group label.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// Per-applicant selection outcome.
    pub selected: &'a [bool],
    /// Gate's predicted-low call per applicant, for equalized odds.
    pub predicted_low: Option<&'a [bool]>,
    /// Ground-truth low label per applicant, for equalized odds.
    pub actual_low: Option<&'a [bool]>,
    /// Stratum per applicant (assigned tier) for conditional disparity.
    pub strata: Option<Vec<String>>,
}

/// Map an age to its audit band.
pub fn age_band(age: f64) -> String {
    match age {
        a if a < 23.0 => "<23".to_string(),
        a if a < 26.0 => "23-25".to_string(),
        a if a < 31.0 => "26-30".to_string(),
        _ => "31+".to_string(),
    }
}

/// Run the audit over every attribute plus the required intersections.
///
/// `intersections` pairs attribute names already present in
/// `inputs.attributes` (e.g. `("Gender", "First_Generation_Ind")`).
pub fn audit(inputs: &AuditInputs<'_>, intersections: &[(&str, &str)]) -> FairnessReport {
    let attributes: Vec<AttributeAudit> = inputs
        .attributes
        .iter()
        .map(|(name, labels)| audit_attribute(name, labels, inputs))
        .collect();

    let intersection_audits: Vec<AttributeAudit> = intersections
        .iter()
        .filter_map(|(a, b)| {
            let left = inputs.attributes.get(*a)?;
            let right = inputs.attributes.get(*b)?;
            let combined: Vec<String> = left
                .iter()
                .zip(right)
                .map(|(x, y)| format!("{x} × {y}"))
                .collect();
            Some(audit_attribute(&format!("{a} × {b}"), &combined, inputs))
        })
        .collect();

    FairnessReport {
        attributes,
        intersections: intersection_audits,
    }
}

fn audit_attribute(name: &str, labels: &[String], inputs: &AuditInputs<'_>) -> AttributeAudit {
    let mut by_group: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        by_group.entry(label.as_str()).or_default().push(i);
    }

    let groups: Vec<GroupMetrics> = by_group
        .iter()
        .map(|(group, indices)| {
            let n = indices.len();
            let n_selected = indices.iter().filter(|&&i| inputs.selected[i]).count();
            let (tpr, fpr) = match (inputs.predicted_low, inputs.actual_low) {
                (Some(predicted), Some(actual)) => {
                    let tp = indices
                        .iter()
                        .filter(|&&i| actual[i] && predicted[i])
                        .count();
                    let pos = indices.iter().filter(|&&i| actual[i]).count();
                    let fp = indices
                        .iter()
                        .filter(|&&i| !actual[i] && predicted[i])
                        .count();
                    let neg = n - pos;
                    (
                        (pos > 0).then(|| tp as f64 / pos as f64),
                        (neg > 0).then(|| fp as f64 / neg as f64),
                    )
                }
                _ => (None, None),
            };
            GroupMetrics {
                group: (*group).to_string(),
                n,
                n_selected,
                selection_rate: n_selected as f64 / n.max(1) as f64,
                tpr,
                fpr,
            }
        })
        .collect();

    let rates: Vec<f64> = groups
        .iter()
        .filter(|g| g.n > 0)
        .map(|g| g.selection_rate)
        .collect();
    let disparate_impact_ratio = match (
        rates.iter().cloned().fold(f64::INFINITY, f64::min),
        rates.iter().cloned().fold(0.0f64, f64::max),
    ) {
        (_, max) if max == 0.0 => 1.0,
        (min, max) => min / max,
    };
    let meets_80_rule = disparate_impact_ratio >= DISPARATE_IMPACT_FLOOR;
    if !meets_80_rule {
        warn!(
            attribute = name,
            ratio = format!("{disparate_impact_ratio:.3}"),
            "disparate impact below the 80% rule"
        );
    }

    let equalized_odds_difference = max_pairwise_gap(&groups);
    let conditional_demographic_disparity = inputs
        .strata
        .as_ref()
        .map(|strata| conditional_disparity(labels, inputs.selected, strata));

    AttributeAudit {
        attribute: name.to_string(),
        groups,
        disparate_impact_ratio,
        meets_80_rule,
        equalized_odds_difference,
        conditional_demographic_disparity,
    }
}

/// Max over group pairs of the larger of the TPR gap and FPR gap.
fn max_pairwise_gap(groups: &[GroupMetrics]) -> Option<f64> {
    let mut max_gap: Option<f64> = None;
    for (i, a) in groups.iter().enumerate() {
        for b in groups.iter().skip(i + 1) {
            let tpr_gap = match (a.tpr, b.tpr) {
                (Some(x), Some(y)) => Some((x - y).abs()),
                _ => None,
            };
            let fpr_gap = match (a.fpr, b.fpr) {
                (Some(x), Some(y)) => Some((x - y).abs()),
                _ => None,
            };
            for gap in [tpr_gap, fpr_gap].into_iter().flatten() {
                max_gap = Some(max_gap.map_or(gap, |m| m.max(gap)));
            }
        }
    }
    max_gap
}

/// Size-weighted demographic disparity within strata: for each group, the
/// weighted mean of (group rate − stratum rate) over strata; report the
/// max absolute value across groups.
fn conditional_disparity(labels: &[String], selected: &[bool], strata: &[String]) -> f64 {
    let mut by_stratum: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, stratum) in strata.iter().enumerate() {
        by_stratum.entry(stratum.as_str()).or_default().push(i);
    }

    let group_names: Vec<&String> = {
        let mut names: Vec<&String> = labels.iter().collect();
        names.sort();
        names.dedup();
        names
    };

    let mut worst: f64 = 0.0;
    for group in group_names {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for indices in by_stratum.values() {
            let stratum_rate = indices.iter().filter(|&&i| selected[i]).count() as f64
                / indices.len() as f64;
            let members: Vec<&usize> =
                indices.iter().filter(|&&i| &labels[i] == group).collect();
            if members.is_empty() {
                continue;
            }
            let group_rate =
                members.iter().filter(|&&&i| selected[i]).count() as f64 / members.len() as f64;
            let weight = members.len() as f64;
            weighted += weight * (group_rate - stratum_rate);
            total_weight += weight;
        }
        if total_weight > 0.0 {
            worst = worst.max((weighted / total_weight).abs());
        }
    }
    worst
}
