//! Reproducibility canary for the rubric scorer.
//!
//! Every scoring run re-scores a small fixed text set and compares the
//! per-dimension results against a stored baseline. Mean absolute
//! deviation above the configured bound means the pinned model is no
//! longer producing the distribution it was validated on, and the run
//! aborts before unreliable scores reach the feature pipeline.
//!
//! The first run with a given prompt hash writes the baseline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::scorer::RubricScorer;
use crate::error::{ProcessingError, Result};
use crate::taxonomy::PS_DIMENSIONS;

/// Fixed canary texts: deliberately spread across the quality range so
/// drift shows up at both ends of the scale.
const CANARY_TEXTS: &[(&str, &str)] = &[
    (
        "canary_strong",
        "When my grandmother entered hospice, I spent every weekend at her bedside \
         and watched her nurses work. One of them, Maria, taught me that care is a \
         craft: she noticed what my grandmother could no longer say. That year I \
         became an EMT, and on my first cardiac call I understood the difference \
         between wanting to help and knowing how. I have organized a free clinic \
         shift schedule for two years since, and each patient interaction has \
         sharpened the same lesson Maria taught me about listening first.",
    ),
    (
        "canary_weak",
        "I have always wanted to be a doctor. I volunteered at a hospital and \
         shadowed several physicians. I also did research in a biology lab and was \
         a member of the pre-med society. These experiences confirmed my passion \
         for medicine and helped me develop many important skills.",
    ),
];

/// Stored baseline: per-text, per-dimension scores from the validation
/// run, pinned to a prompt hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryBaseline {
    pub prompt_hash: String,
    pub scores: BTreeMap<String, BTreeMap<String, Option<i64>>>,
}

/// Outcome of a canary run.
#[derive(Debug, Clone, Serialize)]
pub struct CanaryOutcome {
    /// Mean absolute deviation against the baseline; 0.0 on first run.
    pub mad: f64,
    /// Whether this run wrote a fresh baseline.
    pub baseline_written: bool,
}

/// Score the canary set and gate on deviation from the stored baseline.
///
/// A baseline whose prompt hash no longer matches is replaced rather than
/// compared: a deliberate prompt or model change resets the reference.
pub async fn run_canary(
    scorer: &RubricScorer,
    baseline_path: &Path,
    mad_bound: f64,
) -> Result<CanaryOutcome> {
    let mut fresh: BTreeMap<String, BTreeMap<String, Option<i64>>> = BTreeMap::new();
    for (name, text) in CANARY_TEXTS {
        let scores = scorer.score_text(text, PS_DIMENSIONS).await?;
        fresh.insert((*name).to_string(), scores);
    }
    let prompt_hash = scorer.prompt_hash();

    let baseline: Option<CanaryBaseline> = if baseline_path.exists() {
        Some(serde_json::from_str(&fs::read_to_string(baseline_path)?)?)
    } else {
        None
    };

    match baseline {
        Some(baseline) if baseline.prompt_hash == prompt_hash => {
            let mad = mean_absolute_deviation(&baseline.scores, &fresh);
            info!(mad = format!("{mad:.3}"), bound = mad_bound, "canary comparison");
            if mad > mad_bound {
                return Err(ProcessingError::ReproducibilityAlert {
                    mad,
                    bound: mad_bound,
                });
            }
            Ok(CanaryOutcome {
                mad,
                baseline_written: false,
            })
        }
        stale => {
            if stale.is_some() {
                warn!("canary baseline has a different prompt hash; rewriting");
            }
            let baseline = CanaryBaseline {
                prompt_hash,
                scores: fresh,
            };
            if let Some(parent) = baseline_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(baseline_path, serde_json::to_string_pretty(&baseline)?)?;
            info!(path = %baseline_path.display(), "canary baseline written");
            Ok(CanaryOutcome {
                mad: 0.0,
                baseline_written: true,
            })
        }
    }
}

/// MAD over the dimension pairs scored in both runs; null scores on
/// either side drop the pair.
fn mean_absolute_deviation(
    baseline: &BTreeMap<String, BTreeMap<String, Option<i64>>>,
    fresh: &BTreeMap<String, BTreeMap<String, Option<i64>>>,
) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for (text_name, baseline_scores) in baseline {
        let Some(fresh_scores) = fresh.get(text_name) else {
            continue;
        };
        for (dim, baseline_score) in baseline_scores {
            if let (Some(b), Some(Some(f))) = (baseline_score, fresh_scores.get(dim)) {
                total += (*b as f64 - *f as f64).abs();
                count += 1;
            }
        }
    }
    if count == 0 { 0.0 } else { total / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores_of(value: i64) -> BTreeMap<String, BTreeMap<String, Option<i64>>> {
        let mut per_text = BTreeMap::new();
        for (name, _) in CANARY_TEXTS {
            let dims: BTreeMap<String, Option<i64>> = PS_DIMENSIONS
                .iter()
                .map(|d| ((*d).to_string(), Some(value)))
                .collect();
            per_text.insert((*name).to_string(), dims);
        }
        per_text
    }

    #[test]
    fn test_mad_zero_on_identical_scores() {
        let a = scores_of(3);
        assert_eq!(mean_absolute_deviation(&a, &a.clone()), 0.0);
    }

    #[test]
    fn test_mad_counts_uniform_shift() {
        let a = scores_of(3);
        let b = scores_of(4);
        assert_eq!(mean_absolute_deviation(&a, &b), 1.0);
    }

    #[test]
    fn test_mad_skips_null_pairs() {
        let a = scores_of(3);
        let mut b = scores_of(3);
        b.get_mut("canary_weak")
            .unwrap()
            .insert("ps_motivation".to_string(), None);
        // One dropped pair, remaining pairs identical.
        assert_eq!(mean_absolute_deviation(&a, &b), 0.0);
    }
}
