//! Platt-style sigmoid calibration.
//!
//! The calibration split is small (a few hundred samples); a two-parameter
//! sigmoid is the right capacity there, where isotonic regression would
//! memorize spurious step functions. Fit in prefit mode on scores from an
//! already-trained classifier, never nested inside a CV threshold tuner.

use serde::{Deserialize, Serialize};

use crate::boosting::loss::sigmoid;
use crate::error::{LearningError, Result};

/// Fitted sigmoid map `p = sigmoid(a * score + b)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattCalibrator {
    pub a: f64,
    pub b: f64,
}

impl PlattCalibrator {
    /// Fit on raw scores and binary labels by Newton iteration with
    /// Platt's target smoothing.
    pub fn fit(scores: &[f64], labels: &[bool]) -> Result<Self> {
        if scores.len() != labels.len() || scores.is_empty() {
            return Err(LearningError::InvalidData(
                "calibration scores/labels empty or mismatched".into(),
            ));
        }

        let n_pos = labels.iter().filter(|l| **l).count() as f64;
        let n_neg = labels.len() as f64 - n_pos;
        if n_pos == 0.0 || n_neg == 0.0 {
            return Err(LearningError::InvalidData(
                "calibration split needs both classes".into(),
            ));
        }

        // Smoothed targets keep the fit away from infinite parameters.
        let t_pos = (n_pos + 1.0) / (n_pos + 2.0);
        let t_neg = 1.0 / (n_neg + 2.0);
        let targets: Vec<f64> = labels
            .iter()
            .map(|l| if *l { t_pos } else { t_neg })
            .collect();

        let mut a = 0.0f64;
        let mut b = ((n_pos + 1.0) / (n_neg + 1.0)).ln();

        for _ in 0..100 {
            let mut grad_a = 0.0;
            let mut grad_b = 0.0;
            let mut h_aa = 1e-12;
            let mut h_ab = 0.0;
            let mut h_bb = 1e-12;

            for (s, t) in scores.iter().zip(&targets) {
                let p = sigmoid(a * s + b);
                let d = p - t;
                let w = (p * (1.0 - p)).max(1e-12);
                grad_a += d * s;
                grad_b += d;
                h_aa += w * s * s;
                h_ab += w * s;
                h_bb += w;
            }

            let det = h_aa * h_bb - h_ab * h_ab;
            if det.abs() < 1e-12 {
                break;
            }
            let step_a = (h_bb * grad_a - h_ab * grad_b) / det;
            let step_b = (h_aa * grad_b - h_ab * grad_a) / det;
            a -= step_a;
            b -= step_b;

            if step_a.abs() < 1e-10 && step_b.abs() < 1e-10 {
                break;
            }
        }

        Ok(Self { a, b })
    }

    /// Calibrated probability for one raw score.
    pub fn predict(&self, score: f64) -> f64 {
        sigmoid(self.a * score + self.b)
    }

    /// Calibrated probabilities for a batch.
    pub fn predict_batch(&self, scores: &[f64]) -> Vec<f64> {
        scores.iter().map(|s| self.predict(*s)).collect()
    }
}
