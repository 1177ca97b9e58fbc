//! Training objectives for the boosting core.
//!
//! Two losses cover both stages: weighted logistic for the safety gate and
//! pinball (quantile) for the ranker. Each provides first and second
//! derivatives for the Newton-style leaf values and an evaluation metric
//! for early stopping.

use serde::{Deserialize, Serialize};

/// Floor on hessians so leaf values stay bounded.
const HESSIAN_FLOOR: f64 = 1e-12;

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// The objective a booster is trained under. Serialized inside the model
/// artifact so a loaded booster predicts on the same link it trained on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossKind {
    /// Binary log-loss with a positive-class weight; `transform` is the
    /// sigmoid.
    Logistic { scale_pos_weight: f64 },
    /// Pinball loss predicting the `alpha`-quantile; identity link.
    Quantile { alpha: f64 },
}

impl LossKind {
    /// Constant initial raw prediction.
    pub fn base_score(&self, targets: &[f64]) -> f64 {
        match self {
            Self::Logistic { scale_pos_weight } => {
                let mut pos = 0.0;
                let mut total = 0.0;
                for y in targets {
                    let w = if *y > 0.5 { *scale_pos_weight } else { 1.0 };
                    pos += w * y;
                    total += w;
                }
                let p = (pos / total).clamp(1e-6, 1.0 - 1e-6);
                (p / (1.0 - p)).ln()
            }
            Self::Quantile { alpha } => {
                let mut sorted = targets.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite targets"));
                let position = alpha * (sorted.len().saturating_sub(1)) as f64;
                sorted[position.round() as usize]
            }
        }
    }

    /// First and second derivative of the loss at one sample.
    pub fn grad_hess(&self, y: f64, raw: f64) -> (f64, f64) {
        match self {
            Self::Logistic { scale_pos_weight } => {
                let w = if y > 0.5 { *scale_pos_weight } else { 1.0 };
                let p = sigmoid(raw);
                (w * (p - y), (w * p * (1.0 - p)).max(HESSIAN_FLOOR))
            }
            Self::Quantile { alpha } => {
                // d/dpred of pinball: -alpha below the target, (1-alpha) above.
                let g = if y > raw { -alpha } else { 1.0 - *alpha };
                (g, 1.0)
            }
        }
    }

    /// Map a raw score to the prediction space.
    pub fn transform(&self, raw: f64) -> f64 {
        match self {
            Self::Logistic { .. } => sigmoid(raw),
            Self::Quantile { .. } => raw,
        }
    }

    /// Mean loss over a set, for early stopping.
    pub fn eval_loss(&self, targets: &[f64], raw: &[f64]) -> f64 {
        let mut total = 0.0;
        let mut weight = 0.0;
        for (y, r) in targets.iter().zip(raw) {
            match self {
                Self::Logistic { scale_pos_weight } => {
                    let w = if *y > 0.5 { *scale_pos_weight } else { 1.0 };
                    let p = sigmoid(*r).clamp(1e-12, 1.0 - 1e-12);
                    total -= w * (y * p.ln() + (1.0 - y) * (1.0 - p).ln());
                    weight += w;
                }
                Self::Quantile { alpha } => {
                    let diff = y - r;
                    total += if diff >= 0.0 {
                        alpha * diff
                    } else {
                        (alpha - 1.0) * diff
                    };
                    weight += 1.0;
                }
            }
        }
        total / weight.max(1.0)
    }
}
