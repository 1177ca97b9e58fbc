//! Gradient boosting over depth-limited regression trees.
//!
//! The two stages share this core: the gate boosts a weighted logistic
//! loss at depth 2, the ranker a pinball loss at depth 3. Row subsampling
//! and every other stochastic step draw from a seed fixed in the params,
//! so a retrain with equal inputs reproduces the model exactly.

pub mod loss;
pub mod tree;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LearningError, Result};
pub use loss::LossKind;
pub use tree::{Tree, TreeParams};

/// Boosting hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub lambda: f64,
    /// Fraction of rows drawn (without replacement) per iteration.
    pub subsample: f64,
    /// Stop when the eval loss has not improved for this many rounds.
    pub early_stopping_rounds: Option<usize>,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            learning_rate: 0.05,
            max_depth: 3,
            min_samples_leaf: 5,
            lambda: 1.0,
            subsample: 0.8,
            early_stopping_rounds: Some(20),
            seed: 2025,
        }
    }
}

/// A fitted gradient-boosted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    params: BoostingParams,
    loss: LossKind,
    base_score: f64,
    trees: Vec<Tree>,
}

impl GradientBoostedTrees {
    /// Fit with an optional evaluation set for early stopping. When early
    /// stopping fires, the model is truncated to its best iteration.
    pub fn fit(
        loss: LossKind,
        rows: &[Vec<f64>],
        targets: &[f64],
        eval: Option<(&[Vec<f64>], &[f64])>,
        params: BoostingParams,
    ) -> Result<Self> {
        if rows.is_empty() {
            return Err(LearningError::InvalidData("no training rows".into()));
        }
        if rows.len() != targets.len() {
            return Err(LearningError::InvalidData(format!(
                "{} rows but {} targets",
                rows.len(),
                targets.len()
            )));
        }

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            lambda: params.lambda,
        };

        let base_score = loss.base_score(targets);
        let mut raw: Vec<f64> = vec![base_score; rows.len()];
        let mut eval_raw: Vec<f64> = eval.map(|(e, _)| vec![base_score; e.len()]).unwrap_or_default();

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees: Vec<Tree> = Vec::with_capacity(params.n_estimators);
        let mut best_loss = f64::INFINITY;
        let mut best_iter = 0usize;
        let mut rounds_since_best = 0usize;

        let sample_size =
            ((rows.len() as f64) * params.subsample).round().max(1.0) as usize;

        for iteration in 0..params.n_estimators {
            let indices: Vec<usize> = if sample_size < rows.len() {
                let mut all: Vec<usize> = (0..rows.len()).collect();
                all.shuffle(&mut rng);
                all.truncate(sample_size);
                all
            } else {
                (0..rows.len()).collect()
            };

            let mut grad = vec![0.0; rows.len()];
            let mut hess = vec![0.0; rows.len()];
            for &i in &indices {
                let (g, h) = loss.grad_hess(targets[i], raw[i]);
                grad[i] = g;
                hess[i] = h;
            }

            let tree = Tree::fit(rows, &indices, &grad, &hess, tree_params);
            for (i, row) in rows.iter().enumerate() {
                raw[i] += params.learning_rate * tree.predict_row(row);
            }
            if let Some((eval_rows, _)) = eval {
                for (i, row) in eval_rows.iter().enumerate() {
                    eval_raw[i] += params.learning_rate * tree.predict_row(row);
                }
            }
            trees.push(tree);

            if let (Some((_, eval_targets)), Some(rounds)) = (eval, params.early_stopping_rounds) {
                let current = loss.eval_loss(eval_targets, &eval_raw);
                if current < best_loss - 1e-9 {
                    best_loss = current;
                    best_iter = iteration + 1;
                    rounds_since_best = 0;
                } else {
                    rounds_since_best += 1;
                    if rounds_since_best >= rounds {
                        debug!(
                            best_iter,
                            stopped_at = iteration + 1,
                            best_loss = format!("{best_loss:.5}"),
                            "early stopping"
                        );
                        trees.truncate(best_iter);
                        break;
                    }
                }
            }
        }

        Ok(Self {
            params,
            loss,
            base_score,
            trees,
        })
    }

    /// Raw (pre-link) score for one row.
    pub fn predict_raw_row(&self, row: &[f64]) -> f64 {
        self.base_score
            + self
                .trees
                .iter()
                .map(|t| self.params.learning_rate * t.predict_row(row))
                .sum::<f64>()
    }

    /// Raw scores for a matrix.
    pub fn predict_raw(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.predict_raw_row(r)).collect()
    }

    /// Link-transformed predictions (probabilities for logistic, scores
    /// for quantile).
    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter()
            .map(|r| self.loss.transform(self.predict_raw_row(r)))
            .collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn loss(&self) -> LossKind {
        self.loss
    }
}
