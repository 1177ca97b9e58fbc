//! triage-learning: the two-stage screening model.
//!
//! The model half of the admissions triage core. Consumes the feature
//! matrix produced by `triage-processing` and provides:
//!
//! - **Boosting core**: depth-limited gradient-boosted trees with
//!   logistic and quantile objectives, seed-fixed throughout
//! - **Safety gate**: calibrated binary classifier with cost-tuned
//!   rejection threshold under a recall floor
//! - **Quality ranker**: conservative quantile regressor over
//!   gate-passing applicants, with α sweep and fallback expansion
//! - **Triage**: top-K selection with tier assignment and per-applicant
//!   terminal states
//! - **Artifacts**: a single versioned bundle with a `.sha256` integrity
//!   sidecar
//! - **Evaluation & audit**: Wilson-bounded recall, NDCG, calibration
//!   error, PSI/KS drift, and an intersectional fairness audit
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use triage_learning::{Dataset, GateParams, QualityRanker, RankerParams, SafetyGate, TwoStageModel};
//!
//! let dataset = Dataset::from_feature_frame(&features, &columns, Some(&scores))?;
//! let is_low: Vec<bool> = dataset.require_targets()?.iter().map(|s| *s <= 15.0).collect();
//!
//! let (gate, gate_report) = SafetyGate::train(&dataset.rows, &is_low, &GateParams::default())?;
//! let (ranker, ranker_report) =
//!     QualityRanker::train(&dataset.rows, dataset.require_targets()?, &RankerParams::default())?;
//!
//! let model = TwoStageModel::new(gate, ranker);
//! let outcome = model.triage(&scoring_pool, k_target)?;
//! ```
//!
//! # Determinism
//!
//! Training is single-threaded and synchronous; every stochastic step
//! (subsampling, bootstrap, splits) draws from an explicit seed. Two runs
//! with equal inputs produce byte-identical artifacts.

pub mod artifact;
pub mod boosting;
pub mod calibration;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod gate;
pub mod ranker;
pub mod split;
pub mod triage;

// Re-exports for convenient access
pub use artifact::ModelArtifact;
pub use boosting::{BoostingParams, GradientBoostedTrees, LossKind};
pub use calibration::PlattCalibrator;
pub use data::Dataset;
pub use error::{LearningError, Result};
pub use evaluation::{
    DriftReport, EvaluationSummary, FairnessReport, ReportWriter, SesAblation,
};
pub use gate::{GateParams, GateTrainingReport, SafetyGate};
pub use ranker::{QualityRanker, RankerParams, RankerTrainingReport};
pub use triage::{ApplicantState, Confidence, TriageOutcome, TriagePrediction, TwoStageModel};

static_assertions::assert_impl_all!(TwoStageModel: Send, Sync);
static_assertions::assert_impl_all!(ModelArtifact: Send, Sync);
