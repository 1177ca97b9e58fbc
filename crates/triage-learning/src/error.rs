//! Error types for the model layer.
//!
//! Follows the processing crate's taxonomy split: fatal conditions are
//! variants here, audit findings (drift flags, fairness disparities) are
//! report rows, never errors.

use thiserror::Error;

/// The main error type for training, triage, and artifact handling.
#[derive(Error, Debug)]
pub enum LearningError {
    /// Invalid training or triage configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input matrix malformed (ragged rows, length mismatches, no rows).
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A feature column the model expects is absent at scoring time.
    #[error("Feature column '{column}' missing at scoring time; refusing to fill silently")]
    FeatureColumnMissing { column: String },

    /// Ranker training set below the configured floor.
    #[error(
        "Ranker training set has {rows} rows (minimum {floor}): insufficient positive class \
         after gating threshold; retraining without two-stage recommended"
    )]
    InsufficientRanked { rows: usize, floor: usize },

    /// Gate predictions degenerate to one class (mode collapse).
    #[error(
        "Gate underperforms the majority-class baseline (accuracy {accuracy:.3} vs {baseline:.3}); \
         training aborted"
    )]
    GateCollapse { accuracy: f64, baseline: f64 },

    /// No sweep threshold satisfied the recall constraint.
    #[error("No gate threshold in [{lo}, {hi}] reaches recall target {target}")]
    RecallUnreachable { lo: f64, hi: f64, target: f64 },

    /// Artifact integrity tag does not match the file contents.
    #[error("Model artifact integrity mismatch: sidecar {stored}, computed {computed}")]
    ArtifactIntegrity { stored: String, computed: String },

    /// Artifact sidecar absent; the bundle cannot be trusted.
    #[error("Model artifact at '{0}' has no .sha256 sidecar")]
    ArtifactSidecarMissing(String),

    /// Artifact written by an incompatible version of this crate.
    #[error("Incompatible model artifact: expected version {expected}, found {found}")]
    ArtifactVersionMismatch { expected: u32, found: u32 },

    /// Training failed for a reason outside the specific variants.
    #[error("Training failed: {0}")]
    TrainingFailed(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

impl LearningError {
    /// Stable code for structured reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::InvalidData(_) => "INVALID_DATA",
            Self::FeatureColumnMissing { .. } => "FEATURE_COLUMN_MISSING",
            Self::InsufficientRanked { .. } => "INSUFFICIENT_RANKED",
            Self::GateCollapse { .. } => "GATE_COLLAPSE",
            Self::RecallUnreachable { .. } => "RECALL_UNREACHABLE",
            Self::ArtifactIntegrity { .. } => "ARTIFACT_INTEGRITY",
            Self::ArtifactSidecarMissing(_) => "ARTIFACT_SIDECAR_MISSING",
            Self::ArtifactVersionMismatch { .. } => "ARTIFACT_VERSION_MISMATCH",
            Self::TrainingFailed(_) => "TRAINING_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
        }
    }

    /// Process exit code: 4 model integrity, 3 data integrity, 2 config.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ArtifactIntegrity { .. }
            | Self::ArtifactSidecarMissing(_)
            | Self::ArtifactVersionMismatch { .. } => 4,
            Self::FeatureColumnMissing { .. } | Self::InvalidData(_) => 3,
            Self::InvalidConfig(_) | Self::Io(_) => 2,
            _ => 1,
        }
    }
}

/// Result type alias for model-layer operations.
pub type Result<T> = std::result::Result<T, LearningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_ranked_message() {
        let err = LearningError::InsufficientRanked { rows: 120, floor: 400 };
        let msg = err.to_string();
        assert!(msg.contains("insufficient positive class after gating threshold"));
        assert!(msg.contains("retraining without two-stage recommended"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            LearningError::ArtifactIntegrity {
                stored: "a".into(),
                computed: "b".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(
            LearningError::FeatureColumnMissing { column: "x".into() }.exit_code(),
            3
        );
        assert_eq!(LearningError::InvalidConfig("bad".into()).exit_code(), 2);
    }
}
