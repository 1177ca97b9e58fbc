//! Custom error types for the admissions data pipeline.
//!
//! This module provides the fatal half of the error taxonomy using
//! `thiserror`. Non-fatal quality findings are not errors: they are
//! accumulated as [`crate::reporting::QualityWarning`] records and surface
//! in the run report instead of aborting the run.
//!
//! Errors are serializable so the CLI and any downstream consumer can
//! render them as structured `{code, message}` payloads.

use serde::Serialize;
use serde::ser::SerializeStruct;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for ingestion, rubric scoring, and the feature
/// pipeline.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// Run was cancelled by the caller.
    #[error("Run cancelled")]
    Cancelled,

    /// Invalid or incomplete configuration.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A required environment variable is absent.
    #[error("Missing required environment variable '{0}'")]
    MissingEnv(String),

    /// A required logical input file could not be located.
    #[error("Missing required input file '{logical}' (looked at {path})")]
    MissingInput { logical: String, path: PathBuf },

    /// No recognizable applicant-ID column after alias resolution.
    #[error("No applicant-ID column found in '{file}' after alias resolution (saw: {columns:?})")]
    MissingIdColumn { file: String, columns: Vec<String> },

    /// A stage received a frame that does not match its input schema.
    #[error("Schema violation in '{file}': {detail}")]
    Schema { file: String, detail: String },

    /// Auxiliary rows reference applicant IDs absent from the applicant table.
    #[error("{}", orphan_summary(.counts_by_file))]
    OrphanIds {
        /// Orphan counts keyed by logical file name.
        counts_by_file: BTreeMap<String, usize>,
    },

    /// A column's magnitude implies the wrong unit was used upstream.
    #[error("Unit mismatch in '{column}': median {median:.0} is implausible. {hint}")]
    UnitMismatch {
        column: String,
        median: f64,
        hint: String,
    },

    /// A feature column the fitted pipeline expects is absent at transform time.
    #[error("Feature column '{column}' missing at transform time; refusing to fill silently")]
    FeatureColumnMissing { column: String },

    /// A serialized pipeline is from an incompatible version.
    #[error("Incompatible feature-pipeline artifact: expected version {expected}, found {found}")]
    PipelineVersionMismatch { expected: u32, found: u32 },

    /// Content hash of a loaded pipeline does not match its payload.
    #[error("Feature-pipeline content hash mismatch: stored {stored}, computed {computed}")]
    PipelineHashMismatch { stored: String, computed: String },

    /// The canary set drifted beyond the reproducibility bound.
    #[error(
        "Reproducibility alert: canary mean absolute deviation {mad:.3} exceeds bound {bound:.3}"
    )]
    ReproducibilityAlert { mad: f64, bound: f64 },

    /// Transport failure from the LLM adapter after retries were exhausted.
    #[error("LLM transport error: {0}")]
    Transport(#[from] TransportError),

    /// Another process holds the rubric-cache writer lock.
    #[error("Rubric cache at '{path}' is locked by another writer")]
    CacheLocked { path: PathBuf },

    /// Internal error (e.g., task join failure).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn orphan_summary(counts: &BTreeMap<String, usize>) -> String {
    let total: usize = counts.values().sum();
    let per_file = counts
        .iter()
        .map(|(file, n)| format!("{file}: {n}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{total} orphaned applicant ID(s) in auxiliary files ({per_file})")
}

/// Transient transport failures from the LLM adapter.
///
/// These are retried with exponential backoff before being promoted into
/// [`ProcessingError::Transport`]; see [`crate::rubric::RetryPolicy`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// HTTP 429: the provisioned-throughput budget is exhausted.
    #[error("rate limited (HTTP 429)")]
    RateLimited,

    /// HTTP 5xx from the endpoint.
    #[error("server error (HTTP {0})")]
    Server(u16),

    /// Non-retryable HTTP status (4xx other than 429).
    #[error("request rejected (HTTP {0})")]
    Rejected(u16),

    /// Request timed out at the transport layer.
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure.
    #[error("connection failed: {0}")]
    Connection(String),
}

impl TransportError {
    /// Whether a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Server(_) | Self::Timeout | Self::Connection(_)
        )
    }

    /// Whether this failure should also back off the shared call budget.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

impl ProcessingError {
    /// Stable code for structured reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::Configuration(_) => "CONFIGURATION",
            Self::MissingEnv(_) => "MISSING_ENV",
            Self::MissingInput { .. } => "MISSING_INPUT",
            Self::MissingIdColumn { .. } => "MISSING_ID_COLUMN",
            Self::Schema { .. } => "SCHEMA",
            Self::OrphanIds { .. } => "ORPHAN_IDS",
            Self::UnitMismatch { .. } => "UNIT_MISMATCH",
            Self::FeatureColumnMissing { .. } => "FEATURE_COLUMN_MISSING",
            Self::PipelineVersionMismatch { .. } => "PIPELINE_VERSION_MISMATCH",
            Self::PipelineHashMismatch { .. } => "PIPELINE_HASH_MISMATCH",
            Self::ReproducibilityAlert { .. } => "REPRODUCIBILITY_ALERT",
            Self::Transport(_) => "TRANSPORT",
            Self::CacheLocked { .. } => "CACHE_LOCKED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }

    /// Process exit code for the CLI: 2 configuration/file, 3 data integrity.
    ///
    /// Model-integrity failures (exit 4) live in the learning crate.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_)
            | Self::MissingEnv(_)
            | Self::MissingInput { .. }
            | Self::Io(_)
            | Self::Transport(_)
            | Self::CacheLocked { .. } => 2,
            Self::MissingIdColumn { .. }
            | Self::Schema { .. }
            | Self::OrphanIds { .. }
            | Self::UnitMismatch { .. }
            | Self::FeatureColumnMissing { .. }
            | Self::PipelineVersionMismatch { .. }
            | Self::PipelineHashMismatch { .. }
            | Self::ReproducibilityAlert { .. } => 3,
            Self::Cancelled | Self::Internal(_) | Self::Polars(_) | Self::Json(_) => 1,
        }
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Serialize as `{code, message}` for structured consumers.
impl Serialize for ProcessingError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("ProcessingError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for processing operations.
pub type Result<T> = std::result::Result<T, ProcessingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(ProcessingError::Cancelled.error_code(), "CANCELLED");
        assert_eq!(
            ProcessingError::UnitMismatch {
                column: "Exp_Hour_Total".to_string(),
                median: 18_000.0,
                hint: "divide by 60".to_string(),
            }
            .error_code(),
            "UNIT_MISMATCH"
        );
    }

    #[test]
    fn test_exit_codes() {
        let config = ProcessingError::Configuration("bad".to_string());
        assert_eq!(config.exit_code(), 2);

        let orphans = ProcessingError::OrphanIds {
            counts_by_file: BTreeMap::from([("experiences".to_string(), 1)]),
        };
        assert_eq!(orphans.exit_code(), 3);
    }

    #[test]
    fn test_orphan_message_reports_counts_by_file() {
        let err = ProcessingError::OrphanIds {
            counts_by_file: BTreeMap::from([
                ("experiences".to_string(), 3),
                ("languages".to_string(), 1),
            ]),
        };
        let msg = err.to_string();
        assert!(msg.contains("4 orphaned"));
        assert!(msg.contains("experiences: 3"));
        assert!(msg.contains("languages: 1"));
    }

    #[test]
    fn test_transport_retryability() {
        assert!(TransportError::RateLimited.is_retryable());
        assert!(TransportError::Server(503).is_retryable());
        assert!(TransportError::Timeout.is_retryable());
        assert!(!TransportError::Rejected(401).is_retryable());
        assert!(TransportError::RateLimited.is_rate_limit());
        assert!(!TransportError::Timeout.is_rate_limit());
    }

    #[test]
    fn test_error_serialization() {
        let error = ProcessingError::FeatureColumnMissing {
            column: "Total_GPA".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("FEATURE_COLUMN_MISSING"));
        assert!(json.contains("Total_GPA"));
    }
}
