//! Run configuration for ingestion, scoring, and the feature pipeline.
//!
//! This module provides the tunable half of configuration using the builder
//! pattern; the fixed taxonomy (column names, tier boundaries, dimension
//! maps) lives in [`crate::taxonomy`] and is compiled in.
//!
//! # Example
//!
//! ```rust,ignore
//! use triage_processing::config::RunConfig;
//!
//! let config = RunConfig::builder()
//!     .low_score_threshold(15)
//!     .recall_target(0.95)
//!     .scorer_concurrency(3)
//!     .build()?;
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a triage run.
///
/// All statistics-affecting knobs flow through here as explicit arguments;
/// no module reads process-wide mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Training-target threshold: `is_low = score <= low_score_threshold`.
    /// Default: 15
    pub low_score_threshold: i64,

    /// Minimum acceptable gate recall on low-scorers when tuning the gate
    /// threshold. Default: 0.95
    pub recall_target: f64,

    /// Top-K selection ratio: `K = floor(k_ratio * pool_size)`.
    /// Default: 0.4
    pub k_ratio: f64,

    /// Concurrency ceiling for the LLM scorer (in-flight applicants).
    /// 1 is a sequential smoke test; production stays at 3-5, well below
    /// the provisioned calls-per-minute budget. Default: 3
    pub scorer_concurrency: usize,

    /// Maximum attempts per LLM call before recording a null score.
    /// Default: 5
    pub max_llm_attempts: u32,

    /// Base backoff delay in milliseconds for LLM retries.
    /// Default: 500
    pub llm_backoff_base_ms: u64,

    /// Minimum rows required to train the quality ranker. Below this the
    /// two-stage split is statistically unsound and training aborts.
    /// Default: 400
    pub ranker_min_rows: usize,

    /// Contamination bound above which the ranker falls back to the
    /// expanded training set (`score >= threshold - 2`). Default: 0.02
    pub contamination_bound: f64,

    /// Canary mean-absolute-deviation bound for the reproducibility gate.
    /// Default: 0.5
    pub canary_mad_bound: f64,

    /// Median experience-hour total above which ingestion assumes a
    /// minutes-for-hours unit error and aborts. Default: 10,000
    pub unit_mismatch_median_hours: f64,

    /// Output directory for reports, master CSVs, and artifacts.
    /// Default: "outputs"
    pub output_dir: PathBuf,

    /// Whether to write the per-year master CSV for inspection.
    /// Default: true
    pub emit_master_csv: bool,

    /// Fixed seed for every stochastic step (boosting subsampling,
    /// bootstrap resampling, retry jitter). Default: 2025
    pub seed: u64,

    /// Development mode relaxes the fail-fast check on `MODEL_ENDPOINT` /
    /// `MODEL_KEY` so offline paths (ingestion, features) still run.
    /// Default: false
    pub dev_mode: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            low_score_threshold: crate::taxonomy::DEFAULT_LOW_SCORE_THRESHOLD,
            recall_target: 0.95,
            k_ratio: 0.4,
            scorer_concurrency: 3,
            max_llm_attempts: 5,
            llm_backoff_base_ms: 500,
            ranker_min_rows: 400,
            contamination_bound: 0.02,
            canary_mad_bound: 0.5,
            unit_mismatch_median_hours: 10_000.0,
            output_dir: PathBuf::from("outputs"),
            emit_master_csv: true,
            seed: 2025,
            dev_mode: false,
        }
    }
}

impl RunConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(0.5..=1.0).contains(&self.recall_target) {
            return Err(ConfigValidationError::OutOfRange {
                field: "recall_target",
                value: self.recall_target,
                lo: 0.5,
                hi: 1.0,
            });
        }
        if !(0.0..=1.0).contains(&self.k_ratio) {
            return Err(ConfigValidationError::OutOfRange {
                field: "k_ratio",
                value: self.k_ratio,
                lo: 0.0,
                hi: 1.0,
            });
        }
        if !(0.0..=1.0).contains(&self.contamination_bound) {
            return Err(ConfigValidationError::OutOfRange {
                field: "contamination_bound",
                value: self.contamination_bound,
                lo: 0.0,
                hi: 1.0,
            });
        }
        if !(1..=5).contains(&self.scorer_concurrency) {
            return Err(ConfigValidationError::InvalidConcurrency(
                self.scorer_concurrency,
            ));
        }
        if self.max_llm_attempts == 0 {
            return Err(ConfigValidationError::InvalidAttempts(self.max_llm_attempts));
        }
        if !(0..=25).contains(&self.low_score_threshold) {
            return Err(ConfigValidationError::OutOfRange {
                field: "low_score_threshold",
                value: self.low_score_threshold as f64,
                lo: 0.0,
                hi: 25.0,
            });
        }
        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid '{field}': {value} (must be between {lo} and {hi})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        lo: f64,
        hi: f64,
    },

    #[error("Invalid scorer concurrency: {0} (must be 1..=5)")]
    InvalidConcurrency(usize),

    #[error("Invalid LLM attempt bound: {0} (must be at least 1)")]
    InvalidAttempts(u32),
}

/// Builder for [`RunConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct RunConfigBuilder {
    low_score_threshold: Option<i64>,
    recall_target: Option<f64>,
    k_ratio: Option<f64>,
    scorer_concurrency: Option<usize>,
    max_llm_attempts: Option<u32>,
    llm_backoff_base_ms: Option<u64>,
    ranker_min_rows: Option<usize>,
    contamination_bound: Option<f64>,
    canary_mad_bound: Option<f64>,
    unit_mismatch_median_hours: Option<f64>,
    output_dir: Option<PathBuf>,
    emit_master_csv: Option<bool>,
    seed: Option<u64>,
    dev_mode: Option<bool>,
}

impl RunConfigBuilder {
    /// Set the low-score training threshold.
    pub fn low_score_threshold(mut self, threshold: i64) -> Self {
        self.low_score_threshold = Some(threshold);
        self
    }

    /// Set the minimum acceptable gate recall.
    pub fn recall_target(mut self, target: f64) -> Self {
        self.recall_target = Some(target);
        self
    }

    /// Set the top-K selection ratio.
    pub fn k_ratio(mut self, ratio: f64) -> Self {
        self.k_ratio = Some(ratio);
        self
    }

    /// Set the LLM scorer concurrency ceiling (1..=5).
    pub fn scorer_concurrency(mut self, ceiling: usize) -> Self {
        self.scorer_concurrency = Some(ceiling);
        self
    }

    /// Set the maximum attempts per LLM call.
    pub fn max_llm_attempts(mut self, attempts: u32) -> Self {
        self.max_llm_attempts = Some(attempts);
        self
    }

    /// Set the base backoff delay for LLM retries, in milliseconds.
    pub fn llm_backoff_base_ms(mut self, ms: u64) -> Self {
        self.llm_backoff_base_ms = Some(ms);
        self
    }

    /// Set the minimum ranker training-set size.
    pub fn ranker_min_rows(mut self, rows: usize) -> Self {
        self.ranker_min_rows = Some(rows);
        self
    }

    /// Set the contamination bound for ranker fallback expansion.
    pub fn contamination_bound(mut self, bound: f64) -> Self {
        self.contamination_bound = Some(bound);
        self
    }

    /// Set the canary mean-absolute-deviation bound.
    pub fn canary_mad_bound(mut self, bound: f64) -> Self {
        self.canary_mad_bound = Some(bound);
        self
    }

    /// Set the unit-mismatch sentinel on median experience hours.
    pub fn unit_mismatch_median_hours(mut self, hours: f64) -> Self {
        self.unit_mismatch_median_hours = Some(hours);
        self
    }

    /// Set the output directory for reports and artifacts.
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Enable or disable the per-year master CSV emit.
    pub fn emit_master_csv(mut self, emit: bool) -> Self {
        self.emit_master_csv = Some(emit);
        self
    }

    /// Set the run seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Enable development mode (relaxes env-var fail-fast for offline paths).
    pub fn dev_mode(mut self, dev: bool) -> Self {
        self.dev_mode = Some(dev);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `RunConfig` or an error if validation fails.
    pub fn build(self) -> Result<RunConfig, ConfigValidationError> {
        let defaults = RunConfig::default();
        let config = RunConfig {
            low_score_threshold: self
                .low_score_threshold
                .unwrap_or(defaults.low_score_threshold),
            recall_target: self.recall_target.unwrap_or(defaults.recall_target),
            k_ratio: self.k_ratio.unwrap_or(defaults.k_ratio),
            scorer_concurrency: self
                .scorer_concurrency
                .unwrap_or(defaults.scorer_concurrency),
            max_llm_attempts: self.max_llm_attempts.unwrap_or(defaults.max_llm_attempts),
            llm_backoff_base_ms: self
                .llm_backoff_base_ms
                .unwrap_or(defaults.llm_backoff_base_ms),
            ranker_min_rows: self.ranker_min_rows.unwrap_or(defaults.ranker_min_rows),
            contamination_bound: self
                .contamination_bound
                .unwrap_or(defaults.contamination_bound),
            canary_mad_bound: self.canary_mad_bound.unwrap_or(defaults.canary_mad_bound),
            unit_mismatch_median_hours: self
                .unit_mismatch_median_hours
                .unwrap_or(defaults.unit_mismatch_median_hours),
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            emit_master_csv: self.emit_master_csv.unwrap_or(defaults.emit_master_csv),
            seed: self.seed.unwrap_or(defaults.seed),
            dev_mode: self.dev_mode.unwrap_or(defaults.dev_mode),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.low_score_threshold, 15);
        assert_eq!(config.recall_target, 0.95);
        assert_eq!(config.scorer_concurrency, 3);
        assert_eq!(config.ranker_min_rows, 400);
        assert_eq!(config.max_llm_attempts, 5);
        assert!(config.emit_master_csv);
    }

    #[test]
    fn test_builder_custom_values() {
        let config = RunConfig::builder()
            .low_score_threshold(12)
            .recall_target(0.9)
            .scorer_concurrency(1)
            .seed(7)
            .build()
            .unwrap();

        assert_eq!(config.low_score_threshold, 12);
        assert_eq!(config.recall_target, 0.9);
        assert_eq!(config.scorer_concurrency, 1);
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn test_validation_rejects_excess_concurrency() {
        let result = RunConfig::builder().scorer_concurrency(8).build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::InvalidConcurrency(8)
        ));
    }

    #[test]
    fn test_validation_rejects_bad_recall_target() {
        let result = RunConfig::builder().recall_target(1.5).build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::OutOfRange { field: "recall_target", .. }
        ));
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = RunConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.low_score_threshold, back.low_score_threshold);
        assert_eq!(config.seed, back.seed);
    }
}
