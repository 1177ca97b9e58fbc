//! Admissions Triage Processing Library
//!
//! The data half of the admissions triage core, built on Rust and Polars.
//!
//! # Overview
//!
//! This library provides the pipeline from raw per-cycle exports to a
//! model-ready feature matrix:
//!
//! - **Dataset preparation**: header normalization, alias resolution,
//!   referential audit, 1-to-many aggregation, and re-applicant dedup
//!   into a unified one-row-per-applicant frame
//! - **LLM rubric scoring**: 21 atomic per-dimension model calls per
//!   applicant with retries, rate-limit pacing, a resume-safe cache, and
//!   reproducibility pinning
//! - **Feature pipeline**: leakage-safe fit/transform with fitted
//!   imputation statistics, composite engineering, and multi-version
//!   rubric loading
//! - **Run reporting**: structured quality warnings with remediation
//!   hints, aggregated into a single end-of-run report
//! - **Progress reporting**: monotonic progress updates with cancellation
//!   support
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use triage_processing::config::RunConfig;
//! use triage_processing::features::FeaturePipeline;
//! use triage_processing::ingest::{self, CancellationToken, CycleSource, NullProgressReporter};
//! use triage_processing::reporting::RunReport;
//!
//! let config = RunConfig::builder().low_score_threshold(15).build()?;
//! let report = RunReport::new();
//!
//! // Raw files → unified frame
//! let dataset = ingest::prepare_dataset(
//!     CycleSource::Years { root: "data".into(), years: vec![2023, 2024] },
//!     &config,
//!     &report,
//!     &NullProgressReporter,
//!     &CancellationToken::new(),
//! )?;
//!
//! // Rubric cache + unified frame → feature matrix
//! let rubric = triage_processing::features::load_rubric_frame("rubric_cache.json".as_ref())?;
//! let mut pipeline = FeaturePipeline::new(report.clone());
//! let features = pipeline.fit_transform(&dataset.frame, &rubric)?;
//! pipeline.save("outputs/feature_pipeline.json".as_ref())?;
//! ```
//!
//! # LLM Scoring
//!
//! The scorer is behind the default-on `llm` feature; see [`rubric`] for
//! the provider seam and concurrency contract.
//!
//! # Error Handling
//!
//! Fatal conditions use [`ProcessingError`] (see the variants for the
//! taxonomy); non-fatal findings accumulate on a [`RunReport`] and never
//! abort a run.

pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod reporting;
pub mod rubric;
pub mod taxonomy;
pub mod utils;

// Re-exports for convenient access
pub use config::{RunConfig, RunConfigBuilder};
pub use error::{ProcessingError, Result, TransportError};
pub use features::{
    FeatureMarginal, FeaturePipeline, LoadedRubric, TrainingMetadata, load_rubric_frame,
};
pub use ingest::{
    CancellationToken, ClosureProgressReporter, CycleSource, IngestStage, NullProgressReporter,
    ProgressReporter, ProgressUpdate, UnifiedDataset, prepare_dataset,
};
pub use reporting::{QualityWarning, RunReport, RunReportDocument, WarningKind};
pub use rubric::{RubricCache, ScoreRecord};
pub use taxonomy::{LogicalFile, RubricVersion, assign_tier, canonicalize};
