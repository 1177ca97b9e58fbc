//! Progress reporting and cancellation support for dataset preparation.
//!
//! Percentages reported to callers are guaranteed non-decreasing across the
//! entire run, including nested per-file sub-stages: the reporter clamps
//! every update to the high-water mark before forwarding it.
//!
//! # Example
//!
//! ```rust,ignore
//! use triage_processing::ingest::{CancellationToken, prepare_dataset};
//!
//! let token = CancellationToken::new();
//! let frame = prepare_dataset(source, &config, &report, |update| {
//!     println!("[{:>3.0}%] {}", update.progress * 100.0, update.message);
//! }, &token)?;
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Stages of dataset preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    /// Resolving logical files to concrete paths
    Locating,
    /// Reading files and normalizing headers
    Reading,
    /// Referential audit (orphans, coverage, row bands, units)
    Auditing,
    /// Aggregating 1-to-many tables
    Aggregating,
    /// Left-joining onto the applicant table
    Joining,
    /// Dropping high-missingness columns, normalizing indicators
    Cleaning,
    /// Collapsing re-applicants to the most recent cycle
    Deduplicating,
    /// Writing the unified frame and master CSV
    Emitting,
    /// Preparation completed successfully
    Complete,
    /// Preparation was cancelled by the caller
    Cancelled,
    /// Preparation failed with an error
    Failed,
}

impl IngestStage {
    /// Human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Locating => "Locating Files",
            Self::Reading => "Reading & Normalizing",
            Self::Auditing => "Referential Audit",
            Self::Aggregating => "Aggregating Tables",
            Self::Joining => "Joining",
            Self::Cleaning => "Cleaning",
            Self::Deduplicating => "Deduplicating Re-applicants",
            Self::Emitting => "Writing Outputs",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }

    /// Typical weight of this stage in the overall run (0.0 - 1.0).
    pub fn weight(&self) -> f32 {
        match self {
            Self::Locating => 0.03,
            Self::Reading => 0.30,
            Self::Auditing => 0.12,
            Self::Aggregating => 0.25,
            Self::Joining => 0.10,
            Self::Cleaning => 0.08,
            Self::Deduplicating => 0.04,
            Self::Emitting => 0.08,
            Self::Complete | Self::Cancelled | Self::Failed => 0.0,
        }
    }

    /// Cumulative progress at the start of this stage.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Locating => 0.0,
            Self::Reading => 0.03,
            Self::Auditing => 0.33,
            Self::Aggregating => 0.45,
            Self::Joining => 0.70,
            Self::Cleaning => 0.80,
            Self::Deduplicating => 0.88,
            Self::Emitting => 0.92,
            Self::Complete => 1.0,
            Self::Cancelled | Self::Failed => 0.0,
        }
    }
}

/// A single progress update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Current stage
    pub stage: IngestStage,

    /// Optional sub-stage (e.g. "file: experiences")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<String>,

    /// Overall progress (0.0 - 1.0), non-decreasing across the run
    pub progress: f32,

    /// Human-readable message
    pub message: String,
}

impl ProgressUpdate {
    /// Creates an update for a stage at the given within-stage fraction.
    pub fn new(stage: IngestStage, stage_progress: f32, message: impl Into<String>) -> Self {
        let progress = stage.base_progress() + stage.weight() * stage_progress.clamp(0.0, 1.0);
        Self {
            stage,
            sub_stage: None,
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
        }
    }

    /// Creates an update with sub-stage information.
    pub fn with_sub_stage(
        stage: IngestStage,
        sub_stage: impl Into<String>,
        stage_progress: f32,
        message: impl Into<String>,
    ) -> Self {
        let mut update = Self::new(stage, stage_progress, message);
        update.sub_stage = Some(sub_stage.into());
        update
    }

    /// Creates a completion update.
    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            stage: IngestStage::Complete,
            sub_stage: None,
            progress: 1.0,
            message: message.into(),
        }
    }
}

/// Trait for receiving progress updates during preparation.
///
/// Implementations must be `Send + Sync`; the scorer may forward updates
/// from concurrent tasks.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Closure-backed [`ProgressReporter`].
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// No-op reporter for callers that do not track progress.
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Wrapper enforcing the non-decreasing-percentage contract.
///
/// Updates whose overall progress would move backwards (possible when a
/// nested sub-stage restarts its local fraction) are clamped to the
/// high-water mark before being forwarded.
pub struct MonotonicProgress<'a> {
    inner: &'a dyn ProgressReporter,
    // progress * 1e6, so the high-water mark fits an atomic
    high_water: AtomicU32,
}

impl<'a> MonotonicProgress<'a> {
    pub fn new(inner: &'a dyn ProgressReporter) -> Self {
        Self {
            inner,
            high_water: AtomicU32::new(0),
        }
    }

    pub fn report(&self, mut update: ProgressUpdate) {
        let scaled = (update.progress * 1_000_000.0) as u32;
        let prev = self.high_water.fetch_max(scaled, Ordering::SeqCst);
        if scaled < prev {
            update.progress = prev as f32 / 1_000_000.0;
        }
        self.inner.report(update);
    }
}

/// Token for cancelling a running preparation or scoring batch.
///
/// Clones share state; call [`cancel()`](Self::cancel) from any thread.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Thread-safe.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(crate::error::ProcessingError::Cancelled)
        } else {
            Ok(())
        }
    }
}
