//! Structured run reporting: quality warnings and the end-of-run report.
//!
//! Non-fatal findings (coverage shortfalls, unknown experience types,
//! clipped scores, row counts outside the plausible band) are not errors.
//! Each stage records them on a shared [`RunReport`], which aggregates
//! counts by kind and writes a single structured report listing kind,
//! location, count, and remediation hint.

use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;

/// Kinds of non-fatal quality findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Auxiliary-file coverage of applicant IDs below the configured floor.
    LowCoverage,
    /// Row count outside the plausible band for the file.
    RowCountOutOfBand,
    /// Experience type absent from the bucket map; hours ignored.
    UnknownExperienceType,
    /// Parent-education level absent from the ordinal map; defaulted.
    UnknownParentEducation,
    /// GPA-trend category absent from the ordinal map; defaulted.
    UnknownGpaTrend,
    /// Rubric score outside the scale, clipped into range.
    ScoreClipped,
    /// Known header typo patched during normalization.
    TypoPatched,
    /// In-file year markers disagree with the requested cycle year.
    YearMismatch,
    /// Re-applicant rows collapsed to the most recent cycle.
    ReapplicantDeduplicated,
    /// An LLM dimension exhausted retries and was recorded as null.
    NullScoreRecorded,
    /// Extra columns at transform time, ignored.
    ExtraFeatureColumns,
    /// Gate passed fewer applicants than the requested K.
    ShortPool,
}

impl WarningKind {
    /// Remediation hint surfaced in the run report.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::LowCoverage => "check the upstream export for dropped applicants",
            Self::RowCountOutOfBand => "confirm the file belongs to the requested cycle",
            Self::UnknownExperienceType => "add the type to the experience bucket map",
            Self::UnknownParentEducation => "add the level to the parent-education map",
            Self::UnknownGpaTrend => "add the category to the GPA-trend map",
            Self::ScoreClipped => "inspect the model output for schema drift",
            Self::TypoPatched => "fix the header at the source",
            Self::YearMismatch => "verify the file path matches the cycle year",
            Self::ReapplicantDeduplicated => "expected for re-applicants; no action",
            Self::NullScoreRecorded => "re-run with --resume to re-score missing dimensions",
            Self::ExtraFeatureColumns => "columns not in the fitted ordering are ignored",
            Self::ShortPool => "lower the gate threshold only via retraining, never ad hoc",
        }
    }
}

/// A single quality finding with its location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityWarning {
    pub kind: WarningKind,
    /// Logical file the finding came from, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Column involved, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Applicant involved, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amcas_id: Option<i64>,
    /// Human-readable detail.
    pub detail: String,
}

impl QualityWarning {
    pub fn new(kind: WarningKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            file: None,
            column: None,
            amcas_id: None,
            detail: detail.into(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_amcas_id(mut self, id: i64) -> Self {
        self.amcas_id = Some(id);
        self
    }
}

/// Shared, thread-safe accumulator for a run's warnings.
///
/// Cloning is cheap; all clones append to the same underlying report. The
/// scorer's concurrent tasks and the single-threaded ingestion stages both
/// record through this handle.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    warnings: Arc<Mutex<Vec<QualityWarning>>>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning. Also mirrors it to the log at `warn` level so the
    /// operator sees findings as they happen, not only at the end.
    pub fn record(&self, warning: QualityWarning) {
        warn!(
            kind = ?warning.kind,
            file = warning.file.as_deref().unwrap_or("-"),
            column = warning.column.as_deref().unwrap_or("-"),
            "{}",
            warning.detail
        );
        self.warnings.lock().push(warning);
    }

    /// Number of warnings recorded so far.
    pub fn len(&self) -> usize {
        self.warnings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.lock().is_empty()
    }

    /// Count of warnings of a given kind.
    pub fn count_of(&self, kind: WarningKind) -> usize {
        self.warnings.lock().iter().filter(|w| w.kind == kind).count()
    }

    /// Snapshot of all warnings recorded so far.
    pub fn snapshot(&self) -> Vec<QualityWarning> {
        self.warnings.lock().clone()
    }

    /// Build the aggregate report document.
    pub fn summarize(&self) -> RunReportDocument {
        let warnings = self.snapshot();
        let mut counts_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for w in &warnings {
            *counts_by_kind
                .entry(format!("{:?}", w.kind))
                .or_default() += 1;
        }
        let hints = warnings
            .iter()
            .map(|w| (format!("{:?}", w.kind), w.kind.hint().to_string()))
            .collect::<BTreeMap<_, _>>();

        RunReportDocument {
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            total_warnings: warnings.len(),
            counts_by_kind,
            remediation_hints: hints,
            warnings,
        }
    }

    /// Write the aggregate report as JSON to `dir/run_report.json`.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let doc = self.summarize();
        let path = dir.join("run_report.json");
        fs::write(&path, serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }
}

/// The serialized end-of-run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReportDocument {
    /// Timestamp when the report was generated.
    pub generated_at: String,
    /// Total number of warnings across the run.
    pub total_warnings: usize,
    /// Aggregate counts by warning kind.
    pub counts_by_kind: BTreeMap<String, usize>,
    /// One remediation hint per kind observed.
    pub remediation_hints: BTreeMap<String, String>,
    /// Every individual finding with its location.
    pub warnings: Vec<QualityWarning>,
}

static_assertions::assert_impl_all!(RunReport: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let report = RunReport::new();
        assert!(report.is_empty());

        report.record(
            QualityWarning::new(WarningKind::LowCoverage, "secondary coverage 0.62")
                .with_file("secondary_applications"),
        );
        report.record(QualityWarning::new(
            WarningKind::ScoreClipped,
            "ps_motivation scored 6, clipped to 4",
        ));
        report.record(QualityWarning::new(
            WarningKind::ScoreClipped,
            "exp_research scored 0, clipped to 1",
        ));

        assert_eq!(report.len(), 3);
        assert_eq!(report.count_of(WarningKind::ScoreClipped), 2);
        assert_eq!(report.count_of(WarningKind::LowCoverage), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let report = RunReport::new();
        let clone = report.clone();
        clone.record(QualityWarning::new(WarningKind::TypoPatched, "patched"));
        assert_eq!(report.len(), 1);
    }

    #[test]
    fn test_summary_aggregates_by_kind() {
        let report = RunReport::new();
        for _ in 0..3 {
            report.record(QualityWarning::new(
                WarningKind::UnknownExperienceType,
                "type 'Intercollegiate Athletics' ignored",
            ));
        }
        let doc = report.summarize();
        assert_eq!(doc.total_warnings, 3);
        assert_eq!(doc.counts_by_kind["UnknownExperienceType"], 3);
        assert!(
            doc.remediation_hints["UnknownExperienceType"].contains("bucket map"),
            "hint should point at the bucket map"
        );
    }

    #[test]
    fn test_write_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let report = RunReport::new();
        report.record(QualityWarning::new(WarningKind::YearMismatch, "2024 vs 2025"));
        report.write_to(dir.path()).unwrap();

        let written = std::fs::read_to_string(dir.path().join("run_report.json")).unwrap();
        assert!(written.contains("year_mismatch"));
        assert!(written.contains("2024 vs 2025"));
    }
}
