//! File location and normalized reading for per-cycle inputs.
//!
//! Responsible for stage 1 of dataset preparation: resolving logical file
//! names to concrete paths (conventional `raw/<year>/` layout or an
//! explicit upload map), reading tabular content, canonicalizing headers,
//! resolving the applicant-ID column, and patching known typos.

use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ProcessingError, Result};
use crate::reporting::{QualityWarning, RunReport, WarningKind};
use crate::taxonomy::{self, AMCAS_ID, APP_YEAR, LogicalFile};

/// Where a cycle's files come from.
#[derive(Debug, Clone)]
pub enum CycleSource {
    /// Conventional layout: `<root>/raw/<year>/<stem>_<year>.csv`.
    Years { root: PathBuf, years: Vec<i32> },
    /// Explicit logical-name → path mapping (scoring-time upload path).
    /// The cycle year labels the rows; files are taken as-is.
    Files {
        year: i32,
        files: HashMap<LogicalFile, PathBuf>,
    },
}

/// A loaded, header-normalized file.
#[derive(Debug)]
pub struct LoadedFile {
    pub logical: LogicalFile,
    pub year: i32,
    pub frame: DataFrame,
}

/// Resolve the conventional path set for one cycle year.
///
/// Required files must exist; optional files are silently skipped when
/// absent. The schools table tolerates year-variant stems.
pub fn locate_files(root: &Path, year: i32) -> Result<HashMap<LogicalFile, PathBuf>> {
    let dir = root.join("raw").join(year.to_string());
    let mut found = HashMap::new();

    for logical in LogicalFile::ALL {
        let mut candidates = vec![format!("{}_{}.csv", logical.stem(), year)];
        candidates.extend(
            logical
                .alternate_stems()
                .iter()
                .map(|stem| format!("{stem}_{year}.csv")),
        );
        // Some exports omit the year suffix.
        candidates.push(format!("{}.csv", logical.stem()));

        let path = candidates.iter().map(|c| dir.join(c)).find(|p| p.exists());

        match path {
            Some(path) => {
                debug!(file = logical.display_name(), path = %path.display(), "located");
                found.insert(*logical, path);
            }
            None if logical.is_required() => {
                return Err(ProcessingError::MissingInput {
                    logical: logical.display_name().to_string(),
                    path: dir.join(format!("{}_{}.csv", logical.stem(), year)),
                });
            }
            None => {
                debug!(file = logical.display_name(), "optional file absent, skipping");
            }
        }
    }

    Ok(found)
}

/// Validate an explicit file map: every required logical file must be
/// present and every listed path must exist.
pub fn validate_file_map(files: &HashMap<LogicalFile, PathBuf>) -> Result<()> {
    for logical in LogicalFile::ALL {
        if logical.is_required() && !files.contains_key(logical) {
            return Err(ProcessingError::Configuration(format!(
                "file map is missing required logical file '{}'",
                logical.display_name()
            )));
        }
    }
    for (logical, path) in files {
        if !path.exists() {
            return Err(ProcessingError::MissingInput {
                logical: logical.display_name().to_string(),
                path: path.clone(),
            });
        }
    }
    Ok(())
}

/// Read one file and normalize it: canonical headers, resolved ID column,
/// typo patches, row-band and year-marker checks.
pub fn read_normalized(
    path: &Path,
    logical: LogicalFile,
    year: i32,
    report: &RunReport,
) -> Result<LoadedFile> {
    let mut frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1_000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    normalize_headers(&mut frame, logical, report)?;
    ensure_id_column(&frame, logical)?;
    check_row_band(&frame, logical, report);
    check_year_markers(&frame, logical, year, report);

    info!(
        file = logical.display_name(),
        rows = frame.height(),
        cols = frame.width(),
        "loaded"
    );

    Ok(LoadedFile {
        logical,
        year,
        frame,
    })
}

/// Canonicalize every header, recording typo patches. Duplicate canonical
/// names are a schema violation (two raw headers collapsed to one name).
fn normalize_headers(
    frame: &mut DataFrame,
    logical: LogicalFile,
    report: &RunReport,
) -> Result<()> {
    let raw_names: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut canonical = Vec::with_capacity(raw_names.len());
    for raw in &raw_names {
        let name = taxonomy::canonicalize(raw);

        for (typo, fixed) in taxonomy::KNOWN_TYPO_PATCHES {
            if name == *fixed && raw.trim().replace(' ', "_").eq_ignore_ascii_case(typo) {
                report.record(
                    QualityWarning::new(
                        WarningKind::TypoPatched,
                        format!("header '{raw}' patched to '{fixed}'"),
                    )
                    .with_file(logical.display_name())
                    .with_column(*fixed),
                );
            }
        }

        canonical.push(name);
    }

    let mut seen = std::collections::HashSet::new();
    for name in &canonical {
        if !seen.insert(name.clone()) {
            return Err(ProcessingError::Schema {
                file: logical.display_name().to_string(),
                detail: format!("two headers canonicalize to '{name}'"),
            });
        }
    }

    frame.set_column_names(canonical.iter().map(String::as_str))?;
    Ok(())
}

/// Every input table is keyed by the applicant ID; fail fast when alias
/// resolution did not produce one.
fn ensure_id_column(frame: &DataFrame, logical: LogicalFile) -> Result<()> {
    if frame.column(AMCAS_ID).is_ok() {
        return Ok(());
    }
    Err(ProcessingError::MissingIdColumn {
        file: logical.display_name().to_string(),
        columns: frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect(),
    })
}

fn check_row_band(frame: &DataFrame, logical: LogicalFile, report: &RunReport) {
    let (lo, hi) = logical.plausible_rows();
    let rows = frame.height();
    if rows < lo || rows > hi {
        report.record(
            QualityWarning::new(
                WarningKind::RowCountOutOfBand,
                format!("{rows} rows, expected {lo}..={hi}"),
            )
            .with_file(logical.display_name()),
        );
    }
}

/// Compare in-file year markers against the requested cycle year.
fn check_year_markers(frame: &DataFrame, logical: LogicalFile, year: i32, report: &RunReport) {
    let Ok(column) = frame.column(APP_YEAR) else {
        return;
    };
    let Ok(casted) = column.as_materialized_series().cast(&DataType::Int64) else {
        return;
    };
    let Ok(values) = casted.i64() else {
        return;
    };

    let mismatched = values
        .into_iter()
        .flatten()
        .filter(|v| *v != year as i64)
        .count();
    if mismatched > 0 {
        report.record(
            QualityWarning::new(
                WarningKind::YearMismatch,
                format!("{mismatched} rows carry a year other than {year}"),
            )
            .with_file(logical.display_name())
            .with_column(APP_YEAR),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_csv(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_locate_files_missing_required_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("raw/2025")).unwrap();

        let err = locate_files(dir.path(), 2025).unwrap_err();
        assert!(matches!(err, ProcessingError::MissingInput { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_locate_files_accepts_schools_variant() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw/2025");
        fs::create_dir_all(&raw).unwrap();
        for stem in [
            "applicants_2025",
            "experiences_2025",
            "personal_statement_2025",
            "gpa_trend_2025",
            "schools_year_2025",
        ] {
            write_csv(&raw, &format!("{stem}.csv"), "Amcas_ID\n1\n");
        }

        let found = locate_files(dir.path(), 2025).unwrap();
        assert!(found.contains_key(&LogicalFile::Schools));
        assert!(found[&LogicalFile::Schools].ends_with("schools_year_2025.csv"));
    }

    #[test]
    fn test_read_normalized_resolves_id_alias_and_typo() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "applicants.csv",
            "AMCAS ID,Disadvantanged_Ind,total gpa\n101,Yes,3.5\n102,No,3.9\n",
        );
        let report = RunReport::new();
        let loaded =
            read_normalized(&path, LogicalFile::Applicants, 2025, &report).unwrap();

        let names: Vec<String> = loaded
            .frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, vec!["Amcas_ID", "Disadvantaged_Ind", "Total_GPA"]);
        assert_eq!(report.count_of(WarningKind::TypoPatched), 1);
    }

    #[test]
    fn test_read_normalized_missing_id_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "broken.csv", "Name,Total_GPA\nA,3.0\n");
        let report = RunReport::new();

        let err = read_normalized(&path, LogicalFile::Applicants, 2025, &report).unwrap_err();
        assert!(matches!(err, ProcessingError::MissingIdColumn { .. }));
    }

    #[test]
    fn test_year_marker_mismatch_is_warning_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "applicants.csv",
            "Amcas_ID,App_Year\n1,2024\n2,2025\n",
        );
        let report = RunReport::new();
        let loaded = read_normalized(&path, LogicalFile::Applicants, 2025, &report).unwrap();

        assert_eq!(loaded.frame.height(), 2);
        assert_eq!(report.count_of(WarningKind::YearMismatch), 1);
    }

    #[test]
    fn test_row_band_warning() {
        let dir = tempfile::tempdir().unwrap();
        // Two applicant rows is far below the plausible band.
        let path = write_csv(dir.path(), "applicants.csv", "Amcas_ID\n1\n2\n");
        let report = RunReport::new();
        read_normalized(&path, LogicalFile::Applicants, 2025, &report).unwrap();
        assert_eq!(report.count_of(WarningKind::RowCountOutOfBand), 1);
    }
}
