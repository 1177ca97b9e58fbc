//! Referential and plausibility audit over the loaded file set.
//!
//! Runs after reading and before aggregation:
//!
//! - **Orphans** (fatal): auxiliary rows whose applicant ID is absent from
//!   the applicant table, reported with counts by file.
//! - **Coverage** (warning): fraction of applicants each auxiliary file
//!   covers, checked against the per-file floor.
//! - **Units** (fatal): an experience-hours median above the configured
//!   sentinel means minutes were exported as hours.

use std::collections::{BTreeMap, HashSet};
use tracing::info;

use crate::config::RunConfig;
use crate::error::{ProcessingError, Result};
use crate::ingest::loader::LoadedFile;
use crate::reporting::{QualityWarning, RunReport, WarningKind};
use crate::taxonomy::{AMCAS_ID, EXP_HOUR_TOTAL, LogicalFile};
use crate::utils::{column_median, distinct_ids};

/// Run the full audit over one cycle's loaded files.
///
/// `applicants` must be the applicant table; `auxiliary` the remaining
/// loaded files for the same cycle.
pub fn audit_cycle(
    applicants: &LoadedFile,
    auxiliary: &[&LoadedFile],
    config: &RunConfig,
    report: &RunReport,
) -> Result<()> {
    let applicant_ids: HashSet<i64> = distinct_ids(&applicants.frame, AMCAS_ID)?
        .into_iter()
        .collect();

    check_orphans(&applicant_ids, auxiliary)?;
    check_coverage(&applicant_ids, auxiliary, report)?;
    check_units(auxiliary, config)?;

    Ok(())
}

/// Any auxiliary ID not present in the applicant table is an orphan;
/// one or more orphans abort the run with counts by file.
fn check_orphans(applicant_ids: &HashSet<i64>, auxiliary: &[&LoadedFile]) -> Result<()> {
    let mut counts_by_file: BTreeMap<String, usize> = BTreeMap::new();

    for loaded in auxiliary {
        let ids = distinct_ids(&loaded.frame, AMCAS_ID)?;
        let orphans = ids
            .iter()
            .filter(|id| !applicant_ids.contains(id))
            .count();
        if orphans > 0 {
            counts_by_file.insert(loaded.logical.display_name().to_string(), orphans);
        }
    }

    if counts_by_file.is_empty() {
        Ok(())
    } else {
        Err(ProcessingError::OrphanIds { counts_by_file })
    }
}

/// Log coverage per file; warn below the configured floor.
fn check_coverage(
    applicant_ids: &HashSet<i64>,
    auxiliary: &[&LoadedFile],
    report: &RunReport,
) -> Result<()> {
    if applicant_ids.is_empty() {
        return Ok(());
    }

    for loaded in auxiliary {
        let ids: HashSet<i64> = distinct_ids(&loaded.frame, AMCAS_ID)?.into_iter().collect();
        let covered = ids.intersection(applicant_ids).count();
        let coverage = covered as f64 / applicant_ids.len() as f64;

        info!(
            file = loaded.logical.display_name(),
            coverage = format!("{coverage:.3}"),
            "id coverage"
        );

        if let Some(floor) = loaded.logical.coverage_threshold() {
            if coverage < floor {
                report.record(
                    QualityWarning::new(
                        WarningKind::LowCoverage,
                        format!("coverage {coverage:.3} below floor {floor:.2}"),
                    )
                    .with_file(loaded.logical.display_name()),
                );
            }
        }
    }

    Ok(())
}

/// Experience hours with a median above the sentinel were almost certainly
/// exported in minutes.
fn check_units(auxiliary: &[&LoadedFile], config: &RunConfig) -> Result<()> {
    for loaded in auxiliary {
        if loaded.logical != LogicalFile::Experiences {
            continue;
        }
        if loaded.frame.column(EXP_HOUR_TOTAL).is_err() {
            continue;
        }
        if let Some(median) = column_median(&loaded.frame, EXP_HOUR_TOTAL)? {
            if median > config.unit_mismatch_median_hours {
                return Err(ProcessingError::UnitMismatch {
                    column: EXP_HOUR_TOTAL.to_string(),
                    median,
                    hint: "Values look like minutes; divide by 60 before ingestion.".to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn loaded(logical: LogicalFile, frame: DataFrame) -> LoadedFile {
        LoadedFile {
            logical,
            year: 2025,
            frame,
        }
    }

    fn applicants(ids: &[i64]) -> LoadedFile {
        loaded(LogicalFile::Applicants, df!(AMCAS_ID => ids).unwrap())
    }

    #[test]
    fn test_orphan_id_is_fatal_with_file_count() {
        let apps = applicants(&[1, 2, 3]);
        let exp = loaded(
            LogicalFile::Experiences,
            df!(AMCAS_ID => &[1i64, 2, 99_999_999]).unwrap(),
        );
        let config = RunConfig::default();
        let report = RunReport::new();

        let err = audit_cycle(&apps, &[&exp], &config, &report).unwrap_err();
        match err {
            ProcessingError::OrphanIds { counts_by_file } => {
                assert_eq!(counts_by_file["experiences"], 1);
            }
            other => panic!("expected OrphanIds, got {other:?}"),
        }
    }

    #[test]
    fn test_low_coverage_warns_but_passes() {
        let apps = applicants(&[1, 2, 3, 4]);
        // Personal statement covers 2/4 = 0.5 < 0.99 floor.
        let ps = loaded(
            LogicalFile::PersonalStatement,
            df!(AMCAS_ID => &[1i64, 2]).unwrap(),
        );
        let config = RunConfig::default();
        let report = RunReport::new();

        audit_cycle(&apps, &[&ps], &config, &report).unwrap();
        assert_eq!(report.count_of(WarningKind::LowCoverage), 1);
    }

    #[test]
    fn test_unit_mismatch_median_is_fatal_with_hint() {
        let apps = applicants(&[1, 2, 3]);
        let exp = loaded(
            LogicalFile::Experiences,
            df!(
                AMCAS_ID => &[1i64, 2, 3],
                EXP_HOUR_TOTAL => &[17_000.0f64, 18_000.0, 19_000.0],
            )
            .unwrap(),
        );
        let config = RunConfig::default();
        let report = RunReport::new();

        let err = audit_cycle(&apps, &[&exp], &config, &report).unwrap_err();
        match &err {
            ProcessingError::UnitMismatch { median, hint, .. } => {
                assert_eq!(*median, 18_000.0);
                assert!(hint.contains("divide by 60"));
            }
            other => panic!("expected UnitMismatch, got {other:?}"),
        }
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_plausible_hours_pass() {
        let apps = applicants(&[1, 2]);
        let exp = loaded(
            LogicalFile::Experiences,
            df!(
                AMCAS_ID => &[1i64, 2],
                EXP_HOUR_TOTAL => &[120.0f64, 450.0],
            )
            .unwrap(),
        );
        let config = RunConfig::default();
        let report = RunReport::new();
        audit_cycle(&apps, &[&exp], &config, &report).unwrap();
        assert!(report.is_empty());
    }
}
