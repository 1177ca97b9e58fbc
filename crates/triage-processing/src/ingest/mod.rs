//! Dataset preparation: from raw per-cycle files to the unified
//! one-row-per-applicant frame.
//!
//! The public entry point is [`prepare_dataset`]. Stages run in a fixed
//! order — locate, read & normalize, audit, aggregate, join, clean,
//! deduplicate, emit — with progress reported through a monotonic
//! callback and cancellation checked between stages.
//!
//! This component never imputes numeric missing values; imputation is a
//! fitted statistic and belongs to the feature pipeline.

pub mod aggregate;
pub mod audit;
pub mod loader;
pub mod progress;

use polars::prelude::*;
use std::collections::HashMap;
use std::fs;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::error::{ProcessingError, Result};
use crate::reporting::{QualityWarning, RunReport, WarningKind};
use crate::taxonomy::{AMCAS_ID, APP_YEAR, HIGH_MISSINGNESS_DROP, LogicalFile};
use crate::utils::normalize_indicator_column;

pub use loader::{CycleSource, LoadedFile};
pub use progress::{
    CancellationToken, ClosureProgressReporter, IngestStage, MonotonicProgress,
    NullProgressReporter, ProgressReporter, ProgressUpdate,
};

/// Canonical names for columns derived during cleaning.
pub const MCAT_TOTAL: &str = "MCAT_Total";
pub const MCAT_AVAILABLE_IND: &str = "MCAT_Available_Ind";
pub const PERSONAL_STATEMENT: &str = "Personal_Statement";
pub const ESSAY_TEXT: &str = "Essay_Text";

/// The unified dataset: one structured row per applicant plus the free
/// text kept aside for the rubric scorer (text never joins the frame).
#[derive(Debug)]
pub struct UnifiedDataset {
    /// One row per applicant, keyed by `Amcas_ID`, with `App_Year`.
    pub frame: DataFrame,
    /// Personal statement per applicant.
    pub personal_statements: HashMap<i64, String>,
    /// Concatenated secondary-essay responses per applicant.
    pub secondary_texts: HashMap<i64, String>,
    /// Per-domain experience descriptions per applicant.
    pub experience_texts: HashMap<i64, HashMap<String, String>>,
}

/// Prepare the unified dataset for one or more cycle years.
///
/// See the module docs for the stage order. Fatal conditions follow the
/// error taxonomy (missing required file, unresolvable ID column, orphaned
/// auxiliary IDs, unit mismatch); everything else is recorded on `report`
/// and the run continues.
pub fn prepare_dataset(
    source: CycleSource,
    config: &RunConfig,
    report: &RunReport,
    reporter: &dyn ProgressReporter,
    token: &CancellationToken,
) -> Result<UnifiedDataset> {
    let monotonic = MonotonicProgress::new(reporter);

    let cycles: Vec<(i32, HashMap<LogicalFile, std::path::PathBuf>)> = match source {
        CycleSource::Years { root, years } => {
            monotonic.report(ProgressUpdate::new(
                IngestStage::Locating,
                0.0,
                "resolving conventional file layout",
            ));
            let mut cycles = Vec::with_capacity(years.len());
            for year in years {
                cycles.push((year, loader::locate_files(&root, year)?));
            }
            cycles
        }
        CycleSource::Files { year, files } => {
            monotonic.report(ProgressUpdate::new(
                IngestStage::Locating,
                0.0,
                "validating explicit file map",
            ));
            loader::validate_file_map(&files)?;
            vec![(year, files)]
        }
    };
    token.check()?;

    let mut yearly_frames: Vec<DataFrame> = Vec::new();
    let mut personal_statements: HashMap<i64, String> = HashMap::new();
    let mut secondary_texts: HashMap<i64, String> = HashMap::new();
    let mut experience_texts: HashMap<i64, HashMap<String, String>> = HashMap::new();

    let n_cycles = cycles.len().max(1);
    for (cycle_idx, (year, files)) in cycles.into_iter().enumerate() {
        let cycle_frac = cycle_idx as f32 / n_cycles as f32;
        let unified = prepare_cycle(
            year,
            &files,
            config,
            report,
            &monotonic,
            token,
            cycle_frac,
            1.0 / n_cycles as f32,
            &mut personal_statements,
            &mut secondary_texts,
            &mut experience_texts,
        )?;
        yearly_frames.push(unified);
    }

    token.check()?;
    monotonic.report(ProgressUpdate::new(
        IngestStage::Deduplicating,
        0.0,
        "collapsing re-applicants",
    ));

    let mut combined = if yearly_frames.len() == 1 {
        yearly_frames.pop().expect("one frame")
    } else {
        polars::functions::concat_df_diagonal(&yearly_frames)?
    };
    combined = deduplicate_reapplicants(combined, report)?;

    monotonic.report(ProgressUpdate::new(
        IngestStage::Emitting,
        0.5,
        "writing unified frame",
    ));
    if config.emit_master_csv {
        emit_master_csv(&mut combined, config)?;
    }

    monotonic.report(ProgressUpdate::complete(format!(
        "unified frame ready: {} applicants",
        combined.height()
    )));

    Ok(UnifiedDataset {
        frame: combined,
        personal_statements,
        secondary_texts,
        experience_texts,
    })
}

#[allow(clippy::too_many_arguments)]
fn prepare_cycle(
    year: i32,
    files: &HashMap<LogicalFile, std::path::PathBuf>,
    config: &RunConfig,
    report: &RunReport,
    monotonic: &MonotonicProgress<'_>,
    token: &CancellationToken,
    base_frac: f32,
    span: f32,
    personal_statements: &mut HashMap<i64, String>,
    secondary_texts: &mut HashMap<i64, String>,
    experience_texts: &mut HashMap<i64, HashMap<String, String>>,
) -> Result<DataFrame> {
    let sub = |stage: IngestStage, frac: f32, msg: String| {
        ProgressUpdate::with_sub_stage(stage, format!("cycle {year}"), base_frac + frac * span, msg)
    };

    // Stage: read & normalize.
    let mut loaded: HashMap<LogicalFile, LoadedFile> = HashMap::new();
    let total_files = files.len();
    for (idx, (logical, path)) in files.iter().enumerate() {
        token.check()?;
        monotonic.report(sub(
            IngestStage::Reading,
            idx as f32 / total_files as f32,
            format!("reading {}", logical.display_name()),
        ));
        loaded.insert(*logical, loader::read_normalized(path, *logical, year, report)?);
    }

    // Stage: referential audit.
    token.check()?;
    monotonic.report(sub(IngestStage::Auditing, 0.0, "auditing references".into()));
    let applicants = loaded
        .remove(&LogicalFile::Applicants)
        .ok_or_else(|| ProcessingError::Configuration("applicants file not loaded".into()))?;
    {
        let auxiliary: Vec<&LoadedFile> = loaded.values().collect();
        audit::audit_cycle(&applicants, &auxiliary, config, report)?;
    }

    // Stage: aggregate 1-to-many tables.
    token.check()?;
    monotonic.report(sub(IngestStage::Aggregating, 0.0, "aggregating".into()));
    let mut joins: Vec<DataFrame> = Vec::new();

    if let Some(experiences) = loaded.get(&LogicalFile::Experiences) {
        joins.push(aggregate::aggregate_experiences(&experiences.frame, report)?);
        for (id, texts) in aggregate::collect_experience_texts(&experiences.frame)? {
            experience_texts.insert(id, texts);
        }
    }
    if let Some(languages) = loaded.get(&LogicalFile::Languages) {
        joins.push(aggregate::aggregate_languages(&languages.frame)?);
    }
    if let Some(parents) = loaded.get(&LogicalFile::Parents) {
        joins.push(aggregate::aggregate_parents(&parents.frame, report)?);
    }
    if let Some(gpa_trend) = loaded.get(&LogicalFile::GpaTrend) {
        joins.push(aggregate::map_gpa_trend(&gpa_trend.frame, report)?);
    }
    if let Some(ps) = loaded.get(&LogicalFile::PersonalStatement) {
        collect_text(&ps.frame, PERSONAL_STATEMENT, personal_statements)?;
    }
    if let Some(secondary) = loaded.get(&LogicalFile::SecondaryApplications) {
        collect_text(&secondary.frame, ESSAY_TEXT, secondary_texts)?;
    }

    // Stage: join.
    token.check()?;
    monotonic.report(sub(IngestStage::Joining, 0.0, "joining onto applicants".into()));
    let mut unified = applicants.frame;
    for right in joins {
        unified = unified.join(
            &right,
            [AMCAS_ID],
            [AMCAS_ID],
            JoinArgs::new(JoinType::Left),
            None,
        )?;
    }

    // Stage: clean.
    token.check()?;
    monotonic.report(sub(IngestStage::Cleaning, 0.0, "cleaning".into()));
    unified = clean(unified, year, report)?;

    info!(year, rows = unified.height(), cols = unified.width(), "cycle prepared");
    Ok(unified)
}

/// Concatenate a text column per applicant into `out` (later cycles
/// overwrite earlier ones, matching re-applicant dedup).
fn collect_text(
    frame: &DataFrame,
    text_column: &str,
    out: &mut HashMap<i64, String>,
) -> Result<()> {
    let ids = frame
        .column(AMCAS_ID)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let ids = ids.i64()?;
    let texts = frame.column(text_column)?.as_materialized_series().clone();
    let texts = texts.str()?;

    let mut collected: HashMap<i64, String> = HashMap::new();
    for idx in 0..frame.height() {
        let (Some(id), Some(text)) = (ids.get(idx), texts.get(idx)) else {
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }
        let entry = collected.entry(id).or_default();
        if !entry.is_empty() {
            entry.push_str("\n\n");
        }
        entry.push_str(text.trim());
    }
    out.extend(collected);
    Ok(())
}

/// Cleaning: drop the configured high-missingness columns, normalize
/// Yes/No-style indicators to 0/1, derive the MCAT coverage flag, and
/// stamp the cycle year.
fn clean(mut frame: DataFrame, year: i32, _report: &RunReport) -> Result<DataFrame> {
    for column in HIGH_MISSINGNESS_DROP {
        if frame.column(column).is_ok() {
            frame = frame.drop(column)?;
            debug!(column, "dropped high-missingness column");
        }
    }

    let indicator_columns: Vec<String> = frame
        .get_column_names()
        .iter()
        .filter(|name| name.ends_with("_Ind"))
        .map(|name| name.to_string())
        .collect();
    for column in &indicator_columns {
        normalize_indicator_column(&mut frame, column)?;
    }

    // MCAT coverage flag: present before imputation, not a score of 0.
    let mcat_flag: Series = match frame.column(MCAT_TOTAL) {
        Ok(col) => {
            let casted = col.as_materialized_series().cast(&DataType::Float64)?;
            casted
                .f64()?
                .into_iter()
                .map(|opt| Some(i64::from(opt.is_some())))
                .collect::<Int64Chunked>()
                .into_series()
        }
        Err(_) => Int64Chunked::full(MCAT_AVAILABLE_IND.into(), 0, frame.height()).into_series(),
    };
    frame.with_column(mcat_flag.with_name(MCAT_AVAILABLE_IND.into()))?;

    // Stamp (or overwrite) the cycle year.
    let year_col =
        Int64Chunked::full(APP_YEAR.into(), year as i64, frame.height()).into_series();
    frame.with_column(year_col)?;

    Ok(frame)
}

/// Keep the most recent `App_Year` row per applicant; log the collapse
/// count when any duplicates existed.
fn deduplicate_reapplicants(frame: DataFrame, report: &RunReport) -> Result<DataFrame> {
    let before = frame.height();
    let ids = frame
        .column(AMCAS_ID)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let ids = ids.i64()?;
    let years = frame
        .column(APP_YEAR)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let years = years.i64()?;

    // Row index of the most recent cycle per applicant; earlier row wins
    // a year tie so reruns are stable.
    let mut best: HashMap<i64, (i64, usize)> = HashMap::new();
    for row in 0..frame.height() {
        let Some(id) = ids.get(row) else { continue };
        let year = years.get(row).unwrap_or(i64::MIN);
        match best.get(&id) {
            Some((kept_year, _)) if *kept_year >= year => {}
            _ => {
                best.insert(id, (year, row));
            }
        }
    }

    let mut keep: Vec<u32> = best.values().map(|(_, row)| *row as u32).collect();
    keep.sort_unstable();
    let deduped = frame.take(&IdxCa::from_vec("idx".into(), keep))?;
    let collapsed = before - deduped.height();

    if collapsed > 0 {
        report.record(QualityWarning::new(
            WarningKind::ReapplicantDeduplicated,
            format!("{collapsed} re-applicant rows collapsed to most recent cycle"),
        ));
    }

    Ok(deduped)
}

fn emit_master_csv(frame: &mut DataFrame, config: &RunConfig) -> Result<()> {
    fs::create_dir_all(&config.output_dir)?;
    let path = config.output_dir.join("master_unified.csv");
    let mut file = fs::File::create(&path)?;
    CsvWriter::new(&mut file).finish(frame)?;
    info!(path = %path.display(), "master CSV written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn minimal_cycle(dir: &std::path::Path) -> HashMap<LogicalFile, PathBuf> {
        let mut files = HashMap::new();
        files.insert(
            LogicalFile::Applicants,
            write(
                dir,
                "applicants.csv",
                "Amcas_ID,Total_GPA,BCPM_GPA,MCAT_Total,First_Generation_Ind\n\
                 1,3.8,3.7,512,Yes\n2,3.2,3.0,,No\n3,3.9,3.9,518,No\n",
            ),
        );
        files.insert(
            LogicalFile::Experiences,
            write(
                dir,
                "experiences.csv",
                "Amcas_ID,Exp_Type,Exp_Hour_Total,Exp_Desc\n\
                 1,Research/Lab,200,bench work\n\
                 2,Community Service,50,food bank\n\
                 3,Research/Lab,900,thesis\n",
            ),
        );
        files.insert(
            LogicalFile::PersonalStatement,
            write(
                dir,
                "personal_statement.csv",
                "Amcas_ID,Personal_Statement\n1,why medicine\n2,my journey\n3,service\n",
            ),
        );
        files.insert(
            LogicalFile::GpaTrend,
            write(
                dir,
                "gpa_trend.csv",
                "Amcas_ID,GPA_Trend\n1,Upward\n2,Stable\n3,Upward\n",
            ),
        );
        files
    }

    fn run(source: CycleSource) -> Result<UnifiedDataset> {
        let config = RunConfig::builder()
            .emit_master_csv(false)
            .build()
            .unwrap();
        let report = RunReport::new();
        prepare_dataset(
            source,
            &config,
            &report,
            &NullProgressReporter,
            &CancellationToken::new(),
        )
    }

    #[test]
    fn test_prepare_dataset_explicit_file_map() {
        let dir = tempfile::tempdir().unwrap();
        let files = minimal_cycle(dir.path());

        let dataset = run(CycleSource::Files { year: 2025, files }).unwrap();
        assert_eq!(dataset.frame.height(), 3);
        assert!(dataset.frame.column("Exp_Hour_Research").is_ok());
        assert!(dataset.frame.column(MCAT_AVAILABLE_IND).is_ok());
        assert_eq!(dataset.personal_statements.len(), 3);

        // MCAT flag derives from presence, not value.
        let flags: Vec<Option<i64>> = dataset
            .frame
            .column(MCAT_AVAILABLE_IND)
            .unwrap()
            .as_materialized_series()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(flags.iter().flatten().sum::<i64>(), 2);
    }

    #[test]
    fn test_unified_row_count_matches_distinct_applicants() {
        let dir = tempfile::tempdir().unwrap();
        let files = minimal_cycle(dir.path());
        let dataset = run(CycleSource::Files { year: 2025, files }).unwrap();

        let ids = crate::utils::distinct_ids(&dataset.frame, AMCAS_ID).unwrap();
        assert_eq!(ids.len(), dataset.frame.height());
    }

    #[test]
    fn test_missing_required_file_in_map_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = minimal_cycle(dir.path());
        files.remove(&LogicalFile::GpaTrend);

        let err = run(CycleSource::Files { year: 2025, files }).unwrap_err();
        assert!(matches!(err, ProcessingError::Configuration(_)));
    }

    #[test]
    fn test_cancellation_aborts_preparation() {
        let dir = tempfile::tempdir().unwrap();
        let files = minimal_cycle(dir.path());
        let config = RunConfig::builder().emit_master_csv(false).build().unwrap();
        let report = RunReport::new();
        let token = CancellationToken::new();
        token.cancel();

        let err = prepare_dataset(
            CycleSource::Files { year: 2025, files },
            &config,
            &report,
            &NullProgressReporter,
            &token,
        )
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_deduplicate_keeps_most_recent_cycle() {
        let frame = df!(
            AMCAS_ID => &[11i64, 12, 11, 13],
            APP_YEAR => &[2023i64, 2023, 2025, 2024],
            "Total_GPA" => &[3.0f64, 3.2, 3.4, 3.6],
        )
        .unwrap();
        let report = RunReport::new();
        let deduped = deduplicate_reapplicants(frame, &report).unwrap();

        assert_eq!(deduped.height(), 3);
        let gpas: Vec<Option<f64>> = deduped
            .column("Total_GPA")
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        // Applicant 11 keeps the 2025 row (GPA 3.4).
        assert!(gpas.contains(&Some(3.4)));
        assert!(!gpas.contains(&Some(3.0)));
        assert_eq!(report.count_of(WarningKind::ReapplicantDeduplicated), 1);
    }

    #[test]
    fn test_indicator_normalization_in_clean() {
        let dir = tempfile::tempdir().unwrap();
        let files = minimal_cycle(dir.path());
        let dataset = run(CycleSource::Files { year: 2025, files }).unwrap();

        let values: Vec<Option<i64>> = dataset
            .frame
            .column("First_Generation_Ind")
            .unwrap()
            .as_materialized_series()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(values, vec![Some(1), Some(0), Some(0)]);
    }
}
