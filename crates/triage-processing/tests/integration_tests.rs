//! Integration tests: raw cycle files through the unified frame into the
//! fitted feature pipeline.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use triage_processing::features::{FeaturePipeline, load_rubric_frame};
use triage_processing::ingest::{
    self, CancellationToken, ClosureProgressReporter, CycleSource, NullProgressReporter,
};
use triage_processing::taxonomy::{ALL_DIMENSIONS, LogicalFile, is_protected};
use triage_processing::utils::column_f64;
use triage_processing::{ProcessingError, RunConfig, RunReport};

// ============================================================================
// Fixture helpers
// ============================================================================

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// A small but complete cycle: applicants with structured columns,
/// experiences, personal statements, GPA trend, languages, parents.
fn full_cycle(dir: &Path) -> HashMap<LogicalFile, PathBuf> {
    let mut applicants = String::from(
        "AMCAS ID,Total_GPA,BCPM_GPA,MCAT_Total,Num_Dependents,\
         First_Generation_Ind,Disadvantanged_Ind,SES_Value_Ind,Pell_Grant_Ind,\
         Fee_Assistance_Ind,Paid_Employment_BF_18_Ind,Contribution_To_Family_Ind,\
         Childhood_Med_Underserved_Ind,Prev_Applied_Ind,Military_Service_Ind,\
         Gender,Application_Review_Score\n",
    );
    for id in 1..=20 {
        applicants.push_str(&format!(
            "{id},3.{g},3.{g},5{m:02},0,Yes,No,No,Yes,No,No,No,No,No,No,F,{score}\n",
            g = id % 10,
            m = id % 20,
            score = 5 + id % 20,
        ));
    }
    let mut experiences = String::from("Amcas_ID,Exp_Type,Exp_Hour_Total,Exp_Desc\n");
    for id in 1..=20 {
        experiences.push_str(&format!(
            "{id},Research/Lab,{h},bench research on cell signaling\n\
             {id},Community Service,{h2},weekly food bank shifts\n",
            h = 100 + id * 10,
            h2 = 40 + id,
        ));
    }
    let mut statements = String::from("Amcas_ID,Personal_Statement\n");
    for id in 1..=20 {
        statements.push_str(&format!("{id},essay about medicine number {id}\n"));
    }
    let mut trend = String::from("Amcas_ID,GPA Trend\n");
    for id in 1..=20 {
        trend.push_str(&format!("{id},Upward\n"));
    }
    let mut languages = String::from("Amcas_ID,Language\n");
    for id in 1..=20 {
        languages.push_str(&format!("{id},English\n"));
    }
    let mut parents = String::from("Amcas_ID,Education_Level\n");
    for id in 1..=20 {
        parents.push_str(&format!("{id},Bachelor's Degree\n"));
    }

    HashMap::from([
        (LogicalFile::Applicants, write(dir, "applicants.csv", &applicants)),
        (LogicalFile::Experiences, write(dir, "experiences.csv", &experiences)),
        (
            LogicalFile::PersonalStatement,
            write(dir, "personal_statement.csv", &statements),
        ),
        (LogicalFile::GpaTrend, write(dir, "gpa_trend.csv", &trend)),
        (LogicalFile::Languages, write(dir, "languages.csv", &languages)),
        (LogicalFile::Parents, write(dir, "parents.csv", &parents)),
    ])
}

/// A v2 rubric cache covering the first 15 applicants.
fn write_rubric_cache(dir: &Path) -> PathBuf {
    let mut records = serde_json::Map::new();
    for id in 1..=15 {
        let mut scores = serde_json::Map::new();
        for (i, dim) in ALL_DIMENSIONS.iter().enumerate() {
            scores.insert(
                (*dim).to_string(),
                serde_json::json!(1 + (id as usize + i) % 4),
            );
        }
        records.insert(
            id.to_string(),
            serde_json::json!({
                "format_version": "v2",
                "prompt_hash": "fixture",
                "model_version": "fixture-model",
                "scores": scores,
            }),
        );
    }
    let path = dir.join("rubric_cache.json");
    fs::write(&path, serde_json::to_string_pretty(&records).unwrap()).unwrap();
    path
}

fn config() -> RunConfig {
    RunConfig::builder().emit_master_csv(false).build().unwrap()
}

// ============================================================================
// Ingestion → feature pipeline
// ============================================================================

#[test]
fn test_full_cycle_to_feature_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let files = full_cycle(dir.path());
    let report = RunReport::new();

    let dataset = ingest::prepare_dataset(
        CycleSource::Files { year: 2025, files },
        &config(),
        &report,
        &NullProgressReporter,
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(dataset.frame.height(), 20);
    // Typo patch applied on read.
    assert!(dataset.frame.column("Disadvantaged_Ind").is_ok());

    let rubric_path = write_rubric_cache(dir.path());
    let rubric = load_rubric_frame(&rubric_path).unwrap();

    let mut pipeline = FeaturePipeline::new(report.clone());
    let matrix = pipeline.fit_transform(&dataset.frame, &rubric).unwrap();

    assert_eq!(matrix.height(), 20);
    // Amcas_ID + 50 features.
    assert_eq!(matrix.width(), 51);
    for name in matrix.get_column_names() {
        assert!(!is_protected(name));
    }

    // Applicants 16..=20 are absent from the rubric cache and received
    // the fitted medians, so no dimension column carries nulls.
    for dim in ALL_DIMENSIONS.iter() {
        let values = column_f64(&matrix, dim).unwrap();
        assert!(values.iter().all(|v| v.is_some()), "{dim} has nulls");
    }
}

#[test]
fn test_transform_stable_across_save_load() {
    let dir = tempfile::tempdir().unwrap();
    let files = full_cycle(dir.path());
    let report = RunReport::new();

    let dataset = ingest::prepare_dataset(
        CycleSource::Files { year: 2025, files },
        &config(),
        &report,
        &NullProgressReporter,
        &CancellationToken::new(),
    )
    .unwrap();
    let rubric = load_rubric_frame(&write_rubric_cache(dir.path())).unwrap();

    let mut pipeline = FeaturePipeline::new(report.clone());
    let original = pipeline.fit_transform(&dataset.frame, &rubric).unwrap();

    let artifact = dir.path().join("pipeline.json");
    pipeline.save(&artifact).unwrap();
    let loaded = FeaturePipeline::load(&artifact, RunReport::new()).unwrap();

    let reloaded = loaded.transform(&dataset.frame, &rubric).unwrap();
    assert_eq!(original, reloaded);
}

#[test]
fn test_progress_is_monotonic_across_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let files = full_cycle(dir.path());
    let report = RunReport::new();

    let seen = std::sync::Mutex::new(Vec::<f32>::new());
    let reporter = ClosureProgressReporter::new(|update: ingest::ProgressUpdate| {
        seen.lock().unwrap().push(update.progress);
    });

    ingest::prepare_dataset(
        CycleSource::Files { year: 2025, files },
        &config(),
        &report,
        &reporter,
        &CancellationToken::new(),
    )
    .unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen.len() >= 5, "expected several progress updates");
    assert!(
        seen.windows(2).all(|w| w[1] >= w[0]),
        "progress went backwards: {seen:?}"
    );
    assert_eq!(*seen.last().unwrap(), 1.0);
}

#[test]
fn test_orphan_experience_row_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut files = full_cycle(dir.path());

    let mut experiences = fs::read_to_string(&files[&LogicalFile::Experiences]).unwrap();
    experiences.push_str("99999999,Research/Lab,100,orphan row\n");
    files.insert(
        LogicalFile::Experiences,
        write(dir.path(), "experiences_orphan.csv", &experiences),
    );

    let err = ingest::prepare_dataset(
        CycleSource::Files { year: 2025, files },
        &config(),
        &RunReport::new(),
        &NullProgressReporter,
        &CancellationToken::new(),
    )
    .unwrap_err();

    match err {
        ProcessingError::OrphanIds { counts_by_file } => {
            assert_eq!(counts_by_file["experiences"], 1);
        }
        other => panic!("expected OrphanIds, got {other:?}"),
    }
}

#[test]
fn test_minutes_for_hours_export_aborts_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let mut files = full_cycle(dir.path());

    let mut experiences = String::from("Amcas_ID,Exp_Type,Exp_Hour_Total,Exp_Desc\n");
    for id in 1..=20 {
        experiences.push_str(&format!("{id},Research/Lab,18000,minutes not hours\n"));
    }
    files.insert(
        LogicalFile::Experiences,
        write(dir.path(), "experiences_minutes.csv", &experiences),
    );

    let err = ingest::prepare_dataset(
        CycleSource::Files { year: 2025, files },
        &config(),
        &RunReport::new(),
        &NullProgressReporter,
        &CancellationToken::new(),
    )
    .unwrap_err();

    match err {
        ProcessingError::UnitMismatch { hint, .. } => assert!(hint.contains("divide by 60")),
        other => panic!("expected UnitMismatch, got {other:?}"),
    }
}

#[test]
fn test_run_report_aggregates_and_writes() {
    let dir = tempfile::tempdir().unwrap();
    let files = full_cycle(dir.path());
    let report = RunReport::new();

    ingest::prepare_dataset(
        CycleSource::Files { year: 2025, files },
        &config(),
        &report,
        &NullProgressReporter,
        &CancellationToken::new(),
    )
    .unwrap();

    // The tiny fixture trips row-band warnings plus the typo patch.
    assert!(!report.is_empty());
    let doc = report.summarize();
    assert!(doc.counts_by_kind.contains_key("TypoPatched"));

    report.write_to(dir.path()).unwrap();
    assert!(dir.path().join("run_report.json").exists());
}
