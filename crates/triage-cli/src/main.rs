//! CLI entry point for the admissions triage core.
//!
//! Two run shapes share one flag surface:
//!
//! - **Training** (`--years 2023,2024 [--test-year 2025] --two-stage`):
//!   ingest the cycles, score rubrics, fit the feature pipeline, train
//!   the model, write the artifact bundle and evaluation reports.
//! - **Scoring** (`--cycle-year 2026`): ingest the new cycle, score
//!   rubrics (resumable), load the fitted pipeline and model read-only,
//!   triage, and write annotated predictions.
//!
//! Exit codes: 0 success, 2 configuration/file error, 3 data-integrity
//! error, 4 model-integrity error.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use dotenv::dotenv;
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use triage_learning::evaluation::{self, drift, summarize};
use triage_learning::{
    Dataset, GateParams, LearningError, ModelArtifact, QualityRanker, RankerParams, SafetyGate,
    TwoStageModel,
};
use triage_processing::features::{FeaturePipeline, TrainingMetadata, load_rubric_frame};
use triage_processing::ingest::{self, CancellationToken, ClosureProgressReporter, CycleSource};
use triage_processing::rubric::{EndpointProvider, RubricCache, RubricScorer, ScoringInputs};
use triage_processing::taxonomy::{
    AMCAS_ID, APP_YEAR, APPLICATION_REVIEW_SCORE, LogicalFile,
};
use triage_processing::utils::column_f64;
use triage_processing::{ProcessingError, RunConfig, RunReport};

#[derive(Parser, Debug)]
#[command(
    author = "Admissions Triage Team",
    version,
    about = "Admissions triage core: ingest, rubric-score, train, and predict",
    long_about = "Data and modeling pipeline for admissions triage.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  MODEL_ENDPOINT    Chat-completions URL for the rubric scorer\n  \
                  MODEL_KEY         Bearer token for the rubric scorer\n\n\
                  EXAMPLES:\n  \
                  # Train a two-stage model on two cycles, hold out a third\n  \
                  triage --years 2023,2024 --test-year 2025 --two-stage\n\n  \
                  # Score a new cycle against the saved artifacts\n  \
                  triage --cycle-year 2026 --resume\n\n  \
                  # Preview what a run would do\n  \
                  triage --years 2024 --dry-run"
)]
struct Args {
    /// Training cycle years, comma separated (e.g. "2023,2024")
    #[arg(long, value_delimiter = ',')]
    years: Vec<i32>,

    /// Hold out this cycle year as the labeled test pool
    #[arg(long)]
    test_year: Option<i32>,

    /// Score this cycle against the saved pipeline and model
    #[arg(long)]
    cycle_year: Option<i32>,

    /// Root directory containing raw/<year>/ input files
    #[arg(long, default_value = "data")]
    data_root: PathBuf,

    /// Output directory for artifacts and reports
    #[arg(short, long, default_value = "outputs")]
    output: PathBuf,

    /// Restrict scoring to the applicant IDs listed in this file (one per line)
    #[arg(long)]
    id_file: Option<PathBuf>,

    /// Reuse the unified frame from a previous run instead of re-ingesting
    #[arg(long)]
    skip_ingestion: bool,

    /// Reuse the rubric cache as-is; make no LLM calls
    #[arg(long)]
    skip_rubric: bool,

    /// Resume rubric scoring: skip cached applicants, fill missing dimensions
    #[arg(long)]
    resume: bool,

    /// Train the two-stage model (gate + ranker); without it, ranker only
    #[arg(long)]
    two_stage: bool,

    /// Train both single-stage and two-stage variants and write a comparison
    #[arg(long)]
    bakeoff: bool,

    /// LLM scorer concurrency ceiling (1 = sequential smoke test)
    #[arg(long, default_value_t = 3)]
    concurrency: usize,

    /// Preview the resolved inputs and planned stages without running
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Model identifier sent to the LLM endpoint
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// Random seed for every stochastic step
    #[arg(long, default_value_t = 2025)]
    seed: u64,
}

fn main() {
    let args = Args::parse();
    dotenv().ok();
    init_tracing(&args.log_level);

    match run(&args) {
        Ok(()) => {}
        Err(e) => {
            tracing::error!("{e:#}");
            std::process::exit(exit_code_of(&e));
        }
    }
}

fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Map library error taxonomies onto the documented exit codes.
fn exit_code_of(error: &anyhow::Error) -> i32 {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<ProcessingError>() {
            return e.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<LearningError>() {
            return e.exit_code();
        }
    }
    2
}

fn run(args: &Args) -> Result<()> {
    if args.years.is_empty() && args.cycle_year.is_none() {
        return Err(anyhow!(ProcessingError::Configuration(
            "nothing to do: pass --years for training or --cycle-year for scoring".into(),
        )));
    }

    let config = RunConfig::builder()
        .output_dir(args.output.clone())
        .scorer_concurrency(args.concurrency.clamp(1, 5))
        .seed(args.seed)
        .build()
        .map_err(|e| anyhow!(ProcessingError::Configuration(e.to_string())))?;
    let report = RunReport::new();

    if args.dry_run {
        return dry_run(args);
    }

    if let Some(cycle_year) = args.cycle_year {
        score_cycle(args, cycle_year, &config, &report)?;
    } else {
        train(args, &config, &report)?;
    }

    report.write_to(&config.output_dir)?;
    info!(
        warnings = report.len(),
        "run complete; report written to {}",
        config.output_dir.join("run_report.json").display()
    );
    Ok(())
}

/// Resolve the file map for each requested year and print what a real run
/// would touch.
fn dry_run(args: &Args) -> Result<()> {
    let years: Vec<i32> = args
        .years
        .iter()
        .copied()
        .chain(args.cycle_year)
        .collect();
    for year in years {
        let files = ingest::loader::locate_files(&args.data_root, year)?;
        println!("cycle {year}: {} files resolved", files.len());
        let mut sorted: Vec<(&LogicalFile, &PathBuf)> = files.iter().collect();
        sorted.sort_by_key(|(logical, _)| format!("{logical:?}"));
        for (logical, path) in sorted {
            println!("  {:<24} {}", logical.display_name(), path.display());
        }
    }
    println!(
        "stages: ingest → rubric ({}) → features → {} → reports",
        if args.skip_rubric { "cached" } else { "LLM" },
        if args.cycle_year.is_some() { "triage" } else if args.two_stage { "train two-stage" } else { "train ranker" },
    );
    Ok(())
}

/// Ingest (or reload) the unified dataset for a set of years.
fn ingest_years(
    years: &[i32],
    args: &Args,
    config: &RunConfig,
    report: &RunReport,
) -> Result<ingest::UnifiedDataset> {
    if args.skip_ingestion {
        let path = config.output_dir.join("master_unified.csv");
        info!(path = %path.display(), "skipping ingestion, reloading unified frame");
        let frame = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.clone()))
            .with_context(|| format!("reopening {}", path.display()))?
            .finish()?;
        return Ok(ingest::UnifiedDataset {
            frame,
            personal_statements: HashMap::new(),
            secondary_texts: HashMap::new(),
            experience_texts: HashMap::new(),
        });
    }

    let reporter = ClosureProgressReporter::new(|update: ingest::ProgressUpdate| {
        info!(
            "[{:>3.0}%] {} — {}",
            update.progress * 100.0,
            update.stage.display_name(),
            update.message
        );
    });
    let dataset = ingest::prepare_dataset(
        CycleSource::Years {
            root: args.data_root.clone(),
            years: years.to_vec(),
        },
        config,
        report,
        &reporter,
        &CancellationToken::new(),
    )?;
    Ok(dataset)
}

/// Run (or skip) rubric scoring for the dataset's applicants.
fn score_rubrics(
    dataset: &ingest::UnifiedDataset,
    ids: &[i64],
    args: &Args,
    config: &RunConfig,
    report: &RunReport,
) -> Result<PathBuf> {
    let cache_path = config.output_dir.join("rubric_cache.json");
    if args.skip_rubric {
        info!("skipping rubric scoring; using cache as-is");
        if !cache_path.exists() {
            return Err(anyhow!(ProcessingError::MissingInput {
                logical: "rubric_cache".to_string(),
                path: cache_path,
            }));
        }
        return Ok(cache_path);
    }

    let provider = Arc::new(EndpointProvider::from_env(args.model.clone())?);
    let scorer = RubricScorer::builder()
        .provider(provider)
        .cache(RubricCache::new(&cache_path))
        .run_config(config)
        .resume(args.resume)
        .report(report.clone())
        .build()?;

    let inputs = ScoringInputs::from(dataset);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("tokio runtime")?;
    runtime.block_on(async {
        let baseline = config.output_dir.join("canary_baseline.json");
        triage_processing::rubric::run_canary(&scorer, &baseline, config.canary_mad_bound)
            .await?;
        scorer.score_batch(ids, &inputs).await?;
        Ok::<(), ProcessingError>(())
    })?;

    Ok(cache_path)
}

fn applicant_ids(frame: &DataFrame, id_file: Option<&Path>) -> Result<Vec<i64>> {
    let mut ids = triage_processing::utils::distinct_ids(frame, AMCAS_ID)
        .map_err(anyhow::Error::from)?;
    if let Some(path) = id_file {
        let listed: Vec<i64> = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.trim().parse::<i64>().context("id file entry"))
            .collect::<Result<_>>()?;
        ids.retain(|id| listed.contains(id));
        info!(requested = listed.len(), matched = ids.len(), "id file applied");
    }
    Ok(ids)
}

fn score_lookup(frame: &DataFrame) -> Result<HashMap<i64, f64>> {
    let id_col = column_f64(frame, AMCAS_ID)?;
    let scores = column_f64(frame, APPLICATION_REVIEW_SCORE)?;
    let mut lookup = HashMap::new();
    for (id, score) in id_col.into_iter().zip(scores) {
        if let (Some(id), Some(score)) = (id, score) {
            lookup.insert(id as i64, score);
        }
    }
    Ok(lookup)
}

/// Training run: features → gate + ranker → artifact + reports.
fn train(args: &Args, config: &RunConfig, report: &RunReport) -> Result<()> {
    let all_years: Vec<i32> = args
        .years
        .iter()
        .copied()
        .chain(args.test_year)
        .collect();
    let dataset = ingest_years(&all_years, args, config, report)?;
    let ids = applicant_ids(&dataset.frame, args.id_file.as_deref())?;
    let cache_path = score_rubrics(&dataset, &ids, args, config, report)?;

    // Split train vs held-out test by cycle year.
    let years = column_f64(&dataset.frame, APP_YEAR)?;
    let is_test: Vec<bool> = years
        .iter()
        .map(|y| {
            args.test_year
                .is_some_and(|t| y.is_some_and(|y| y as i32 == t))
        })
        .collect();

    let train_mask: Vec<usize> = (0..dataset.frame.height())
        .filter(|&i| !is_test[i])
        .collect();
    let train_frame = take_rows(&dataset.frame, &train_mask)?;

    let rubric = load_rubric_frame(&cache_path)?;
    let mut pipeline = FeaturePipeline::new(report.clone());
    let train_features = pipeline.fit_transform(&train_frame, &rubric)?;

    let lookup = score_lookup(&train_frame)?;
    let columns = pipeline.feature_columns()?.to_vec();
    let train_set = Dataset::from_feature_frame(&train_features, &columns, Some(&lookup))?;
    let scores = train_set.require_targets()?.to_vec();
    let is_low: Vec<bool> = scores
        .iter()
        .map(|s| *s <= config.low_score_threshold as f64)
        .collect();

    let gate_params = GateParams {
        recall_target: config.recall_target,
        seed: config.seed,
        ..GateParams::default()
    };
    let ranker_params = RankerParams {
        low_score_threshold: config.low_score_threshold as f64,
        min_rows: config.ranker_min_rows,
        contamination_bound: config.contamination_bound,
        k_ratio: config.k_ratio,
        seed: config.seed,
        ..RankerParams::default()
    };

    let (gate, gate_report) = SafetyGate::train(&train_set.rows, &is_low, &gate_params)?;
    let (ranker, ranker_report) =
        QualityRanker::train(&train_set.rows, &scores, &ranker_params)?;
    let model = TwoStageModel::new(gate, ranker);

    // Without --two-stage the artifact still carries the gate (the safety
    // floor is not optional), but the single-stage comparison is written
    // so the choice stays visible.
    if args.bakeoff || !args.two_stage {
        if !args.two_stage {
            warn!("--two-stage not set: writing single-stage comparison alongside the bundle");
        }
        write_bakeoff(&model, &train_set, &scores, &ranker_params, config)?;
    }

    // SES ablation runs on every training pass.
    let ablation = evaluation::ses_ablation(&train_set, &is_low, &gate_params)?;
    fs::create_dir_all(&config.output_dir)?;
    fs::write(
        config.output_dir.join("ses_ablation.json"),
        serde_json::to_string_pretty(&ablation)?,
    )?;

    // Persist the pipeline and the artifact bundle.
    pipeline.set_metadata(TrainingMetadata {
        train_years: args.years.clone(),
        test_year: args.test_year,
        n_train: train_set.len(),
        trained_date: chrono::Local::now().format("%Y-%m-%d").to_string(),
        threshold: config.low_score_threshold,
        recall_target: config.recall_target,
    })?;
    pipeline.save(&config.output_dir.join("feature_pipeline.json"))?;

    let artifact = ModelArtifact::new(
        model.gate.clone(),
        model.ranker.clone(),
        columns.clone(),
        pipeline.marginals()?.clone(),
        rubric.version,
        pipeline
            .metadata()
            .cloned()
            .expect("metadata set above"),
    );
    let artifact_path = config.output_dir.join("model_bundle.json");
    artifact.save(&artifact_path)?;
    let versioned = config.output_dir.join(artifact.versioned_filename());
    artifact.save(&versioned)?;

    // Evaluate on the held-out year when one was given; otherwise the
    // report set (fairness included) is computed on the training pool so
    // every run ships the full artifact set.
    let test_mask: Vec<usize> = (0..dataset.frame.height())
        .filter(|&i| is_test[i])
        .collect();
    if args.test_year.is_some() && !test_mask.is_empty() {
        let test_frame = take_rows(&dataset.frame, &test_mask)?;
        let test_features = pipeline.transform(&test_frame, &rubric)?;
        let test_lookup = score_lookup(&test_frame)?;
        let test_set =
            Dataset::from_feature_frame(&test_features, &columns, Some(&test_lookup))?;
        let test_scores = test_set.require_targets()?.to_vec();

        let k = ((test_set.len() as f64) * config.k_ratio).floor() as usize;
        let mut outcome = model.triage(&test_set, k)?;
        drift::annotate_predictions(&mut outcome, pipeline.marginals()?, &test_set);
        let drift_report = drift::compute_drift(pipeline.marginals()?, &test_set);

        let actual_low: Vec<bool> = test_scores
            .iter()
            .map(|s| *s <= config.low_score_threshold as f64)
            .collect();
        let fairness = fairness_report(&test_frame, &test_set, &outcome, Some(&actual_low))?;

        let summary = summarize(
            &outcome,
            Some(&test_scores),
            config.low_score_threshold as f64,
            config.seed,
        );
        evaluation::ReportWriter::new(&config.output_dir).write(
            &summary,
            Some(&gate_report),
            Some(&ranker_report),
            fairness.as_ref(),
            Some(&drift_report),
        )?;
    } else {
        if args.test_year.is_some() {
            warn!("--test-year matched no rows; reporting on the training pool instead");
        }
        let k = ((train_set.len() as f64) * config.k_ratio).floor() as usize;
        let outcome = model.triage(&train_set, k)?;
        let actual_low: Vec<bool> = scores
            .iter()
            .map(|s| *s <= config.low_score_threshold as f64)
            .collect();
        let fairness = fairness_report(&train_frame, &train_set, &outcome, Some(&actual_low))?;

        let summary = summarize(
            &outcome,
            Some(&scores),
            config.low_score_threshold as f64,
            config.seed,
        );
        evaluation::ReportWriter::new(&config.output_dir).write(
            &summary,
            Some(&gate_report),
            Some(&ranker_report),
            fairness.as_ref(),
            None,
        )?;
    }

    info!(artifact = %artifact_path.display(), "training complete");
    Ok(())
}

/// Build the fairness report for a triaged pool from the protected
/// attributes still present on the unified frame (the feature pipeline
/// strips them later; the audit is their only legitimate consumer).
///
/// Returns `None` when the frame carries no protected attribute at all,
/// which only happens on uploads stripped upstream.
fn fairness_report(
    frame: &DataFrame,
    pool: &Dataset,
    outcome: &triage_learning::TriageOutcome,
    actual_low: Option<&[bool]>,
) -> Result<Option<evaluation::FairnessReport>> {
    let frame_ids: Vec<Option<i64>> = frame
        .column(AMCAS_ID)?
        .as_materialized_series()
        .cast(&DataType::Int64)?
        .i64()?
        .into_iter()
        .collect();

    let string_lookup = |name: &str| -> Result<Option<HashMap<i64, String>>> {
        let Ok(column) = frame.column(name) else {
            return Ok(None);
        };
        let casted = column.as_materialized_series().cast(&DataType::String)?;
        let values = casted.str()?;
        let mut lookup = HashMap::new();
        for (id, value) in frame_ids.iter().zip(values.into_iter()) {
            if let (Some(id), Some(value)) = (id, value) {
                lookup.insert(*id, value.to_string());
            }
        }
        Ok(Some(lookup))
    };
    let flag_lookup = |name: &str| -> Result<Option<HashMap<i64, String>>> {
        if frame.column(name).is_err() {
            return Ok(None);
        }
        let values = column_f64(frame, name)?;
        let mut lookup = HashMap::new();
        for (id, value) in frame_ids.iter().zip(values) {
            if let (Some(id), Some(value)) = (id, value) {
                lookup.insert(*id, if value != 0.0 { "1" } else { "0" }.to_string());
            }
        }
        Ok(Some(lookup))
    };

    let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut add = |name: &str, lookup: Option<HashMap<i64, String>>| {
        if let Some(lookup) = lookup {
            let labels: Vec<String> = pool
                .ids
                .iter()
                .map(|id| {
                    lookup
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string())
                })
                .collect();
            attributes.insert(name.to_string(), labels);
        }
    };

    add("Gender", string_lookup("Gender")?);
    add("Race", string_lookup("Race")?);
    add("Citizenship", string_lookup("Citizenship")?);

    // Age audits as bands, never raw years.
    if frame.column("Age").is_ok() {
        let ages = column_f64(frame, "Age")?;
        let mut lookup = HashMap::new();
        for (id, age) in frame_ids.iter().zip(ages) {
            if let (Some(id), Some(age)) = (id, age) {
                lookup.insert(*id, evaluation::age_band(age));
            }
        }
        add("Age_Band", Some(lookup));
    }

    // Mission-aligned model inputs join the audit and back the required
    // gender intersections.
    add("First_Generation_Ind", flag_lookup("First_Generation_Ind")?);
    add("SES", flag_lookup("SES_Value_Ind")?);

    if attributes.is_empty() {
        warn!("no protected attributes on the frame; fairness report skipped");
        return Ok(None);
    }

    let selected = {
        let mut s = vec![false; pool.len()];
        for &i in &outcome.selected_indices {
            s[i] = true;
        }
        s
    };
    let predicted_low: Vec<bool> = outcome.predictions.iter().map(|p| !p.gate_passed).collect();
    let strata: Vec<String> = outcome
        .predictions
        .iter()
        .map(|p| p.tier_label.unwrap_or("rejected").to_string())
        .collect();

    let inputs = evaluation::AuditInputs {
        attributes,
        selected: &selected,
        predicted_low: Some(&predicted_low),
        actual_low,
        strata: Some(strata),
    };
    Ok(Some(evaluation::audit(
        &inputs,
        &[("Gender", "First_Generation_Ind"), ("Gender", "SES")],
    )))
}

/// Single-stage vs two-stage comparison on the training pool.
fn write_bakeoff(
    model: &TwoStageModel,
    train_set: &Dataset,
    scores: &[f64],
    ranker_params: &RankerParams,
    config: &RunConfig,
) -> Result<()> {
    let k = ((train_set.len() as f64) * config.k_ratio).floor() as usize;
    let threshold = config.low_score_threshold as f64;

    // Two-stage selection.
    let outcome = model.triage(train_set, k)?;
    let two_stage = summarize(&outcome, Some(scores), threshold, config.seed);

    // Single stage: rank everyone, no gate.
    let (single_ranker, _) = QualityRanker::train(&train_set.rows, scores, ranker_params)?;
    let predictions = single_ranker.predict(&train_set.rows);
    let single_contamination = triage_learning::ranker::selection_contamination(
        &predictions,
        scores,
        threshold,
        k,
    );

    let comparison = serde_json::json!({
        "k": k,
        "two_stage": {
            "contamination": two_stage.contamination,
            "gate_rejection_rate": two_stage.gate_rejection_rate,
            "ndcg": two_stage.ndcg_at_k,
        },
        "single_stage": {
            "contamination": single_contamination,
        },
    });
    fs::create_dir_all(&config.output_dir)?;
    fs::write(
        config.output_dir.join("bakeoff.json"),
        serde_json::to_string_pretty(&comparison)?,
    )?;
    info!("bakeoff comparison written");
    Ok(())
}

/// Scoring run: load pipeline + artifact read-only, triage the new cycle.
fn score_cycle(
    args: &Args,
    cycle_year: i32,
    config: &RunConfig,
    report: &RunReport,
) -> Result<()> {
    let dataset = ingest_years(&[cycle_year], args, config, report)?;
    let ids = applicant_ids(&dataset.frame, args.id_file.as_deref())?;
    let cache_path = score_rubrics(&dataset, &ids, args, config, report)?;

    let pipeline = FeaturePipeline::load(
        &config.output_dir.join("feature_pipeline.json"),
        report.clone(),
    )?;
    let artifact = ModelArtifact::load(&config.output_dir.join("model_bundle.json"))?;

    let rubric = load_rubric_frame(&cache_path)?;
    let features = pipeline.transform(&dataset.frame, &rubric)?;
    let pool = Dataset::from_feature_frame(&features, &artifact.feature_columns, None)?;

    let k = ((pool.len() as f64) * config.k_ratio).floor() as usize;
    let model = artifact.model();
    let mut outcome = model.triage(&pool, k)?;

    // Drift annotations against the artifact's training marginals.
    let drift_report = drift::compute_drift(&artifact.training_marginals, &pool);
    drift::annotate_predictions(&mut outcome, &artifact.training_marginals, &pool);
    if drift_report.global_alert {
        warn!("global drift alert on scoring pool; predictions annotated, not suppressed");
    }

    // No labels at scoring time: the audit covers selection rates and
    // the intersections, with the odds metrics absent.
    let fairness = fairness_report(&dataset.frame, &pool, &outcome, None)?;

    let summary = summarize(&outcome, None, config.low_score_threshold as f64, config.seed);
    evaluation::ReportWriter::new(&config.output_dir).write(
        &summary,
        None,
        None,
        fairness.as_ref(),
        Some(&drift_report),
    )?;

    let predictions_path = config.output_dir.join(format!("predictions_{cycle_year}.json"));
    fs::write(
        &predictions_path,
        serde_json::to_string_pretty(&outcome.predictions)?,
    )?;
    info!(
        path = %predictions_path.display(),
        selected = outcome.selected_indices.len(),
        "scoring complete"
    );
    Ok(())
}

/// Row subset of a frame by index list.
fn take_rows(frame: &DataFrame, indices: &[usize]) -> Result<DataFrame> {
    let idx: Vec<u32> = indices.iter().map(|&i| i as u32).collect();
    let taken = frame.take(&polars::prelude::IdxCa::from_vec("idx".into(), idx))?;
    Ok(taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_flag_surface() {
        let args = Args::parse_from([
            "triage",
            "--years",
            "2023,2024",
            "--test-year",
            "2025",
            "--two-stage",
            "--bakeoff",
            "--resume",
            "--skip-rubric",
        ]);
        assert_eq!(args.years, vec![2023, 2024]);
        assert_eq!(args.test_year, Some(2025));
        assert!(args.two_stage && args.bakeoff && args.resume && args.skip_rubric);
        assert!(!args.skip_ingestion);
    }

    #[test]
    fn test_scoring_flags() {
        let args = Args::parse_from(["triage", "--cycle-year", "2026", "--concurrency", "1"]);
        assert_eq!(args.cycle_year, Some(2026));
        assert_eq!(args.concurrency, 1);
        assert!(args.years.is_empty());
    }
}
