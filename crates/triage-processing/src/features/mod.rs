//! Leakage-safe feature pipeline: fit on the training split, freeze every
//! statistic, re-apply identically at scoring time.
//!
//! Everything the pipeline applies at transform time — imputation medians,
//! the rubric-score medians used for zero-as-missing imputation, the
//! feature-column ordering — is computed during [`FeaturePipeline::fit`]
//! from the training frame only and serialized with the pipeline.
//! `fit_transform` returns the matrix retained by `fit`; it never runs
//! `transform` a second time over the same data.
//!
//! The serialized form is plain structured JSON (keys, lists, floats) with
//! a content hash, not an opaque object blob.

pub mod composites;
pub mod rubric_load;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ProcessingError, Result};
use crate::reporting::{QualityWarning, RunReport, WarningKind};
use crate::taxonomy::{
    ACADEMIC_FEATURES, ALL_DIMENSIONS, AMCAS_ID, BINARY_FEATURES, ENGINEERED_FEATURES,
    NUMERIC_FEATURES, RubricVersion, is_protected,
};
use crate::utils::column_f64;

pub use rubric_load::{LoadedRubric, load_rubric_frame, rescale_dimensions_to_v1};

/// On-disk format version; bumped on breaking changes to the state shape.
const PIPELINE_FORMAT_VERSION: u32 = 1;

/// Cap on the raw sample retained per feature for drift checks.
const MARGINAL_SAMPLE_CAP: usize = 200;

/// Columns median-imputed with fitted statistics.
fn median_imputed_columns() -> Vec<&'static str> {
    NUMERIC_FEATURES
        .iter()
        .chain(["Total_GPA", "BCPM_GPA", "MCAT_Total"].iter())
        .copied()
        .collect()
}

/// Columns zero-imputed (absence means "no", not "unknown").
fn zero_imputed_columns() -> Vec<&'static str> {
    BINARY_FEATURES
        .iter()
        .chain(["MCAT_Available_Ind"].iter())
        .copied()
        .collect()
}

/// Training metadata carried inside the serialized pipeline and the model
/// artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub train_years: Vec<i32>,
    pub test_year: Option<i32>,
    pub n_train: usize,
    pub trained_date: String,
    pub threshold: i64,
    pub recall_target: f64,
}

/// Per-feature training marginal, persisted for drift checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMarginal {
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    /// Up to [`MARGINAL_SAMPLE_CAP`] raw training values for KS tests.
    pub sample: Vec<f64>,
}

impl FeatureMarginal {
    /// Compute from non-NaN values.
    pub fn from_values(values: &[f64]) -> Self {
        let clean: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if clean.is_empty() {
            return Self {
                mean: 0.0,
                std: 0.0,
                median: 0.0,
                q1: 0.0,
                q3: 0.0,
                sample: Vec::new(),
            };
        }
        let n = clean.len() as f64;
        let mean = clean.iter().sum::<f64>() / n;
        let variance = clean.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let mut sorted = clean.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite values"));

        Self {
            mean,
            std: variance.sqrt(),
            median: percentile(&sorted, 0.50),
            q1: percentile(&sorted, 0.25),
            q3: percentile(&sorted, 0.75),
            sample: clean.into_iter().take(MARGINAL_SAMPLE_CAP).collect(),
        }
    }
}

/// Linear-interpolation percentile over a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = position - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Everything frozen by `fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedState {
    /// Imputation medians for structured and academic columns.
    medians: BTreeMap<String, f64>,
    /// Per-dimension medians for rubric zero-as-missing imputation.
    rubric_medians: BTreeMap<String, f64>,
    /// The fitted feature ordering; identical at every transform.
    feature_columns: Vec<String>,
    /// Rubric cache version seen at fit time.
    rubric_version_at_fit: RubricVersion,
    /// Scale the downstream model expects its rubric inputs on.
    scale_target: RubricVersion,
    /// Canonical dimension names in use (persisted so a renamed taxonomy
    /// cannot silently shift columns under a stored model).
    dimension_names: Vec<String>,
    /// Training marginals per feature, for drift checks.
    marginals: BTreeMap<String, FeatureMarginal>,
    /// Training-run metadata.
    metadata: Option<TrainingMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PipelineArtifact {
    format_version: u32,
    content_hash: String,
    state: FittedState,
}

/// The fit/transform feature pipeline.
#[derive(Debug)]
pub struct FeaturePipeline {
    report: RunReport,
    scale_target: RubricVersion,
    fitted: Option<FittedState>,
    /// Matrix computed by `fit`, handed back by `fit_transform`.
    retained: Option<DataFrame>,
}

impl FeaturePipeline {
    pub fn new(report: RunReport) -> Self {
        Self {
            report,
            scale_target: RubricVersion::V2,
            fitted: None,
            retained: None,
        }
    }

    /// Set the rubric scale the downstream model expects. Models trained
    /// on v1-native scores set `RubricVersion::V1` to enable the
    /// documented rescale; new models stay on v2.
    pub fn with_scale_target(mut self, target: RubricVersion) -> Self {
        self.scale_target = target;
        self
    }

    /// Attach training metadata before `save`.
    pub fn set_metadata(&mut self, metadata: TrainingMetadata) -> Result<()> {
        let fitted = self.fitted.as_mut().ok_or_else(|| {
            ProcessingError::Configuration("set_metadata requires a fitted pipeline".into())
        })?;
        fitted.metadata = Some(metadata);
        Ok(())
    }

    /// Fit on the training frame and rubric scores. Every statistic used
    /// at transform time is computed here and frozen.
    pub fn fit(&mut self, df: &DataFrame, rubric: &LoadedRubric) -> Result<&mut Self> {
        // Structured medians from the training split only.
        let mut medians = BTreeMap::new();
        for column in median_imputed_columns() {
            require_column(df, column)?;
            let values: Vec<f64> = column_f64(df, column)?.into_iter().flatten().collect();
            let median = if values.is_empty() {
                0.0
            } else {
                let mut sorted = values;
                sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
                percentile(&sorted, 0.5)
            };
            medians.insert(column.to_string(), median);
        }
        for column in zero_imputed_columns() {
            require_column(df, column)?;
        }

        // Rubric medians on the target scale, zero-as-missing already null.
        let rubric_frame = self.rubric_on_target_scale(rubric)?;
        let mut rubric_medians = BTreeMap::new();
        for dim in ALL_DIMENSIONS.iter() {
            let values: Vec<f64> = column_f64(&rubric_frame, dim)?
                .into_iter()
                .flatten()
                .collect();
            let median = if values.is_empty() {
                // No scored applicants for this dimension: fall back to the
                // scale midpoint rather than zero.
                (1.0 + self.scale_target.scale_max() as f64) / 2.0
            } else {
                let mut sorted = values;
                sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
                percentile(&sorted, 0.5)
            };
            rubric_medians.insert(dim.to_string(), median);
        }

        let feature_columns: Vec<String> = NUMERIC_FEATURES
            .iter()
            .chain(BINARY_FEATURES.iter())
            .chain(ACADEMIC_FEATURES.iter())
            .chain(ENGINEERED_FEATURES.iter())
            .chain(ALL_DIMENSIONS.iter())
            .map(|s| (*s).to_string())
            .collect();

        let mut state = FittedState {
            medians,
            rubric_medians,
            feature_columns,
            rubric_version_at_fit: rubric.version,
            scale_target: self.scale_target,
            dimension_names: ALL_DIMENSIONS.iter().map(|s| (*s).to_string()).collect(),
            marginals: BTreeMap::new(),
            metadata: None,
        };

        let matrix = build_matrix(df, &rubric_frame, &state, &self.report)?;

        for column in &state.feature_columns {
            let values: Vec<f64> = column_f64(&matrix, column)?.into_iter().flatten().collect();
            state
                .marginals
                .insert(column.clone(), FeatureMarginal::from_values(&values));
        }

        info!(
            features = state.feature_columns.len(),
            rows = matrix.height(),
            "feature pipeline fitted"
        );
        self.fitted = Some(state);
        self.retained = Some(matrix);
        Ok(self)
    }

    /// Transform a frame with the fitted statistics. Output columns are
    /// `Amcas_ID` followed by `feature_columns()` in fitted order.
    pub fn transform(&self, df: &DataFrame, rubric: &LoadedRubric) -> Result<DataFrame> {
        let state = self.fitted.as_ref().ok_or_else(|| {
            ProcessingError::Configuration("transform requires a fitted pipeline".into())
        })?;
        let rubric_frame = self.rubric_on_target_scale(rubric)?;
        build_matrix(df, &rubric_frame, state, &self.report)
    }

    /// Fit, then return the matrix already computed by `fit` — the same
    /// data is never transformed twice.
    pub fn fit_transform(&mut self, df: &DataFrame, rubric: &LoadedRubric) -> Result<DataFrame> {
        self.fit(df, rubric)?;
        Ok(self
            .retained
            .clone()
            .expect("fit retains the training matrix"))
    }

    /// The fitted feature ordering.
    pub fn feature_columns(&self) -> Result<&[String]> {
        self.fitted
            .as_ref()
            .map(|s| s.feature_columns.as_slice())
            .ok_or_else(|| ProcessingError::Configuration("pipeline is not fitted".into()))
    }

    /// Training marginals per feature.
    pub fn marginals(&self) -> Result<&BTreeMap<String, FeatureMarginal>> {
        self.fitted
            .as_ref()
            .map(|s| &s.marginals)
            .ok_or_else(|| ProcessingError::Configuration("pipeline is not fitted".into()))
    }

    pub fn metadata(&self) -> Option<&TrainingMetadata> {
        self.fitted.as_ref().and_then(|s| s.metadata.as_ref())
    }

    fn rubric_on_target_scale(&self, rubric: &LoadedRubric) -> Result<DataFrame> {
        let mut frame = rubric.frame.clone();
        match (rubric.version, self.scale_target) {
            (RubricVersion::V2, RubricVersion::V1) => {
                debug!("rescaling v2 rubric scores onto the v1 scale");
                rescale_dimensions_to_v1(&mut frame)?;
            }
            (RubricVersion::V1, RubricVersion::V2) => {
                return Err(ProcessingError::Schema {
                    file: "rubric cache".to_string(),
                    detail: "v1 cache cannot feed a model trained on the v2 scale; re-score the cycle"
                        .to_string(),
                });
            }
            _ => {}
        }
        Ok(frame)
    }

    /// Serialize the fitted pipeline with a content hash.
    pub fn save(&self, path: &Path) -> Result<()> {
        let state = self.fitted.as_ref().ok_or_else(|| {
            ProcessingError::Configuration("save requires a fitted pipeline".into())
        })?;
        let payload = serde_json::to_string(state)?;
        let artifact = PipelineArtifact {
            format_version: PIPELINE_FORMAT_VERSION,
            content_hash: hex::encode(Sha256::digest(payload.as_bytes())),
            state: state.clone(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&artifact)?)?;
        fs::rename(&tmp, path)?;
        info!(path = %path.display(), "feature pipeline saved");
        Ok(())
    }

    /// Load a serialized pipeline, verifying the format version and
    /// content hash. The loaded pipeline is read-only: it transforms but
    /// will not re-fit implicitly.
    pub fn load(path: &Path, report: RunReport) -> Result<Self> {
        let artifact: PipelineArtifact = serde_json::from_str(&fs::read_to_string(path)?)?;
        if artifact.format_version != PIPELINE_FORMAT_VERSION {
            return Err(ProcessingError::PipelineVersionMismatch {
                expected: PIPELINE_FORMAT_VERSION,
                found: artifact.format_version,
            });
        }
        let payload = serde_json::to_string(&artifact.state)?;
        let computed = hex::encode(Sha256::digest(payload.as_bytes()));
        if computed != artifact.content_hash {
            return Err(ProcessingError::PipelineHashMismatch {
                stored: artifact.content_hash,
                computed,
            });
        }
        Ok(Self {
            report,
            scale_target: artifact.state.scale_target,
            fitted: Some(artifact.state),
            retained: None,
        })
    }
}

fn require_column(df: &DataFrame, column: &str) -> Result<()> {
    if df.column(column).is_err() {
        return Err(ProcessingError::FeatureColumnMissing {
            column: column.to_string(),
        });
    }
    Ok(())
}

/// The transform proper: structured extraction with fitted imputation,
/// composite engineering, rubric merge with fitted median imputation,
/// reindex to the fitted ordering, protected-attribute guard, and the
/// terminal NaN sweep.
fn build_matrix(
    df: &DataFrame,
    rubric_frame: &DataFrame,
    state: &FittedState,
    report: &RunReport,
) -> Result<DataFrame> {
    require_column(df, AMCAS_ID)?;

    // 1. Structured extraction with fitted imputation.
    let ids = df
        .column(AMCAS_ID)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let mut working = DataFrame::new(vec![ids.into_column()])?;

    for column in median_imputed_columns() {
        require_column(df, column)?;
        let median = *state.medians.get(column).unwrap_or(&0.0);
        let values: Vec<f64> = column_f64(df, column)?
            .into_iter()
            .map(|v| v.unwrap_or(median))
            .collect();
        working.with_column(Column::new(column.into(), values))?;
    }
    for column in zero_imputed_columns() {
        require_column(df, column)?;
        let values: Vec<f64> = column_f64(df, column)?
            .into_iter()
            .map(|v| v.unwrap_or(0.0))
            .collect();
        working.with_column(Column::new(column.into(), values))?;
    }
    // Presence flags feed Experience_Diversity; zero when absent upstream.
    for column in crate::taxonomy::PRESENCE_FLAGS {
        let values: Vec<f64> = match df.column(column) {
            Ok(_) => column_f64(df, column)?
                .into_iter()
                .map(|v| v.unwrap_or(0.0))
                .collect(),
            Err(_) => vec![0.0; df.height()],
        };
        working.with_column(Column::new((*column).into(), values))?;
    }

    // 2. Composite engineering.
    composites::append_composites(&mut working)?;

    // 3+4. Merge rubric scores and impute zero-as-missing with fitted
    // medians (applicants absent from the cache get the median row).
    let mut combined = working.join(
        rubric_frame,
        [AMCAS_ID],
        [AMCAS_ID],
        JoinArgs::new(JoinType::Left),
        None,
    )?;
    for dim in &state.dimension_names {
        let median = *state.rubric_medians.get(dim).unwrap_or(&0.0);
        let values: Vec<f64> = match combined.column(dim.as_str()) {
            Ok(_) => column_f64(&combined, dim)?
                .into_iter()
                .map(|v| v.unwrap_or(median))
                .collect(),
            Err(_) => {
                return Err(ProcessingError::FeatureColumnMissing {
                    column: dim.clone(),
                });
            }
        };
        combined.replace(dim, Float64Chunked::from_vec(dim.as_str().into(), values).into_series())?;
    }

    // 5. Protected-attribute guard. Runs unconditionally, even if a
    // drifted configuration let one through to this point.
    let column_names: Vec<String> = combined
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    for name in &column_names {
        if is_protected(name) {
            combined = combined.drop(name)?;
        }
    }

    // Reindex to the fitted ordering: absent columns are fatal, extras
    // are ignored with a warning.
    let mut selected: Vec<Column> = vec![combined.column(AMCAS_ID)?.clone()];
    for feature in &state.feature_columns {
        if combined.column(feature).is_err() {
            return Err(ProcessingError::FeatureColumnMissing {
                column: feature.clone(),
            });
        }
        // 6. Terminal NaN sweep.
        let values: Vec<f64> = column_f64(&combined, feature)?
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()).unwrap_or(0.0))
            .collect();
        selected.push(Column::new(feature.as_str().into(), values));
    }

    // Columns of the input frame the matrix never consumes: expected
    // metadata passes silently, anything else is warned and ignored.
    let known_meta = [
        AMCAS_ID,
        crate::taxonomy::APP_YEAR,
        crate::taxonomy::APPLICATION_REVIEW_SCORE,
        crate::taxonomy::SERVICE_RATING,
        crate::taxonomy::EXP_HOUR_TOTAL,
        "GPA_Trend_Ord",
    ];
    let extras: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .filter(|name| {
            !state.feature_columns.contains(name)
                && !crate::taxonomy::PRESENCE_FLAGS.contains(&name.as_str())
                && !known_meta.contains(&name.as_str())
                && !is_protected(name)
        })
        .collect();
    if !extras.is_empty() {
        report.record(QualityWarning::new(
            WarningKind::ExtraFeatureColumns,
            format!("{} column(s) outside the fitted ordering ignored: {extras:?}", extras.len()),
        ));
    }

    Ok(DataFrame::new(selected)?)
}
