//! Multi-version rubric cache loading for the feature pipeline.
//!
//! Two cache generations coexist in the wild: v1 wrote a flat
//! `id → {dimension: score}` map with legacy dimension names on a 1-5
//! scale; v2 nests scores under a tagged record on a 1-4 scale. The
//! version is detected from the nesting shape once, at load; the canonical
//! name map is applied here, and nothing downstream branches on version
//! again.
//!
//! A literal 0 is treated as missing: v1 data recorded unscored
//! dimensions as zeros, and a zero is outside every valid scale.

use polars::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ProcessingError, Result};
use crate::taxonomy::{ALL_DIMENSIONS, AMCAS_ID, RubricVersion, V1_TO_V2_DIMENSIONS, rescale_v2_to_v1};

/// A rubric frame plus the cache version it was read from.
#[derive(Debug)]
pub struct LoadedRubric {
    /// One row per applicant: `Amcas_ID` + the 21 canonical dimensions as
    /// nullable floats. Zeros have already become nulls.
    pub frame: DataFrame,
    pub version: RubricVersion,
}

/// Load a rubric cache file, auto-detecting v1 vs v2 by nesting shape.
pub fn load_rubric_frame(path: &Path) -> Result<LoadedRubric> {
    let raw = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;
    let records = value.as_object().ok_or_else(|| ProcessingError::Schema {
        file: path.display().to_string(),
        detail: "rubric cache root is not an object".to_string(),
    })?;

    let version = detect_version(records.values().next());
    debug!(?version, records = records.len(), "rubric cache detected");

    let mut rows: BTreeMap<i64, BTreeMap<&'static str, f64>> = BTreeMap::new();
    for (key, record) in records {
        let id: i64 = key.parse().map_err(|_| ProcessingError::Schema {
            file: path.display().to_string(),
            detail: format!("cache key '{key}' is not an applicant ID"),
        })?;
        let scores = extract_scores(record, version);
        rows.insert(id, scores);
    }

    let ids: Vec<i64> = rows.keys().copied().collect();
    let mut columns: Vec<Column> = vec![Column::new(AMCAS_ID.into(), &ids)];
    for dim in ALL_DIMENSIONS.iter() {
        let values: Vec<Option<f64>> = rows.values().map(|r| r.get(*dim).copied()).collect();
        columns.push(Column::new((*dim).into(), values));
    }

    info!(applicants = ids.len(), ?version, "rubric frame loaded");
    Ok(LoadedRubric {
        frame: DataFrame::new(columns)?,
        version,
    })
}

/// v2 nests scores under a `scores` object; v1 is a flat dimension map.
fn detect_version(sample: Option<&Value>) -> RubricVersion {
    match sample {
        Some(record) if record.get("scores").is_some_and(Value::is_object) => RubricVersion::V2,
        _ => RubricVersion::V1,
    }
}

/// Pull scores out of one record, mapping names to the canonical set and
/// nulling zeros. Dimensions outside the canonical set are dropped.
fn extract_scores(record: &Value, version: RubricVersion) -> BTreeMap<&'static str, f64> {
    let map = match version {
        RubricVersion::V2 => record.get("scores").and_then(Value::as_object),
        RubricVersion::V1 => record.as_object(),
    };

    let mut scores = BTreeMap::new();
    let Some(map) = map else {
        return scores;
    };

    for (name, value) in map {
        let canonical: Option<&'static str> = match version {
            RubricVersion::V2 => ALL_DIMENSIONS.iter().find(|d| **d == name.as_str()).copied(),
            RubricVersion::V1 => V1_TO_V2_DIMENSIONS.get(name.as_str()).copied(),
        };
        let Some(canonical) = canonical else { continue };
        let Some(score) = value.as_f64() else { continue };
        // Zero-as-missing: stays null for downstream median imputation.
        if score != 0.0 {
            scores.insert(canonical, score);
        }
    }
    scores
}

/// Rescale every dimension column from the v2 scale onto the v1 scale
/// (`1 + (s-1)·4/3`). Applied only when the fitted model expects v1-scale
/// inputs; nulls pass through.
pub fn rescale_dimensions_to_v1(frame: &mut DataFrame) -> Result<()> {
    for dim in ALL_DIMENSIONS.iter() {
        let Ok(column) = frame.column(dim) else { continue };
        let casted = column.as_materialized_series().cast(&DataType::Float64)?;
        let rescaled: Series = casted
            .f64()?
            .into_iter()
            .map(|opt| opt.map(rescale_v2_to_v1))
            .collect::<Float64Chunked>()
            .into_series();
        frame.replace(dim, rescaled.with_name((*dim).into()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::column_f64;
    use pretty_assertions::assert_eq;

    fn write_cache(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rubric_cache.json");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_v2_cache_detected_and_loaded() {
        let (_dir, path) = write_cache(
            r#"{
                "101": {
                    "format_version": "v2",
                    "prompt_hash": "abc",
                    "model_version": "m",
                    "scores": {"ps_motivation": 3, "exp_research": 4, "sec_teamwork": null}
                }
            }"#,
        );
        let loaded = load_rubric_frame(&path).unwrap();
        assert_eq!(loaded.version, RubricVersion::V2);
        assert_eq!(loaded.frame.height(), 1);
        assert_eq!(
            column_f64(&loaded.frame, "ps_motivation").unwrap(),
            vec![Some(3.0)]
        );
        assert_eq!(column_f64(&loaded.frame, "sec_teamwork").unwrap(), vec![None]);
    }

    #[test]
    fn test_v1_flat_cache_mapped_to_canonical_names() {
        let (_dir, path) = write_cache(
            r#"{
                "202": {"motivation": 5, "research_quality": 4, "not_a_dimension": 3}
            }"#,
        );
        let loaded = load_rubric_frame(&path).unwrap();
        assert_eq!(loaded.version, RubricVersion::V1);
        assert_eq!(
            column_f64(&loaded.frame, "ps_motivation").unwrap(),
            vec![Some(5.0)]
        );
        assert_eq!(
            column_f64(&loaded.frame, "exp_research").unwrap(),
            vec![Some(4.0)]
        );
    }

    #[test]
    fn test_zero_scores_become_null() {
        let (_dir, path) = write_cache(r#"{"303": {"motivation": 0, "reflection": 2}}"#);
        let loaded = load_rubric_frame(&path).unwrap();
        assert_eq!(column_f64(&loaded.frame, "ps_motivation").unwrap(), vec![None]);
        assert_eq!(
            column_f64(&loaded.frame, "ps_reflection").unwrap(),
            vec![Some(2.0)]
        );
    }

    #[test]
    fn test_rescale_to_v1_scale() {
        let (_dir, path) = write_cache(
            r#"{"404": {"format_version": "v2", "scores": {"ps_motivation": 1, "ps_growth": 4}}}"#,
        );
        let mut loaded = load_rubric_frame(&path).unwrap();
        rescale_dimensions_to_v1(&mut loaded.frame).unwrap();

        assert_eq!(
            column_f64(&loaded.frame, "ps_motivation").unwrap(),
            vec![Some(1.0)]
        );
        assert_eq!(column_f64(&loaded.frame, "ps_growth").unwrap(), vec![Some(5.0)]);
    }

    #[test]
    fn test_non_numeric_key_is_schema_error() {
        let (_dir, path) = write_cache(r#"{"not-an-id": {"motivation": 3}}"#);
        let err = load_rubric_frame(&path).unwrap_err();
        assert!(matches!(err, ProcessingError::Schema { .. }));
    }
}
