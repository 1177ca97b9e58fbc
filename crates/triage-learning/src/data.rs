//! Feature-matrix extraction from the pipeline's output frame.
//!
//! The model layer works on plain row-major `f64` matrices: the feature
//! pipeline guarantees a dense, ordered, NaN-free frame, and trees only
//! need threshold comparisons. Column names travel with the matrix so
//! scoring can fail loudly on a missing feature instead of shifting
//! columns silently.

use polars::prelude::DataFrame;
use std::collections::HashMap;

use crate::error::{LearningError, Result};
use triage_processing::taxonomy::AMCAS_ID;
use triage_processing::utils::column_f64;

/// A dense feature matrix with ids and optional training targets.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub ids: Vec<i64>,
    pub feature_names: Vec<String>,
    /// Row-major: `rows[i][j]` is feature `j` of applicant `i`.
    pub rows: Vec<Vec<f64>>,
    /// Observed review scores (training/test only).
    pub targets: Option<Vec<f64>>,
}

impl Dataset {
    /// Build from a feature frame (`Amcas_ID` + feature columns in fitted
    /// order), attaching targets from a score lookup when provided.
    ///
    /// Every expected feature column must be present; applicants missing
    /// from the target lookup make the dataset unusable for training.
    pub fn from_feature_frame(
        frame: &DataFrame,
        expected_columns: &[String],
        targets: Option<&HashMap<i64, f64>>,
    ) -> Result<Self> {
        let ids: Vec<i64> = {
            let column = frame
                .column(AMCAS_ID)
                .map_err(|_| LearningError::FeatureColumnMissing {
                    column: AMCAS_ID.to_string(),
                })?;
            column
                .as_materialized_series()
                .cast(&polars::prelude::DataType::Int64)?
                .i64()?
                .into_iter()
                .map(|opt| opt.ok_or_else(|| LearningError::InvalidData("null applicant ID".into())))
                .collect::<Result<_>>()?
        };

        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(expected_columns.len());
        for name in expected_columns {
            if frame.column(name).is_err() {
                return Err(LearningError::FeatureColumnMissing { column: name.clone() });
            }
            let values: Vec<f64> = column_f64(frame, name)
                .map_err(|e| LearningError::InvalidData(e.to_string()))?
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect();
            if values.iter().any(|v| !v.is_finite()) {
                return Err(LearningError::InvalidData(format!(
                    "feature '{name}' contains NaN after the pipeline's terminal sweep"
                )));
            }
            columns.push(values);
        }

        let rows: Vec<Vec<f64>> = (0..ids.len())
            .map(|i| columns.iter().map(|c| c[i]).collect())
            .collect();

        let targets = match targets {
            None => None,
            Some(lookup) => {
                let mut values = Vec::with_capacity(ids.len());
                for id in &ids {
                    match lookup.get(id) {
                        Some(score) => values.push(*score),
                        None => {
                            return Err(LearningError::InvalidData(format!(
                                "applicant {id} has no review score in the target lookup"
                            )));
                        }
                    }
                }
                Some(values)
            }
        };

        Ok(Self {
            ids,
            feature_names: expected_columns.to_vec(),
            rows,
            targets,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a feature column by name.
    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|n| n == name)
    }

    /// One feature column as a vector.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[index]).collect()
    }

    /// Subset by row indices, preserving order.
    pub fn select(&self, indices: &[usize]) -> Dataset {
        Dataset {
            ids: indices.iter().map(|&i| self.ids[i]).collect(),
            feature_names: self.feature_names.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            targets: self
                .targets
                .as_ref()
                .map(|t| indices.iter().map(|&i| t[i]).collect()),
        }
    }

    /// Copy with the named columns zeroed out; used by the SES ablation.
    pub fn with_columns_zeroed(&self, names: &[&str]) -> Dataset {
        let indices: Vec<usize> = names.iter().filter_map(|n| self.feature_index(n)).collect();
        let mut clone = self.clone();
        for row in &mut clone.rows {
            for &idx in &indices {
                row[idx] = 0.0;
            }
        }
        clone
    }

    /// Targets or an error (training paths require labels).
    pub fn require_targets(&self) -> Result<&[f64]> {
        self.targets
            .as_deref()
            .ok_or_else(|| LearningError::InvalidData("dataset has no training targets".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use pretty_assertions::assert_eq;

    fn frame() -> DataFrame {
        df!(
            AMCAS_ID => &[1i64, 2, 3],
            "a" => &[1.0f64, 2.0, 3.0],
            "b" => &[0.5f64, 0.0, 1.5],
        )
        .unwrap()
    }

    #[test]
    fn test_from_feature_frame_row_major() {
        let names = vec!["a".to_string(), "b".to_string()];
        let ds = Dataset::from_feature_frame(&frame(), &names, None).unwrap();
        assert_eq!(ds.ids, vec![1, 2, 3]);
        assert_eq!(ds.rows[1], vec![2.0, 0.0]);
        assert!(ds.targets.is_none());
    }

    #[test]
    fn test_missing_expected_column_is_fatal() {
        let names = vec!["a".to_string(), "missing".to_string()];
        let err = Dataset::from_feature_frame(&frame(), &names, None).unwrap_err();
        assert!(matches!(
            err,
            LearningError::FeatureColumnMissing { ref column } if column == "missing"
        ));
    }

    #[test]
    fn test_targets_attached_by_id() {
        let names = vec!["a".to_string()];
        let lookup = HashMap::from([(1, 20.0), (2, 10.0), (3, 5.0)]);
        let ds = Dataset::from_feature_frame(&frame(), &names, Some(&lookup)).unwrap();
        assert_eq!(ds.targets.unwrap(), vec![20.0, 10.0, 5.0]);
    }

    #[test]
    fn test_missing_target_is_invalid_data() {
        let names = vec!["a".to_string()];
        let lookup = HashMap::from([(1, 20.0)]);
        let err = Dataset::from_feature_frame(&frame(), &names, Some(&lookup)).unwrap_err();
        assert!(matches!(err, LearningError::InvalidData(_)));
    }

    #[test]
    fn test_select_and_zeroing() {
        let names = vec!["a".to_string(), "b".to_string()];
        let ds = Dataset::from_feature_frame(&frame(), &names, None).unwrap();

        let subset = ds.select(&[2, 0]);
        assert_eq!(subset.ids, vec![3, 1]);
        assert_eq!(subset.rows[0], vec![3.0, 1.5]);

        let zeroed = ds.with_columns_zeroed(&["b"]);
        assert_eq!(zeroed.column(1), vec![0.0, 0.0, 0.0]);
        assert_eq!(zeroed.column(0), vec![1.0, 2.0, 3.0]);
    }
}
