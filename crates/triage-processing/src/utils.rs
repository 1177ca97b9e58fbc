//! Shared utilities for the ingestion and feature layers.
//!
//! Small helper functions used across modules; anything with policy
//! attached (alias tables, ordinal maps) lives in [`crate::taxonomy`].

use polars::prelude::*;

use crate::error::Result;

// =============================================================================
// Data type utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

// =============================================================================
// Indicator normalization
// =============================================================================

/// Parse one raw indicator cell into 0/1.
///
/// Accepts Yes/No, Y/N, True/False, and 1/0 in any casing. Anything else
/// (including empty strings) is `None` and stays null.
pub fn parse_indicator(raw: &str) -> Option<i64> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Some(1),
        "no" | "n" | "false" | "0" => Some(0),
        _ => None,
    }
}

/// Normalize an indicator column to Int64 0/1 in place.
///
/// String columns are parsed cell-by-cell; numeric columns are clamped to
/// 0/1 (any non-zero becomes 1); boolean columns are cast directly.
pub fn normalize_indicator_column(df: &mut DataFrame, col_name: &str) -> Result<()> {
    let column = df.column(col_name)?.clone();
    let series = column.as_materialized_series();

    let normalized: Series = match series.dtype() {
        DataType::String => {
            let ca = series.str()?;
            ca.into_iter()
                .map(|opt| opt.and_then(parse_indicator))
                .collect::<Int64Chunked>()
                .into_series()
        }
        DataType::Boolean => series.cast(&DataType::Int64)?,
        dtype if is_numeric_dtype(dtype) => {
            let ca = series.cast(&DataType::Float64)?;
            let ca = ca.f64()?;
            ca.into_iter()
                .map(|opt| opt.map(|v| i64::from(v != 0.0)))
                .collect::<Int64Chunked>()
                .into_series()
        }
        _ => return Ok(()),
    };

    df.replace(col_name, normalized.with_name(col_name.into()))?;
    Ok(())
}

// =============================================================================
// Series helpers
// =============================================================================

/// Median of a column as f64, ignoring nulls. `None` when all-null.
pub fn column_median(df: &DataFrame, col_name: &str) -> Result<Option<f64>> {
    let column = df.column(col_name)?;
    Ok(column.as_materialized_series().median())
}

/// Collect a column's non-null i64 values into a sorted, deduplicated Vec.
pub fn distinct_ids(df: &DataFrame, col_name: &str) -> Result<Vec<i64>> {
    let column = df.column(col_name)?;
    let casted = column.as_materialized_series().cast(&DataType::Int64)?;
    let mut ids: Vec<i64> = casted.i64()?.into_iter().flatten().collect();
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Extract a column as `Vec<Option<f64>>` for row-wise computation.
pub fn column_f64(df: &DataFrame, col_name: &str) -> Result<Vec<Option<f64>>> {
    let column = df.column(col_name)?;
    let casted = column.as_materialized_series().cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_indicator_accepted_spellings() {
        for yes in ["Yes", "yes", "Y", "y", "True", "TRUE", "1"] {
            assert_eq!(parse_indicator(yes), Some(1), "{yes}");
        }
        for no in ["No", "no", "N", "n", "False", "0"] {
            assert_eq!(parse_indicator(no), Some(0), "{no}");
        }
        assert_eq!(parse_indicator("maybe"), None);
        assert_eq!(parse_indicator(""), None);
    }

    #[test]
    fn test_normalize_indicator_column_strings() {
        let mut df = df!(
            "Disadvantaged_Ind" => &["Yes", "No", "Y", "n", "unknown"],
        )
        .unwrap();
        normalize_indicator_column(&mut df, "Disadvantaged_Ind").unwrap();

        let col = df.column("Disadvantaged_Ind").unwrap();
        let values: Vec<Option<i64>> = col
            .as_materialized_series()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(values, vec![Some(1), Some(0), Some(1), Some(0), None]);
    }

    #[test]
    fn test_normalize_indicator_column_numeric() {
        let mut df = df!("Pell_Grant_Ind" => &[0i64, 1, 1, 0]).unwrap();
        normalize_indicator_column(&mut df, "Pell_Grant_Ind").unwrap();
        let values: Vec<Option<i64>> = df
            .column("Pell_Grant_Ind")
            .unwrap()
            .as_materialized_series()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(values, vec![Some(0), Some(1), Some(1), Some(0)]);
    }

    #[test]
    fn test_distinct_ids_sorted_and_deduped() {
        let df = df!("Amcas_ID" => &[3i64, 1, 2, 3, 1]).unwrap();
        assert_eq!(distinct_ids(&df, "Amcas_ID").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_column_median_ignores_nulls() {
        let df = df!("Exp_Hour_Total" => &[Some(10.0f64), None, Some(30.0)]).unwrap();
        assert_eq!(column_median(&df, "Exp_Hour_Total").unwrap(), Some(20.0));
    }
}
