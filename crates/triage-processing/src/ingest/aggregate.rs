//! One-to-many table aggregation: experiences, languages, parents, and
//! GPA trend collapse to one row per applicant before the join.

use polars::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::Result;
use crate::reporting::{QualityWarning, RunReport, WarningKind};
use crate::taxonomy::{
    AMCAS_ID, EXP_HOUR_TOTAL, EXPERIENCE_HOUR_BUCKETS, EXPERIENCE_PRESENCE_FLAGS,
    GPA_TREND_DEFAULT_ORD, GPA_TREND_ORDINALS, HOUR_FEATURES, PARENT_EDUCATION_DEFAULT_ORD,
    PARENT_EDUCATION_ORDINALS, PRESENCE_FLAGS,
};

/// Raw column names expected in the experiences file after normalization.
pub const EXP_TYPE: &str = "Exp_Type";
pub const EXP_DESC: &str = "Exp_Desc";

/// Raw column names in the parents and GPA-trend files.
pub const EDUCATION_LEVEL: &str = "Education_Level";
pub const GPA_TREND: &str = "GPA_Trend";
pub const GPA_TREND_ORD: &str = "GPA_Trend_Ord";
pub const NUM_LANGUAGES: &str = "Num_Languages";
pub const PARENT_EDUCATION_ORD: &str = "Parent_Education_Ord";

#[derive(Default, Clone)]
struct ExperienceAccumulator {
    hours: [f64; 7],
    total: f64,
    flags: [bool; 9],
}

/// Aggregate the experiences table: sum hours by bucket, derive presence
/// flags, and keep the grand total for the drift audit.
///
/// Experience types outside the bucket map are recorded once per distinct
/// type and otherwise ignored; they still count toward the grand total.
pub fn aggregate_experiences(frame: &DataFrame, report: &RunReport) -> Result<DataFrame> {
    let ids = frame
        .column(AMCAS_ID)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let ids = ids.i64()?;
    let types = frame.column(EXP_TYPE)?.as_materialized_series().clone();
    let types = types.str()?;
    let hours = frame
        .column(EXP_HOUR_TOTAL)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    let hours = hours.f64()?;

    let mut accumulators: BTreeMap<i64, ExperienceAccumulator> = BTreeMap::new();
    let mut unknown_types: HashSet<String> = HashSet::new();

    for idx in 0..frame.height() {
        let Some(id) = ids.get(idx) else { continue };
        let acc = accumulators.entry(id).or_default();
        let row_hours = hours.get(idx).unwrap_or(0.0);
        acc.total += row_hours;

        let Some(exp_type) = types.get(idx) else {
            continue;
        };

        match EXPERIENCE_HOUR_BUCKETS.get(exp_type) {
            Some(bucket) => {
                let slot = HOUR_FEATURES.iter().position(|h| h == bucket).expect("bucket maps onto HOUR_FEATURES");
                acc.hours[slot] += row_hours;
            }
            None => {
                if unknown_types.insert(exp_type.to_string()) {
                    report.record(
                        QualityWarning::new(
                            WarningKind::UnknownExperienceType,
                            format!("experience type '{exp_type}' not in bucket map; hours ignored"),
                        )
                        .with_file("experiences")
                        .with_column(EXP_TYPE),
                    );
                }
            }
        }

        if let Some(flag) = EXPERIENCE_PRESENCE_FLAGS.get(exp_type) {
            let slot = PRESENCE_FLAGS.iter().position(|f| f == flag).expect("flag maps onto PRESENCE_FLAGS");
            acc.flags[slot] = true;
        }
    }

    let ids_out: Vec<i64> = accumulators.keys().copied().collect();
    let mut columns: Vec<Column> = vec![Column::new(AMCAS_ID.into(), &ids_out)];

    for (slot, name) in HOUR_FEATURES.iter().enumerate() {
        let values: Vec<f64> = accumulators.values().map(|a| a.hours[slot]).collect();
        columns.push(Column::new((*name).into(), values));
    }

    let totals: Vec<f64> = accumulators.values().map(|a| a.total).collect();
    columns.push(Column::new(EXP_HOUR_TOTAL.into(), totals));

    for (slot, name) in PRESENCE_FLAGS.iter().enumerate() {
        let values: Vec<i64> = accumulators
            .values()
            .map(|a| i64::from(a.flags[slot]))
            .collect();
        columns.push(Column::new((*name).into(), values));
    }

    Ok(DataFrame::new(columns)?)
}

/// Concatenated experience descriptions per applicant, keyed by the
/// presence-flag domain. Free text feeds the rubric scorer only; it is
/// never joined into the unified frame.
pub fn collect_experience_texts(
    frame: &DataFrame,
) -> Result<HashMap<i64, HashMap<String, String>>> {
    let ids = frame
        .column(AMCAS_ID)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let ids = ids.i64()?;
    let types = frame.column(EXP_TYPE)?.as_materialized_series().clone();
    let types = types.str()?;

    let descs = match frame.column(EXP_DESC) {
        Ok(col) => Some(col.as_materialized_series().clone()),
        Err(_) => None,
    };

    let mut texts: HashMap<i64, HashMap<String, String>> = HashMap::new();
    if let Some(descs) = descs {
        let descs = descs.str()?;
        for idx in 0..frame.height() {
            let (Some(id), Some(exp_type), Some(desc)) =
                (ids.get(idx), types.get(idx), descs.get(idx))
            else {
                continue;
            };
            if desc.trim().is_empty() {
                continue;
            }
            let Some(flag) = EXPERIENCE_PRESENCE_FLAGS.get(exp_type) else {
                continue;
            };
            let entry = texts
                .entry(id)
                .or_default()
                .entry((*flag).to_string())
                .or_default();
            if !entry.is_empty() {
                entry.push_str("\n\n");
            }
            entry.push_str(desc.trim());
        }
    }

    Ok(texts)
}

/// Count language rows per applicant.
pub fn aggregate_languages(frame: &DataFrame) -> Result<DataFrame> {
    let ids = frame
        .column(AMCAS_ID)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let ids = ids.i64()?;

    let mut counts: BTreeMap<i64, i64> = BTreeMap::new();
    for id in ids.into_iter().flatten() {
        *counts.entry(id).or_default() += 1;
    }

    let ids_out: Vec<i64> = counts.keys().copied().collect();
    let values: Vec<i64> = counts.values().copied().collect();
    Ok(df!(AMCAS_ID => ids_out, NUM_LANGUAGES => values)?)
}

/// Take the max parent-education ordinal across both parents.
///
/// Levels outside the map default to the "Some College" ordinal, recorded
/// once per distinct level.
pub fn aggregate_parents(frame: &DataFrame, report: &RunReport) -> Result<DataFrame> {
    let ids = frame
        .column(AMCAS_ID)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let ids = ids.i64()?;
    let levels = frame
        .column(EDUCATION_LEVEL)?
        .as_materialized_series()
        .clone();
    let levels = levels.str()?;

    let mut max_ord: BTreeMap<i64, i64> = BTreeMap::new();
    let mut unknown_levels: HashSet<String> = HashSet::new();

    for idx in 0..frame.height() {
        let Some(id) = ids.get(idx) else { continue };
        let ord = match levels.get(idx) {
            Some(level) => match PARENT_EDUCATION_ORDINALS.get(level) {
                Some(ord) => *ord,
                None => {
                    if unknown_levels.insert(level.to_string()) {
                        report.record(
                            QualityWarning::new(
                                WarningKind::UnknownParentEducation,
                                format!(
                                    "education level '{level}' not in ordinal map; defaulting to {PARENT_EDUCATION_DEFAULT_ORD}"
                                ),
                            )
                            .with_file("parents")
                            .with_column(EDUCATION_LEVEL),
                        );
                    }
                    PARENT_EDUCATION_DEFAULT_ORD
                }
            },
            None => PARENT_EDUCATION_DEFAULT_ORD,
        };
        let entry = max_ord.entry(id).or_insert(i64::MIN);
        *entry = (*entry).max(ord);
    }

    let ids_out: Vec<i64> = max_ord.keys().copied().collect();
    let values: Vec<i64> = max_ord.values().copied().collect();
    Ok(df!(AMCAS_ID => ids_out, PARENT_EDUCATION_ORD => values)?)
}

/// Convert the GPA-trend category to its ordinal.
pub fn map_gpa_trend(frame: &DataFrame, report: &RunReport) -> Result<DataFrame> {
    let ids = frame
        .column(AMCAS_ID)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let ids = ids.i64()?;
    let trends = frame.column(GPA_TREND)?.as_materialized_series().clone();
    let trends = trends.str()?;

    let mut ordinals: BTreeMap<i64, i64> = BTreeMap::new();
    let mut unknown: HashSet<String> = HashSet::new();

    for idx in 0..frame.height() {
        let Some(id) = ids.get(idx) else { continue };
        let ord = match trends.get(idx) {
            Some(trend) => match GPA_TREND_ORDINALS.get(trend) {
                Some(ord) => *ord,
                None => {
                    if unknown.insert(trend.to_string()) {
                        report.record(
                            QualityWarning::new(
                                WarningKind::UnknownGpaTrend,
                                format!("trend '{trend}' not in ordinal map; defaulting to stable"),
                            )
                            .with_file("gpa_trend")
                            .with_column(GPA_TREND),
                        );
                    }
                    GPA_TREND_DEFAULT_ORD
                }
            },
            None => GPA_TREND_DEFAULT_ORD,
        };
        ordinals.insert(id, ord);
    }

    let ids_out: Vec<i64> = ordinals.keys().copied().collect();
    let values: Vec<i64> = ordinals.values().copied().collect();
    Ok(df!(AMCAS_ID => ids_out, GPA_TREND_ORD => values)?)
}
