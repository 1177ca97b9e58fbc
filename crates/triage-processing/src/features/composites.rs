//! Engineered composite features.
//!
//! Each composite is a pure function of a named, small set of structured
//! columns, mirroring how reviewers reason about an application. Ratios
//! define 0/0 as 0: an applicant with no hours in either bucket has no
//! community-engagement signal, not an undefined one. No composite is a
//! redundant linear sum of its inputs.

use polars::prelude::*;

use crate::error::Result;
use crate::taxonomy::{ADVERSITY_FLAGS, PRESENCE_FLAGS, RESILIENCE_FLAGS};
use crate::utils::column_f64;

/// `non_med_volunteer / (non_med_volunteer + med_volunteer)`, 0 when the
/// denominator is 0.
pub fn community_engaged_ratio(non_med_volunteer: f64, med_volunteer: f64) -> f64 {
    let denominator = non_med_volunteer + med_volunteer;
    if denominator == 0.0 {
        0.0
    } else {
        non_med_volunteer / denominator
    }
}

/// `med_employment / (shadowing + med_employment)`, 0 when the
/// denominator is 0.
pub fn direct_care_ratio(med_employment: f64, shadowing: f64) -> f64 {
    let denominator = shadowing + med_employment;
    if denominator == 0.0 {
        0.0
    } else {
        med_employment / denominator
    }
}

/// Sum of the five SES indicator flags.
pub fn adversity_count(flags: &[f64]) -> f64 {
    flags.iter().sum()
}

/// Adversity count plus the three resilience flags.
pub fn grit_index(adversity: f64, resilience_flags: &[f64]) -> f64 {
    adversity + resilience_flags.iter().sum::<f64>()
}

/// Count of the nine experience-presence booleans.
pub fn experience_diversity(presence_flags: &[f64]) -> f64 {
    presence_flags.iter().sum()
}

fn column_or_zeros(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    match df.column(name) {
        Ok(_) => Ok(column_f64(df, name)?
            .into_iter()
            .map(|v| v.unwrap_or(0.0))
            .collect()),
        Err(_) => Ok(vec![0.0; df.height()]),
    }
}

/// Append all five composite columns to `df`.
///
/// Constituent columns absent from the frame contribute 0, so composites
/// never become NaN from a missing input; the structured-column schema
/// check upstream decides whether absence was legal.
pub fn append_composites(df: &mut DataFrame) -> Result<()> {
    let non_med = column_or_zeros(df, "Exp_Hour_Volunteer_Non_Med")?;
    let med_vol = column_or_zeros(df, "Exp_Hour_Volunteer_Med")?;
    let med_employ = column_or_zeros(df, "Exp_Hour_Employ_Med")?;
    let shadowing = column_or_zeros(df, "Exp_Hour_Shadowing")?;

    let adversity_inputs: Vec<Vec<f64>> = ADVERSITY_FLAGS
        .iter()
        .map(|flag| column_or_zeros(df, flag))
        .collect::<Result<_>>()?;
    let resilience_inputs: Vec<Vec<f64>> = RESILIENCE_FLAGS
        .iter()
        .map(|flag| column_or_zeros(df, flag))
        .collect::<Result<_>>()?;
    let presence_inputs: Vec<Vec<f64>> = PRESENCE_FLAGS
        .iter()
        .map(|flag| column_or_zeros(df, flag))
        .collect::<Result<_>>()?;

    let height = df.height();
    let mut community = Vec::with_capacity(height);
    let mut direct_care = Vec::with_capacity(height);
    let mut adversity = Vec::with_capacity(height);
    let mut grit = Vec::with_capacity(height);
    let mut diversity = Vec::with_capacity(height);

    for row in 0..height {
        community.push(community_engaged_ratio(non_med[row], med_vol[row]));
        direct_care.push(direct_care_ratio(med_employ[row], shadowing[row]));

        let adversity_flags: Vec<f64> =
            adversity_inputs.iter().map(|col| col[row]).collect();
        let row_adversity = adversity_count(&adversity_flags);
        adversity.push(row_adversity);

        let resilience_flags: Vec<f64> =
            resilience_inputs.iter().map(|col| col[row]).collect();
        grit.push(grit_index(row_adversity, &resilience_flags));

        let presence: Vec<f64> = presence_inputs.iter().map(|col| col[row]).collect();
        diversity.push(experience_diversity(&presence));
    }

    df.with_column(Column::new("Community_Engaged_Ratio".into(), community))?;
    df.with_column(Column::new("Direct_Care_Ratio".into(), direct_care))?;
    df.with_column(Column::new("Adversity_Count".into(), adversity))?;
    df.with_column(Column::new("Grit_Index".into(), grit))?;
    df.with_column(Column::new("Experience_Diversity".into(), diversity))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ratios_define_zero_denominator_as_zero() {
        assert_eq!(community_engaged_ratio(0.0, 0.0), 0.0);
        assert_eq!(direct_care_ratio(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_community_engaged_ratio() {
        assert_eq!(community_engaged_ratio(300.0, 100.0), 0.75);
        assert_eq!(community_engaged_ratio(0.0, 100.0), 0.0);
        assert_eq!(community_engaged_ratio(100.0, 0.0), 1.0);
    }

    #[test]
    fn test_direct_care_ratio() {
        assert_eq!(direct_care_ratio(150.0, 50.0), 0.75);
        assert_eq!(direct_care_ratio(0.0, 40.0), 0.0);
    }

    #[test]
    fn test_counts() {
        assert_eq!(adversity_count(&[1.0, 0.0, 1.0, 1.0, 0.0]), 3.0);
        assert_eq!(grit_index(3.0, &[1.0, 0.0, 1.0]), 5.0);
        assert_eq!(
            experience_diversity(&[1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
            4.0
        );
    }

    #[test]
    fn test_append_composites_never_produces_nan() {
        let mut df = df!(
            "Exp_Hour_Volunteer_Non_Med" => &[0.0f64, 200.0],
            "Exp_Hour_Volunteer_Med" => &[0.0f64, 100.0],
            "Exp_Hour_Employ_Med" => &[0.0f64, 300.0],
            "Exp_Hour_Shadowing" => &[0.0f64, 100.0],
            "First_Generation_Ind" => &[1.0f64, 0.0],
            "Disadvantaged_Ind" => &[1.0f64, 0.0],
            "SES_Value_Ind" => &[0.0f64, 0.0],
            "Pell_Grant_Ind" => &[1.0f64, 0.0],
            "Fee_Assistance_Ind" => &[0.0f64, 0.0],
        )
        .unwrap();

        append_composites(&mut df).unwrap();

        let community = column_f64(&df, "Community_Engaged_Ratio").unwrap();
        assert_eq!(community, vec![Some(0.0), Some(2.0 / 3.0)]);
        assert!(community.iter().flatten().all(|v| v.is_finite()));

        let adversity = column_f64(&df, "Adversity_Count").unwrap();
        assert_eq!(adversity, vec![Some(3.0), Some(0.0)]);

        // Presence flags absent from the frame: diversity defaults to 0.
        let diversity = column_f64(&df, "Experience_Diversity").unwrap();
        assert_eq!(diversity, vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_append_composites_with_null_constituents() {
        let mut df = df!(
            "Exp_Hour_Volunteer_Non_Med" => &[Some(100.0f64), None],
            "Exp_Hour_Volunteer_Med" => &[Some(100.0f64), None],
        )
        .unwrap();
        append_composites(&mut df).unwrap();

        let community = column_f64(&df, "Community_Engaged_Ratio").unwrap();
        assert_eq!(community, vec![Some(0.5), Some(0.0)]);
    }
}
