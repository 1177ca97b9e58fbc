//! Central registry of column names, aliases, feature lists, and scoring
//! taxonomy.
//!
//! Every other module resolves names through this registry: the ingestion
//! layer uses the alias tables and [`canonicalize`], the feature pipeline
//! uses the feature lists and the protected-attribute set, the rubric
//! scorer uses the dimension tables, and the model layer uses the tier
//! boundaries and cost matrix.
//!
//! Nothing in this module reads configuration at runtime; the registry is
//! compiled in so that two runs of the same binary can never disagree on a
//! column name.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Identifier aliases and typo patches
// =============================================================================

/// Recognized spellings of the applicant-ID column across cycle exports.
pub const ID_ALIASES: &[&str] = &[
    "Amcas_ID",
    "AMCAS_ID",
    "AMCAS ID",
    "Aamc_ID",
    "AAMC_ID",
    "Amcas Id",
    "Applicant_ID",
    "App_ID",
];

/// Canonical name for the applicant identifier.
pub const AMCAS_ID: &str = "Amcas_ID";

/// Canonical name for the cycle-year column.
pub const APP_YEAR: &str = "App_Year";

/// Canonical name for the training target.
pub const APPLICATION_REVIEW_SCORE: &str = "Application_Review_Score";

/// Optional ordinal auxiliary target (1-4), kept for reviewer artifacts.
pub const SERVICE_RATING: &str = "Service_Rating";

/// Known header typos observed in real cycle exports, patched after
/// canonicalization. The value is the corrected canonical name.
pub const KNOWN_TYPO_PATCHES: &[(&str, &str)] = &[
    ("Disadvantanged_Ind", "Disadvantaged_Ind"),
    ("Fee_Assistence_Ind", "Fee_Assistance_Ind"),
];

// =============================================================================
// Logical input files
// =============================================================================

/// Logical names for the per-cycle input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalFile {
    Applicants,
    Experiences,
    PersonalStatement,
    SecondaryApplications,
    GpaTrend,
    Languages,
    Parents,
    Schools,
    Letters,
}

impl LogicalFile {
    /// All logical files in conventional processing order.
    pub const ALL: &'static [LogicalFile] = &[
        LogicalFile::Applicants,
        LogicalFile::Experiences,
        LogicalFile::PersonalStatement,
        LogicalFile::SecondaryApplications,
        LogicalFile::GpaTrend,
        LogicalFile::Languages,
        LogicalFile::Parents,
        LogicalFile::Schools,
        LogicalFile::Letters,
    ];

    /// Whether a cycle cannot be processed without this file.
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            Self::Applicants | Self::Experiences | Self::PersonalStatement | Self::GpaTrend
        )
    }

    /// Conventional filename stem under `raw/<year>/` (the year is appended
    /// by the locator). The schools file tolerates a year-variant stem.
    pub fn stem(&self) -> &'static str {
        match self {
            Self::Applicants => "applicants",
            Self::Experiences => "experiences",
            Self::PersonalStatement => "personal_statement",
            Self::SecondaryApplications => "secondary_applications",
            Self::GpaTrend => "gpa_trend",
            Self::Languages => "languages",
            Self::Parents => "parents",
            Self::Schools => "schools",
            Self::Letters => "letters",
        }
    }

    /// Alternate stems accepted for year-variant exports.
    pub fn alternate_stems(&self) -> &'static [&'static str] {
        match self {
            Self::Schools => &["schools_year", "school_list"],
            _ => &[],
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Applicants => "applicants",
            Self::Experiences => "experiences",
            Self::PersonalStatement => "personal_statement",
            Self::SecondaryApplications => "secondary_applications",
            Self::GpaTrend => "gpa_trend",
            Self::Languages => "languages",
            Self::Parents => "parents",
            Self::Schools => "schools",
            Self::Letters => "letters",
        }
    }

    /// Plausible row-count band per 5,000-applicant cycle. Counts outside
    /// the band are a quality warning, not an error.
    pub fn plausible_rows(&self) -> (usize, usize) {
        match self {
            Self::Applicants => (1_000, 12_000),
            Self::Experiences => (5_000, 150_000),
            Self::PersonalStatement => (1_000, 12_000),
            Self::SecondaryApplications => (500, 60_000),
            Self::GpaTrend => (1_000, 12_000),
            Self::Languages => (1_000, 40_000),
            Self::Parents => (1_000, 25_000),
            Self::Schools => (1_000, 40_000),
            Self::Letters => (0, 80_000),
        }
    }

    /// Minimum acceptable coverage of applicant IDs by this file.
    /// Coverage below this threshold emits a quality warning.
    pub fn coverage_threshold(&self) -> Option<f64> {
        match self {
            Self::PersonalStatement => Some(0.99),
            Self::SecondaryApplications => Some(0.70),
            Self::Experiences => Some(0.95),
            _ => None,
        }
    }
}

// =============================================================================
// Structured feature lists
// =============================================================================

/// Experience-hour totals by domain, aggregated from the experiences file.
pub const HOUR_FEATURES: &[&str] = &[
    "Exp_Hour_Research",
    "Exp_Hour_Volunteer_Med",
    "Exp_Hour_Volunteer_Non_Med",
    "Exp_Hour_Employ_Med",
    "Exp_Hour_Shadowing",
    "Comm_Service_Total_Hours",
    "HealthCare_Total_Hours",
];

/// Grand total of experience hours; used by the unit-mismatch sentinel
/// and the drift audit, not as a model feature (it is collinear with the
/// per-domain totals).
pub const EXP_HOUR_TOTAL: &str = "Exp_Hour_Total";

/// Numeric structured features: hour totals plus counts and ordinals.
pub const NUMERIC_FEATURES: &[&str] = &[
    "Exp_Hour_Research",
    "Exp_Hour_Volunteer_Med",
    "Exp_Hour_Volunteer_Non_Med",
    "Exp_Hour_Employ_Med",
    "Exp_Hour_Shadowing",
    "Comm_Service_Total_Hours",
    "HealthCare_Total_Hours",
    "Num_Languages",
    "Parent_Education_Ord",
    "Num_Dependents",
];

/// Binary indicator features, normalized to 0/1 by ingestion.
pub const BINARY_FEATURES: &[&str] = &[
    "First_Generation_Ind",
    "Disadvantaged_Ind",
    "SES_Value_Ind",
    "Pell_Grant_Ind",
    "Fee_Assistance_Ind",
    "Paid_Employment_BF_18_Ind",
    "Contribution_To_Family_Ind",
    "Childhood_Med_Underserved_Ind",
    "Prev_Applied_Ind",
    "Military_Service_Ind",
];

/// The five SES flags summed into `Adversity_Count`.
pub const ADVERSITY_FLAGS: &[&str] = &[
    "First_Generation_Ind",
    "Disadvantaged_Ind",
    "SES_Value_Ind",
    "Pell_Grant_Ind",
    "Fee_Assistance_Ind",
];

/// The three resilience flags added on top of adversity for `Grit_Index`.
pub const RESILIENCE_FLAGS: &[&str] = &[
    "Paid_Employment_BF_18_Ind",
    "Contribution_To_Family_Ind",
    "Childhood_Med_Underserved_Ind",
];

/// Experience presence booleans derived from the experiences file. These
/// feed `Experience_Diversity` and the fairness audit; they are not model
/// features themselves.
pub const PRESENCE_FLAGS: &[&str] = &[
    "Has_Research",
    "Has_Direct_Patient_Care",
    "Has_Volunteering",
    "Has_Community_Service",
    "Has_Shadowing",
    "Has_Clinical_Experience",
    "Has_Leadership",
    "Has_Military_Service",
    "Has_Honors",
];

/// Academic features. MCAT is optional; the coverage flag records whether
/// a score was present before imputation.
pub const ACADEMIC_FEATURES: &[&str] =
    &["Total_GPA", "BCPM_GPA", "MCAT_Total", "MCAT_Available_Ind"];

/// Engineered composite features, computed by the feature pipeline as pure
/// functions of the structured columns.
pub const ENGINEERED_FEATURES: &[&str] = &[
    "Community_Engaged_Ratio",
    "Direct_Care_Ratio",
    "Adversity_Count",
    "Grit_Index",
    "Experience_Diversity",
];

/// Columns dropped at ingestion for chronic high missingness across cycles.
pub const HIGH_MISSINGNESS_DROP: &[&str] = &[
    "Academic_Scholarship_Percentage",
    "Finacial_Need_Based_Percentage",
    "Student_Loan_Percentage",
    "Other_Loan_Percentage",
    "Family_Contribution_Percentage",
    "Applied_Financial_Aid",
];

/// Protected attributes: audited for fairness, never model inputs.
/// The feature pipeline removes these unconditionally, even when a
/// configuration drift would otherwise let them through.
pub const PROTECTED_ATTRIBUTES: &[&str] = &["Gender", "Age", "Race", "Citizenship"];

// =============================================================================
// Rubric dimensions
// =============================================================================

/// Rubric format versions. v1 is the legacy 1-5 scale with flat dimension
/// names; v2 is the current 1-4 scale with nested details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RubricVersion {
    V1,
    V2,
}

impl RubricVersion {
    /// Maximum valid score for this version's scale (minimum is always 1).
    pub fn scale_max(&self) -> i64 {
        match self {
            Self::V1 => 5,
            Self::V2 => 4,
        }
    }
}

/// Personal-statement dimensions (7).
pub const PS_DIMENSIONS: &[&str] = &[
    "ps_motivation",
    "ps_reflection",
    "ps_resilience",
    "ps_empathy",
    "ps_writing_quality",
    "ps_insight_into_medicine",
    "ps_growth",
];

/// Secondary-essay dimensions (5).
pub const SECONDARY_DIMENSIONS: &[&str] = &[
    "sec_mission_alignment",
    "sec_diversity_contribution",
    "sec_teamwork",
    "sec_leadership",
    "sec_adaptability",
];

/// Experience-domain quality dimensions (9), one per presence domain.
pub const EXPERIENCE_DIMENSIONS: &[&str] = &[
    "exp_research",
    "exp_direct_patient_care",
    "exp_volunteering",
    "exp_community_service",
    "exp_shadowing",
    "exp_clinical",
    "exp_leadership",
    "exp_military",
    "exp_honors",
];

/// All 21 rubric dimensions in canonical (v2) order.
pub static ALL_DIMENSIONS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    PS_DIMENSIONS
        .iter()
        .chain(SECONDARY_DIMENSIONS.iter())
        .chain(EXPERIENCE_DIMENSIONS.iter())
        .copied()
        .collect()
});

/// v2 → v1 dimension-name map. v1 exports used flat, unprefixed names;
/// the rubric loader rewrites them to the canonical v2 set on read.
pub static V2_TO_V1_DIMENSIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("ps_motivation", "motivation"),
        ("ps_reflection", "reflection"),
        ("ps_resilience", "resilience"),
        ("ps_empathy", "empathy"),
        ("ps_writing_quality", "writing_quality"),
        ("ps_insight_into_medicine", "insight_into_medicine"),
        ("ps_growth", "personal_growth"),
        ("sec_mission_alignment", "mission_alignment"),
        ("sec_diversity_contribution", "diversity_contribution"),
        ("sec_teamwork", "teamwork"),
        ("sec_leadership", "secondary_leadership"),
        ("sec_adaptability", "adaptability"),
        ("exp_research", "research_quality"),
        ("exp_direct_patient_care", "patient_care_quality"),
        ("exp_volunteering", "volunteering_quality"),
        ("exp_community_service", "community_service_quality"),
        ("exp_shadowing", "shadowing_quality"),
        ("exp_clinical", "clinical_quality"),
        ("exp_leadership", "leadership_quality"),
        ("exp_military", "military_quality"),
        ("exp_honors", "honors_quality"),
    ])
});

/// v1 → v2 reverse lookup, derived from [`V2_TO_V1_DIMENSIONS`].
pub static V1_TO_V2_DIMENSIONS: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| V2_TO_V1_DIMENSIONS.iter().map(|(v2, v1)| (*v1, *v2)).collect());

/// Rescale a v2 score (1-4) onto the v1-compatible 1-5 scale.
///
/// This is the documented migration proxy, not a statement that the scales
/// are equivalent; models trained on v2-native scores skip it.
pub fn rescale_v2_to_v1(score: f64) -> f64 {
    1.0 + (score - 1.0) * 4.0 / 3.0
}

// =============================================================================
// Experience-type maps
// =============================================================================

/// Map from AMCAS experience-type labels to the hour-bucket column each
/// contributes to. Types absent from this map are logged and ignored.
pub static EXPERIENCE_HOUR_BUCKETS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("Research/Lab", "Exp_Hour_Research"),
        (
            "Community Service/Volunteer - Medical/Clinical",
            "Exp_Hour_Volunteer_Med",
        ),
        (
            "Community Service/Volunteer - Not Medical/Clinical",
            "Exp_Hour_Volunteer_Non_Med",
        ),
        ("Paid Employment - Medical/Clinical", "Exp_Hour_Employ_Med"),
        (
            "Physician Shadowing/Clinical Observation",
            "Exp_Hour_Shadowing",
        ),
        ("Community Service", "Comm_Service_Total_Hours"),
        ("Other Healthcare Experience", "HealthCare_Total_Hours"),
    ])
});

/// Map from AMCAS experience-type labels to the presence flag each raises.
pub static EXPERIENCE_PRESENCE_FLAGS: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| {
        HashMap::from([
            ("Research/Lab", "Has_Research"),
            ("Paid Employment - Medical/Clinical", "Has_Direct_Patient_Care"),
            (
                "Community Service/Volunteer - Medical/Clinical",
                "Has_Volunteering",
            ),
            (
                "Community Service/Volunteer - Not Medical/Clinical",
                "Has_Volunteering",
            ),
            ("Community Service", "Has_Community_Service"),
            ("Physician Shadowing/Clinical Observation", "Has_Shadowing"),
            ("Other Healthcare Experience", "Has_Clinical_Experience"),
            ("Leadership - Not Listed Elsewhere", "Has_Leadership"),
            ("Military Service", "Has_Military_Service"),
            ("Honors/Awards/Recognitions", "Has_Honors"),
        ])
    });

// =============================================================================
// Ordinal maps
// =============================================================================

/// Fallback ordinal for parent-education values outside the map
/// ("Some College"); applied with a quality warning.
pub const PARENT_EDUCATION_DEFAULT_ORD: i64 = 2;

/// Parent-education ordinal map; the parents aggregation takes the max
/// across both parents.
pub static PARENT_EDUCATION_ORDINALS: Lazy<HashMap<&'static str, i64>> = Lazy::new(|| {
    HashMap::from([
        ("Less Than High School", 0),
        ("High School Diploma", 1),
        ("GED", 1),
        ("Some College", 2),
        ("Associate Degree", 3),
        ("Bachelor's Degree", 4),
        ("Master's Degree", 5),
        ("Doctorate", 6),
        ("Professional Degree", 6),
    ])
});

/// GPA-trend category → ordinal. Unknown categories default to stable
/// with a quality warning.
pub static GPA_TREND_ORDINALS: Lazy<HashMap<&'static str, i64>> = Lazy::new(|| {
    HashMap::from([("Downward", 0), ("Stable", 1), ("Upward", 2)])
});

/// Fallback GPA-trend ordinal ("Stable").
pub const GPA_TREND_DEFAULT_ORD: i64 = 1;

// =============================================================================
// Tiers and costs
// =============================================================================

/// Tier boundaries on the 0-25 predicted-score axis. Intervals are
/// left-closed: a score equal to a boundary lands in the higher tier.
pub const TIER_BOUNDARIES: &[f64] = &[6.25, 12.5, 18.75];

/// Human-readable tier labels, indexed by tier number.
pub const TIER_LABELS: &[&str] = &["Low", "Possible", "Recommended", "Strong"];

/// Assign a tier (0-3) to a predicted score.
pub fn assign_tier(score: f64) -> u8 {
    let mut tier = 0u8;
    for boundary in TIER_BOUNDARIES {
        if score >= *boundary {
            tier += 1;
        }
    }
    tier
}

/// Asymmetric gate cost matrix, indexed `[actual][predicted]` over
/// {not_low, low}. A missed low-scorer costs 10; rejecting a good
/// candidate costs 1; a correct rejection earns 1.
pub const GATE_COST_MATRIX: [[f64; 2]; 2] = [[0.0, -1.0], [-10.0, 1.0]];

/// Default training-target threshold: `is_low = score <= 15`.
pub const DEFAULT_LOW_SCORE_THRESHOLD: i64 = 15;

// =============================================================================
// Header canonicalization
// =============================================================================

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static PARENTHESIZED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)").expect("static regex"));

/// Tokens kept fully uppercase during title-casing.
const UPPER_TOKENS: &[&str] = &["GPA", "BCPM", "MCAT", "SES", "ID", "BF", "GED"];

/// Canonicalize a raw column header.
///
/// Applies, in order: parenthetical removal, whitespace collapse to `_`,
/// per-token title-casing with the acronym exceptions above, then alias
/// resolution for the applicant-ID column and known typo patches.
pub fn canonicalize(raw: &str) -> String {
    let stripped = PARENTHESIZED.replace_all(raw, "");
    let collapsed = WHITESPACE_RUN.replace_all(stripped.trim(), "_");

    let titled = collapsed
        .split('_')
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            let upper = tok.to_uppercase();
            if UPPER_TOKENS.contains(&upper.as_str()) {
                upper
            } else {
                let mut chars = tok.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                    }
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join("_");

    // ID alias resolution runs case-insensitively against the canonical form.
    for alias in ID_ALIASES {
        if titled.eq_ignore_ascii_case(alias) {
            return AMCAS_ID.to_string();
        }
    }

    for (typo, fixed) in KNOWN_TYPO_PATCHES {
        if titled == *typo {
            return (*fixed).to_string();
        }
    }

    titled
}

/// Whether a canonical column name is a protected attribute.
pub fn is_protected(column: &str) -> bool {
    PROTECTED_ATTRIBUTES
        .iter()
        .any(|p| p.eq_ignore_ascii_case(column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_canonicalize_basic() {
        assert_eq!(canonicalize("total gpa"), "Total_GPA");
        assert_eq!(canonicalize("  MCAT   total "), "MCAT_Total");
        assert_eq!(canonicalize("Exp_Hour_Research"), "Exp_Hour_Research");
    }

    #[test]
    fn test_canonicalize_drops_parentheses() {
        assert_eq!(canonicalize("Num Dependents (self-reported)"), "Num_Dependents");
    }

    #[test]
    fn test_canonicalize_resolves_id_aliases() {
        for alias in ["AMCAS ID", "amcas_id", "Aamc_ID", "AMCAS_ID"] {
            assert_eq!(canonicalize(alias), AMCAS_ID, "alias {alias}");
        }
    }

    #[test]
    fn test_canonicalize_patches_known_typo() {
        assert_eq!(canonicalize("Disadvantanged_Ind"), "Disadvantaged_Ind");
    }

    #[test]
    fn test_dimension_count_is_21() {
        assert_eq!(PS_DIMENSIONS.len(), 7);
        assert_eq!(SECONDARY_DIMENSIONS.len(), 5);
        assert_eq!(EXPERIENCE_DIMENSIONS.len(), 9);
        assert_eq!(ALL_DIMENSIONS.len(), 21);
    }

    #[test]
    fn test_dimension_maps_are_bidirectional() {
        assert_eq!(V2_TO_V1_DIMENSIONS.len(), 21);
        assert_eq!(V1_TO_V2_DIMENSIONS.len(), 21);
        for dim in ALL_DIMENSIONS.iter() {
            let v1 = V2_TO_V1_DIMENSIONS[dim];
            assert_eq!(V1_TO_V2_DIMENSIONS[v1], *dim);
        }
    }

    #[test]
    fn test_rescale_v2_to_v1_endpoints() {
        assert_eq!(rescale_v2_to_v1(1.0), 1.0);
        assert_eq!(rescale_v2_to_v1(4.0), 5.0);
        assert!((rescale_v2_to_v1(2.0) - 7.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_tier_boundaries_left_closed() {
        assert_eq!(assign_tier(0.0), 0);
        assert_eq!(assign_tier(6.24), 0);
        assert_eq!(assign_tier(6.25), 1);
        assert_eq!(assign_tier(12.5), 2);
        assert_eq!(assign_tier(18.75), 3);
        assert_eq!(assign_tier(25.0), 3);
    }

    #[test]
    fn test_tiers_monotone_in_score() {
        let mut prev = 0u8;
        let mut score = 0.0;
        while score <= 25.0 {
            let tier = assign_tier(score);
            assert!(tier >= prev, "tier dropped at score {score}");
            prev = tier;
            score += 0.05;
        }
    }

    #[test]
    fn test_protected_attributes_never_in_feature_lists() {
        let all_features: Vec<&str> = NUMERIC_FEATURES
            .iter()
            .chain(BINARY_FEATURES.iter())
            .chain(ACADEMIC_FEATURES.iter())
            .chain(ENGINEERED_FEATURES.iter())
            .copied()
            .collect();
        for protected in PROTECTED_ATTRIBUTES {
            assert!(
                !all_features.iter().any(|f| f.eq_ignore_ascii_case(protected)),
                "protected attribute {protected} leaked into feature lists"
            );
        }
    }

    #[test]
    fn test_scale_max_per_version() {
        assert_eq!(RubricVersion::V1.scale_max(), 5);
        assert_eq!(RubricVersion::V2.scale_max(), 4);
    }

    #[test]
    fn test_experience_maps_cover_presence_flags() {
        for flag in EXPERIENCE_PRESENCE_FLAGS.values() {
            assert!(PRESENCE_FLAGS.contains(flag), "unknown flag {flag}");
        }
        for bucket in EXPERIENCE_HOUR_BUCKETS.values() {
            assert!(HOUR_FEATURES.contains(bucket), "unknown bucket {bucket}");
        }
    }
}
