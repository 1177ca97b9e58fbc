//! JSON response parsing and validation for rubric model calls.
//!
//! A response is valid when it is a JSON object with an integer `score`
//! and a non-empty `evidence` string. Scores outside the scale are not a
//! validation failure: they are clipped into range with a quality warning,
//! because a clipped score still carries signal while a retry burns the
//! shared call budget.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reporting::{QualityWarning, RunReport, WarningKind};
use crate::taxonomy::RubricVersion;

/// A validated single-dimension result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    /// Integer score within `[1, scale_max]`, or null when the input text
    /// was empty or every attempt failed.
    pub score: Option<i64>,
    /// Supporting quote or paraphrase from the applicant text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    /// The model's stated reasoning steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_steps: Option<String>,
}

impl DimensionScore {
    /// Explicit null for dimensions with no backing text.
    pub fn null() -> Self {
        Self {
            score: None,
            evidence: None,
            reasoning_steps: None,
        }
    }
}

/// Why a response failed validation (all variants trigger a retry).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("response is not valid JSON: {0}")]
    Parse(String),

    #[error("response has no 'score' field")]
    MissingScore,

    #[error("'score' is not an integer")]
    NonIntegerScore,

    #[error("'evidence' is empty or missing")]
    EmptyEvidence,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    score: Option<serde_json::Value>,
    evidence: Option<String>,
    reasoning_steps: Option<String>,
}

/// Extract the JSON object from a completion that may carry code fences
/// or stray prose around it.
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end > start { Some(&raw[start..=end]) } else { None }
}

/// Parse and validate one model response for one dimension.
///
/// Out-of-range scores are clipped to `[1, scale_max]` and recorded on the
/// run report with the dimension and applicant involved.
pub fn parse_response(
    raw: &str,
    version: RubricVersion,
    dimension: &str,
    amcas_id: i64,
    report: &RunReport,
) -> Result<DimensionScore, ResponseError> {
    let json = extract_json(raw).ok_or_else(|| ResponseError::Parse("no JSON object".into()))?;
    let parsed: RawResponse =
        serde_json::from_str(json).map_err(|e| ResponseError::Parse(e.to_string()))?;

    let score_value = parsed.score.ok_or(ResponseError::MissingScore)?;
    let score = score_value
        .as_i64()
        .or_else(|| {
            // Tolerate "3" and 3.0; reject 3.5.
            score_value
                .as_str()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .or_else(|| {
                    score_value
                        .as_f64()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| f as i64)
                })
        })
        .ok_or(ResponseError::NonIntegerScore)?;

    let evidence = parsed
        .evidence
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .ok_or(ResponseError::EmptyEvidence)?;

    let max = version.scale_max();
    let clipped = score.clamp(1, max);
    if clipped != score {
        report.record(
            QualityWarning::new(
                WarningKind::ScoreClipped,
                format!("'{dimension}' scored {score}, clipped to {clipped}"),
            )
            .with_column(dimension)
            .with_amcas_id(amcas_id),
        );
    }

    Ok(DimensionScore {
        score: Some(clipped),
        evidence: Some(evidence),
        reasoning_steps: parsed.reasoning_steps,
    })
}
