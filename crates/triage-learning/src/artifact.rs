//! The versioned model artifact bundle.
//!
//! One file carries everything scoring needs — calibrated gate, ranker,
//! tuned threshold with its bootstrap CI, the fitted feature ordering,
//! per-feature training marginals, rubric format version, and the
//! training metadata. Loading any subset without the others is impossible
//! by construction. A `.sha256` sidecar carries the integrity tag and is
//! verified on every load; artifacts are immutable after save and
//! superseded, never mutated, by retrains.

use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{LearningError, Result};
use crate::gate::SafetyGate;
use crate::ranker::QualityRanker;
use crate::triage::TwoStageModel;
use triage_processing::features::{FeatureMarginal, TrainingMetadata};
use triage_processing::taxonomy::RubricVersion;

/// On-disk format version; bumped on breaking changes to the bundle shape.
const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// The bundle as serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub gate: SafetyGate,
    pub ranker: QualityRanker,
    pub gate_threshold: f64,
    pub threshold_bootstrap_ci: (f64, f64),
    pub feature_columns: Vec<String>,
    pub training_marginals: BTreeMap<String, FeatureMarginal>,
    pub rubric_version: RubricVersion,
    pub metadata: TrainingMetadata,
    /// Save timestamp, part of the version identity.
    pub saved_at: String,
}

impl ModelArtifact {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gate: SafetyGate,
        ranker: QualityRanker,
        feature_columns: Vec<String>,
        training_marginals: BTreeMap<String, FeatureMarginal>,
        rubric_version: RubricVersion,
        metadata: TrainingMetadata,
    ) -> Self {
        let gate_threshold = gate.threshold();
        let threshold_bootstrap_ci = gate.threshold_ci();
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            gate,
            ranker,
            gate_threshold,
            threshold_bootstrap_ci,
            feature_columns,
            training_marginals,
            rubric_version,
            metadata,
            saved_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Conventional versioned filename: training date + train-year set.
    pub fn versioned_filename(&self) -> String {
        let years = self
            .metadata
            .train_years
            .iter()
            .map(|y| y.to_string())
            .collect::<Vec<_>>()
            .join("-");
        format!("model_{}_{}.json", self.metadata.trained_date, years)
    }

    /// Write the bundle and its `.sha256` sidecar atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(self)?;
        let digest = hex::encode(Sha256::digest(payload.as_bytes()));

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &payload)?;
        fs::rename(&tmp, path)?;
        fs::write(sidecar_path(path), format!("{digest}\n"))?;

        info!(path = %path.display(), digest = %&digest[..12], "model artifact saved");
        Ok(())
    }

    /// Load and verify a bundle. A missing sidecar, a digest mismatch, or
    /// an incompatible format version are all fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let sidecar = sidecar_path(path);
        if !sidecar.exists() {
            return Err(LearningError::ArtifactSidecarMissing(
                path.display().to_string(),
            ));
        }
        let stored = fs::read_to_string(&sidecar)?.trim().to_string();
        let payload = fs::read_to_string(path)?;
        let computed = hex::encode(Sha256::digest(payload.as_bytes()));
        if stored != computed {
            return Err(LearningError::ArtifactIntegrity { stored, computed });
        }

        let artifact: ModelArtifact = serde_json::from_str(&payload)?;
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(LearningError::ArtifactVersionMismatch {
                expected: ARTIFACT_FORMAT_VERSION,
                found: artifact.format_version,
            });
        }
        Ok(artifact)
    }

    /// The combined model, ready to triage.
    pub fn model(&self) -> TwoStageModel {
        TwoStageModel::new(self.gate.clone(), self.ranker.clone())
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".sha256");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateParams;
    use crate::ranker::RankerParams;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small_artifact() -> ModelArtifact {
        let mut rng = StdRng::seed_from_u64(41);
        let mut rows = Vec::new();
        let mut scores = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..900 {
            let q: f64 = rng.gen_range(0.0..1.0);
            let score = (q * 25.0 + rng.gen_range(-1.0..1.0)).clamp(0.0, 25.0);
            rows.push(vec![q, rng.gen_range(0.0..1.0)]);
            labels.push(score <= 15.0);
            scores.push(score);
        }
        let (gate, _) = SafetyGate::train(
            &rows,
            &labels,
            &GateParams {
                bootstrap_resamples: 10,
                n_estimators: 30,
                ..GateParams::default()
            },
        )
        .unwrap();
        let (ranker, _) = QualityRanker::train(
            &rows,
            &scores,
            &RankerParams {
                alphas: vec![0.25],
                n_estimators: 20,
                ..RankerParams::default()
            },
        )
        .unwrap();

        ModelArtifact::new(
            gate,
            ranker,
            vec!["quality".into(), "noise".into()],
            BTreeMap::from([(
                "quality".to_string(),
                FeatureMarginal::from_values(&[0.1, 0.5, 0.9]),
            )]),
            RubricVersion::V2,
            TrainingMetadata {
                train_years: vec![2023, 2024],
                test_year: Some(2025),
                n_train: 900,
                trained_date: "2025-07-01".into(),
                threshold: 15,
                recall_target: 0.95,
            },
        )
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let artifact = small_artifact();
        artifact.save(&path).unwrap();

        assert!(dir.path().join("model.json.sha256").exists());

        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded.gate_threshold, artifact.gate_threshold);
        assert_eq!(loaded.feature_columns, artifact.feature_columns);
        assert_eq!(loaded.metadata.train_years, vec![2023, 2024]);

        // The loaded model predicts identically.
        let rows = vec![vec![0.8, 0.2], vec![0.1, 0.9]];
        assert_eq!(
            artifact.model().gate.predict_p_low(&rows),
            loaded.model().gate.predict_p_low(&rows)
        );
    }

    #[test]
    fn test_tampered_bundle_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let artifact = small_artifact();
        artifact.save(&path).unwrap();

        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("\"gate_threshold\"", "\"gate_threshol_\"");
        fs::write(&path, tampered).unwrap();

        let err = ModelArtifact::load(&path).unwrap_err();
        assert!(matches!(err, LearningError::ArtifactIntegrity { .. }));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_missing_sidecar_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        small_artifact().save(&path).unwrap();
        fs::remove_file(dir.path().join("model.json.sha256")).unwrap();

        let err = ModelArtifact::load(&path).unwrap_err();
        assert!(matches!(err, LearningError::ArtifactSidecarMissing(_)));
    }

    #[test]
    fn test_versioned_filename() {
        let artifact = small_artifact();
        assert_eq!(
            artifact.versioned_filename(),
            "model_2025-07-01_2023-2024.json"
        );
    }
}
