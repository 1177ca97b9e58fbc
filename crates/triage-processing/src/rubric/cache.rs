//! Resume-safe JSON cache for rubric scores.
//!
//! One file, keyed by applicant ID, appended to across invocations. Writes
//! go through a tempfile-and-rename so readers never observe a torn file,
//! and an advisory lock file keeps two writer processes out of each other's
//! way. Readers take no lock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::schema::DimensionScore;
use crate::error::{ProcessingError, Result};
use crate::taxonomy::{ALL_DIMENSIONS, RubricVersion};

/// Per-dimension evidence and reasoning, stored next to the score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_steps: Option<String>,
}

/// One applicant's assembled rubric record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub format_version: RubricVersion,
    pub prompt_hash: String,
    pub model_version: String,
    /// Dimension → score; explicit null means the dimension had no backing
    /// text or exhausted its retries.
    pub scores: BTreeMap<String, Option<i64>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, ScoreDetail>,
}

impl ScoreRecord {
    pub fn new(prompt_hash: String, model_version: String) -> Self {
        Self {
            format_version: RubricVersion::V2,
            prompt_hash,
            model_version,
            scores: BTreeMap::new(),
            details: BTreeMap::new(),
        }
    }

    /// Record one dimension's outcome.
    pub fn insert(&mut self, dimension: &str, result: DimensionScore) {
        self.scores.insert(dimension.to_string(), result.score);
        if result.evidence.is_some() || result.reasoning_steps.is_some() {
            self.details.insert(
                dimension.to_string(),
                ScoreDetail {
                    evidence: result.evidence,
                    reasoning_steps: result.reasoning_steps,
                },
            );
        }
    }

    /// Fully present: all 21 dimensions with non-null scores. Complete
    /// records are skipped entirely under `--resume`.
    pub fn is_complete(&self) -> bool {
        ALL_DIMENSIONS
            .iter()
            .all(|dim| matches!(self.scores.get(*dim), Some(Some(_))))
    }

    /// Dimensions still needing a score: absent keys and explicit nulls.
    pub fn missing_dimensions(&self) -> Vec<&'static str> {
        ALL_DIMENSIONS
            .iter()
            .filter(|dim| !matches!(self.scores.get(**dim), Some(Some(_))))
            .copied()
            .collect()
    }
}

/// Advisory writer lock; the file exists for exactly the lock's lifetime.
struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    fn acquire(cache_path: &Path) -> Result<Self> {
        let path = cache_path.with_extension("lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(ProcessingError::CacheLocked {
                    path: cache_path.to_path_buf(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// The rubric cache file.
#[derive(Debug, Clone)]
pub struct RubricCache {
    path: PathBuf,
}

impl RubricCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records. A missing file is an empty cache, not an error.
    pub fn load(&self) -> Result<BTreeMap<i64, ScoreRecord>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "cache absent, starting empty");
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        let by_key: BTreeMap<String, ScoreRecord> = serde_json::from_str(&raw)?;

        let mut records = BTreeMap::new();
        for (key, record) in by_key {
            let id: i64 = key.parse().map_err(|_| ProcessingError::Schema {
                file: self.path.display().to_string(),
                detail: format!("cache key '{key}' is not an applicant ID"),
            })?;
            records.insert(id, record);
        }
        Ok(records)
    }

    /// Replace the cache contents atomically: write a sibling tempfile,
    /// then rename over the target while holding the writer lock.
    pub fn write_all(&self, records: &BTreeMap<i64, ScoreRecord>) -> Result<()> {
        let _lock = WriterLock::acquire(&self.path)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let by_key: BTreeMap<String, &ScoreRecord> = records
            .iter()
            .map(|(id, record)| (id.to_string(), record))
            .collect();

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&by_key)?)?;
        fs::rename(&tmp, &self.path)?;

        info!(path = %self.path.display(), records = records.len(), "cache written");
        Ok(())
    }

    /// Merge new records into the existing cache (read-modify-write under
    /// a single lock acquisition via [`write_all`](Self::write_all)).
    pub fn merge(&self, new_records: BTreeMap<i64, ScoreRecord>) -> Result<()> {
        let mut all = self.load()?;
        all.extend(new_records);
        self.write_all(&all)
    }
}
