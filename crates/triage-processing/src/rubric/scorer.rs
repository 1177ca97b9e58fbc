//! Batch rubric scoring with cooperative concurrency.
//!
//! One applicant produces up to 21 atomic model calls. Applicants are
//! scheduled through a semaphore whose capacity is the configured
//! concurrency ceiling (1 for a sequential smoke test, 3-5 in
//! production); dimensions within an applicant run in sequence but carry
//! no ordering guarantee — the assembled record is dimension-keyed.
//!
//! A 429 from the adapter backs off the whole batch: the shared rate gate
//! holds new calls until the backoff deadline passes, so concurrent
//! failures cannot thrash the provisioned-throughput budget.
//!
//! Cancellation is all-or-nothing per applicant: a cancelled task's
//! partial record is never merged into the cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::cache::{RubricCache, ScoreRecord};
use super::dimensions::{self, Dimension, DimensionGroup};
use super::provider::{CompletionRequest, LlmProvider};
use super::retry::{RetryPolicy, Sleeper, TokioSleeper};
use super::schema::{self, DimensionScore};
use crate::config::RunConfig;
use crate::error::{ProcessingError, Result, TransportError};
use crate::ingest::{CancellationToken, UnifiedDataset};
use crate::reporting::{QualityWarning, RunReport, WarningKind};
use crate::taxonomy::{AMCAS_ID, ALL_DIMENSIONS, RubricVersion};

/// Completion budget per call; the response schema fits comfortably.
const MAX_COMPLETION_TOKENS: u32 = 200;

/// Free-text inputs for a scoring batch, keyed by applicant.
#[derive(Debug, Default, Clone)]
pub struct ScoringInputs {
    pub personal_statements: HashMap<i64, String>,
    pub secondary_texts: HashMap<i64, String>,
    pub experience_texts: HashMap<i64, HashMap<String, String>>,
}

impl From<&UnifiedDataset> for ScoringInputs {
    fn from(dataset: &UnifiedDataset) -> Self {
        Self {
            personal_statements: dataset.personal_statements.clone(),
            secondary_texts: dataset.secondary_texts.clone(),
            experience_texts: dataset.experience_texts.clone(),
        }
    }
}

/// Texts for one applicant, owned so tasks can move off the batch maps.
#[derive(Debug, Clone, Default)]
struct ApplicantTexts {
    personal_statement: Option<String>,
    secondary: Option<String>,
    experience: HashMap<String, String>,
}

impl ApplicantTexts {
    fn for_dimension(&self, dimension: &Dimension) -> Option<&str> {
        let text = match dimension.group {
            DimensionGroup::PersonalStatement => self.personal_statement.as_deref(),
            DimensionGroup::Secondary => self.secondary.as_deref(),
            DimensionGroup::Experience => {
                let domain = dimension.experience_domain()?;
                self.experience.get(domain).map(String::as_str)
            }
        };
        text.map(str::trim).filter(|t| !t.is_empty())
    }
}

/// Shared backoff gate for 429 responses.
///
/// When any task reports a rate limit, the deadline moves forward and
/// every subsequent call waits it out before touching the semaphore's
/// budget again.
struct RateGate {
    until: Mutex<Option<Instant>>,
}

impl RateGate {
    fn new() -> Self {
        Self {
            until: Mutex::new(None),
        }
    }

    async fn wait(&self, sleeper: &dyn Sleeper) {
        let pending = {
            let until = self.until.lock().await;
            until.and_then(|deadline| deadline.checked_duration_since(Instant::now()))
        };
        if let Some(wait) = pending {
            debug!(wait_ms = wait.as_millis() as u64, "holding for rate-limit backoff");
            sleeper.sleep(wait).await;
        }
    }

    async fn hold_for(&self, backoff: Duration) {
        let mut until = self.until.lock().await;
        let deadline = Instant::now() + backoff;
        *until = Some(until.map_or(deadline, |existing| existing.max(deadline)));
    }
}

/// The batch rubric scorer. Build with [`RubricScorer::builder`].
pub struct RubricScorer {
    provider: Arc<dyn LlmProvider>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    cache: RubricCache,
    version: RubricVersion,
    concurrency: usize,
    resume: bool,
    seed: u64,
    report: RunReport,
    token: CancellationToken,
}

/// Builder for [`RubricScorer`].
pub struct RubricScorerBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    policy: Option<RetryPolicy>,
    cache: Option<RubricCache>,
    version: RubricVersion,
    concurrency: Option<usize>,
    resume: bool,
    seed: Option<u64>,
    report: Option<RunReport>,
    token: Option<CancellationToken>,
}

impl RubricScorer {
    pub fn builder() -> RubricScorerBuilder {
        RubricScorerBuilder {
            provider: None,
            sleeper: None,
            policy: None,
            cache: None,
            version: RubricVersion::V2,
            concurrency: None,
            resume: false,
            seed: None,
            report: None,
            token: None,
        }
    }

    /// Score a batch of applicants and return one row per applicant with
    /// all 21 dimension columns (nullable).
    ///
    /// Under `resume`, applicants whose cache record is complete are
    /// skipped without any outbound call; partial records re-score only
    /// their missing dimensions.
    pub async fn score_batch(&self, ids: &[i64], inputs: &ScoringInputs) -> Result<DataFrame> {
        let mut cached = self.cache.load()?;
        let prompt_hash = dimensions::prompt_set_hash(
            self.provider.model_version(),
            self.version,
            self.seed,
        );

        let mut to_score: Vec<(i64, Vec<&'static str>, ApplicantTexts)> = Vec::new();
        for id in ids {
            let existing = cached.get(id);
            if self.resume {
                if let Some(record) = existing {
                    if record.is_complete() {
                        debug!(amcas_id = id, "complete in cache, skipping");
                        continue;
                    }
                }
            }
            let dims = match (self.resume, existing) {
                (true, Some(record)) => record.missing_dimensions(),
                _ => ALL_DIMENSIONS.to_vec(),
            };
            let texts = ApplicantTexts {
                personal_statement: inputs.personal_statements.get(id).cloned(),
                secondary: inputs.secondary_texts.get(id).cloned(),
                experience: inputs.experience_texts.get(id).cloned().unwrap_or_default(),
            };
            to_score.push((*id, dims, texts));
        }

        info!(
            requested = ids.len(),
            scoring = to_score.len(),
            skipped = ids.len() - to_score.len(),
            concurrency = self.concurrency,
            "scoring batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let gate = Arc::new(RateGate::new());
        let mut tasks: JoinSet<Result<(i64, ScoreRecord)>> = JoinSet::new();

        for (id, dims, texts) in to_score {
            let semaphore = Arc::clone(&semaphore);
            let gate = Arc::clone(&gate);
            let provider = Arc::clone(&self.provider);
            let sleeper = Arc::clone(&self.sleeper);
            let policy = self.policy.clone();
            let report = self.report.clone();
            let token = self.token.clone();
            let version = self.version;
            let seed = self.seed;
            let prompt_hash = prompt_hash.clone();
            let model_version = self.provider.model_version().to_string();
            let base_record = cached.get(&id).cloned();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| ProcessingError::Internal(e.to_string()))?;

                let mut record = base_record
                    .unwrap_or_else(|| ScoreRecord::new(prompt_hash.clone(), model_version));
                record.prompt_hash = prompt_hash;

                for dim_name in dims {
                    token.check()?;
                    let dimension = dimensions::dimension_by_name(dim_name)
                        .ok_or_else(|| ProcessingError::Internal(format!("unknown dimension {dim_name}")))?;

                    let result = match texts.for_dimension(dimension) {
                        // Zero-text inputs yield an explicit null, not a zero.
                        None => DimensionScore::null(),
                        Some(text) => {
                            score_dimension(
                                provider.as_ref(),
                                sleeper.as_ref(),
                                &gate,
                                &policy,
                                dimension,
                                text,
                                version,
                                seed,
                                id,
                                &report,
                                &token,
                            )
                            .await?
                        }
                    };
                    record.insert(dim_name, result);
                }

                Ok((id, record))
            });
        }

        let mut scored: BTreeMap<i64, ScoreRecord> = BTreeMap::new();
        let mut cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(|e| ProcessingError::Internal(e.to_string()))? {
                Ok((id, record)) => {
                    scored.insert(id, record);
                }
                Err(e) if e.is_cancelled() => cancelled = true,
                Err(e) => return Err(e),
            }
        }

        // Completed applicants persist even on a cancelled batch; partial
        // ones never reach the cache.
        if !scored.is_empty() {
            cached.extend(scored);
            self.cache.write_all(&cached)?;
        }
        if cancelled {
            return Err(ProcessingError::Cancelled);
        }

        self.assemble_frame(ids, &cached)
    }

    /// Score one free-standing text on a fixed dimension set. Used by the
    /// reproducibility canary; bypasses the cache.
    pub async fn score_text(
        &self,
        text: &str,
        dims: &[&'static str],
    ) -> Result<BTreeMap<String, Option<i64>>> {
        let gate = RateGate::new();
        let mut out = BTreeMap::new();
        for dim_name in dims {
            let dimension = dimensions::dimension_by_name(dim_name)
                .ok_or_else(|| ProcessingError::Internal(format!("unknown dimension {dim_name}")))?;
            let result = score_dimension(
                self.provider.as_ref(),
                self.sleeper.as_ref(),
                &gate,
                &self.policy,
                dimension,
                text,
                self.version,
                self.seed,
                0,
                &self.report,
                &self.token,
            )
            .await?;
            out.insert((*dim_name).to_string(), result.score);
        }
        Ok(out)
    }

    /// The pinned prompt-set hash for this scorer's configuration.
    pub fn prompt_hash(&self) -> String {
        dimensions::prompt_set_hash(self.provider.model_version(), self.version, self.seed)
    }

    fn assemble_frame(
        &self,
        ids: &[i64],
        records: &BTreeMap<i64, ScoreRecord>,
    ) -> Result<DataFrame> {
        let present: Vec<i64> = ids
            .iter()
            .filter(|id| records.contains_key(id))
            .copied()
            .collect();

        let mut columns: Vec<Column> = vec![Column::new(AMCAS_ID.into(), &present)];
        for dim in ALL_DIMENSIONS.iter() {
            let values: Vec<Option<i64>> = present
                .iter()
                .map(|id| records[id].scores.get(*dim).copied().flatten())
                .collect();
            columns.push(Column::new((*dim).into(), values));
        }
        Ok(DataFrame::new(columns)?)
    }
}

/// Score one dimension with retries: transport failures back off and
/// retry per the policy; schema failures retry on the same schedule; both
/// degrade to an explicit null once attempts are exhausted.
#[allow(clippy::too_many_arguments)]
async fn score_dimension(
    provider: &dyn LlmProvider,
    sleeper: &dyn Sleeper,
    gate: &RateGate,
    policy: &RetryPolicy,
    dimension: &Dimension,
    text: &str,
    version: RubricVersion,
    seed: u64,
    amcas_id: i64,
    report: &RunReport,
    token: &CancellationToken,
) -> Result<DimensionScore> {
    let request = CompletionRequest {
        system: dimensions::system_prompt(dimension, version),
        user: dimensions::user_prompt(text),
        seed,
        max_tokens: MAX_COMPLETION_TOKENS,
    };
    // Jitter is deterministic per (applicant, dimension) so reruns pace
    // identically.
    let mut rng = StdRng::seed_from_u64(seed ^ amcas_id as u64 ^ dimension.name.len() as u64);

    let mut last_failure = String::new();
    for attempt in 1..=policy.max_attempts {
        token.check()?;
        gate.wait(sleeper).await;

        match provider.complete(&request).await {
            Ok(raw) => {
                match schema::parse_response(&raw, version, dimension.name, amcas_id, report) {
                    Ok(score) => return Ok(score),
                    Err(e) => {
                        last_failure = e.to_string();
                        warn!(
                            amcas_id,
                            dimension = dimension.name,
                            attempt,
                            "invalid response: {e}"
                        );
                    }
                }
            }
            Err(e) => {
                last_failure = e.to_string();
                if e.is_rate_limit() {
                    gate.hold_for(policy.backoff_delay(attempt, &mut rng)).await;
                }
                if !policy.should_retry(&e, attempt) {
                    if !e.is_retryable() {
                        // Non-retryable rejection: give up immediately.
                        record_null(report, dimension.name, amcas_id, &last_failure);
                        return Ok(DimensionScore::null());
                    }
                    break;
                }
            }
        }

        if attempt < policy.max_attempts {
            sleeper.sleep(policy.backoff_delay(attempt, &mut rng)).await;
        }
    }

    // Imputed downstream; never silently replaced with a midpoint here.
    record_null(report, dimension.name, amcas_id, &last_failure);
    Ok(DimensionScore::null())
}

fn record_null(report: &RunReport, dimension: &str, amcas_id: i64, reason: &str) {
    report.record(
        QualityWarning::new(
            WarningKind::NullScoreRecorded,
            format!("'{dimension}' exhausted attempts ({reason}); null recorded"),
        )
        .with_column(dimension)
        .with_amcas_id(amcas_id),
    );
}

impl RubricScorerBuilder {
    /// Set the LLM provider (required).
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Override the sleeper (tests inject a recording sleeper).
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Override the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the cache path (required).
    pub fn cache(mut self, cache: RubricCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the rubric version (default v2).
    pub fn version(mut self, version: RubricVersion) -> Self {
        self.version = version;
        self
    }

    /// Enable resume mode.
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Attach the shared run report.
    pub fn report(mut self, report: RunReport) -> Self {
        self.report = Some(report);
        self
    }

    /// Attach a cancellation token.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Pull concurrency, attempts, backoff, and seed from the run config.
    pub fn run_config(mut self, config: &RunConfig) -> Self {
        self.concurrency = Some(config.scorer_concurrency);
        self.seed = Some(config.seed);
        self.policy = Some(RetryPolicy::new(
            config.max_llm_attempts,
            Duration::from_millis(config.llm_backoff_base_ms),
        ));
        self
    }

    pub fn build(self) -> Result<RubricScorer> {
        let provider = self
            .provider
            .ok_or_else(|| ProcessingError::Configuration("scorer needs a provider".into()))?;
        let cache = self
            .cache
            .ok_or_else(|| ProcessingError::Configuration("scorer needs a cache path".into()))?;

        Ok(RubricScorer {
            provider,
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper)),
            policy: self.policy.unwrap_or_default(),
            cache,
            version: self.version,
            concurrency: self.concurrency.unwrap_or(3).clamp(1, 5),
            resume: self.resume,
            seed: self.seed.unwrap_or(2025),
            report: self.report.unwrap_or_default(),
            token: self.token.unwrap_or_default(),
        })
    }
}
