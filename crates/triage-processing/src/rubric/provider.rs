//! LLM provider trait for the rubric scorer.
//!
//! The scorer depends on this seam only; the concrete transport (endpoint,
//! auth, JSON mode negotiation) lives in the implementation. To add a new
//! provider, implement [`LlmProvider`] and hand it to the scorer builder.
//!
//! The core imposes the sampling contract on every implementation:
//! `temperature = 0`, a fixed seed, JSON mode where the endpoint supports
//! it, and a tight `max_tokens` (the response schema fits in 200 tokens).

use crate::error::TransportError;

/// One chat completion request from the scorer's point of view.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Pinned sampling seed.
    pub seed: u64,
    /// Upper bound on completion tokens.
    pub max_tokens: u32,
}

/// Trait for chat-completion backends.
///
/// Implementations must be `Send + Sync`; the scorer shares one provider
/// across its in-flight applicant tasks. Implementations are responsible
/// for transport only — retries, pacing, and backpressure are the
/// scorer's job, driven by the [`TransportError`] kinds returned here.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Issue one completion and return the raw text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TransportError>;

    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Pinned model version, recorded in every cache record.
    fn model_version(&self) -> &str;
}
