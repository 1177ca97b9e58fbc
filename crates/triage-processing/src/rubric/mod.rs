//! LLM rubric scoring: 21 atomic dimensions per applicant.
//!
//! # Feature flag
//!
//! The prompt tables, response schema, retry policy, and cache are always
//! available. The async scorer, the canary, and the concrete endpoint
//! provider require the `llm` feature (default on), which pulls in tokio
//! and reqwest:
//!
//! ```toml
//! # Disable LLM support for offline ingestion/feature work
//! triage-processing = { version = "0.1", default-features = false }
//! ```
//!
//! # Architecture
//!
//! [`RubricScorer`] drives the batch: a semaphore caps in-flight
//! applicants, a shared rate gate absorbs 429 backpressure, and every
//! applicant's record reaches the [`cache`] all-or-nothing. The
//! [`LlmProvider`] trait is the transport seam; [`EndpointProvider`]
//! implements it for any OpenAI-compatible deployment configured via
//! `MODEL_ENDPOINT` / `MODEL_KEY`.

pub mod cache;
pub mod dimensions;
pub mod retry;
pub mod schema;

#[cfg(feature = "llm")]
mod canary;
#[cfg(feature = "llm")]
mod endpoint;
#[cfg(feature = "llm")]
mod provider;
#[cfg(feature = "llm")]
mod scorer;

pub use cache::{RubricCache, ScoreDetail, ScoreRecord};
pub use dimensions::{Dimension, DimensionGroup, DIMENSIONS, prompt_set_hash};
pub use retry::RetryPolicy;
pub use schema::{DimensionScore, ResponseError};

#[cfg(feature = "llm")]
pub use canary::{CanaryBaseline, CanaryOutcome, run_canary};
#[cfg(feature = "llm")]
pub use endpoint::{EndpointConfig, EndpointProvider, MODEL_ENDPOINT_VAR, MODEL_KEY_VAR};
#[cfg(feature = "llm")]
pub use provider::{CompletionRequest, LlmProvider};
#[cfg(feature = "llm")]
pub use retry::{RecordingSleeper, Sleeper, TokioSleeper};
#[cfg(feature = "llm")]
pub use scorer::{RubricScorer, RubricScorerBuilder, ScoringInputs};
