//! Retry policy for the rate-limited LLM adapter.
//!
//! The policy is a pure value: given an attempt number it computes the
//! backoff delay (exponential with jitter, capped). Actually sleeping goes
//! through the [`Sleeper`] seam so tests advance a fake clock instead of
//! waiting wall-clock time.

use rand::Rng;
use std::time::Duration;

use crate::error::TransportError;

/// Explicit retry policy; the delays are parameters, never hardcoded.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (5 means 1 call + 4 retries).
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied after exponential growth.
    pub max_delay: Duration,
    /// Uniform jitter added on top, as a fraction of the computed delay.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Whether `error` on the given 1-based attempt warrants another try.
    pub fn should_retry(&self, error: &TransportError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    /// Backoff delay before retrying after the given 1-based attempt:
    /// `base * 2^(attempt-1)`, capped, plus uniform jitter.
    pub fn backoff_delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let grown = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);
        let jitter_ms = (grown.as_millis() as f64 * self.jitter_fraction).round() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rng.gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        grown + jitter
    }
}

/// Seam for sleeping between retries.
#[cfg(feature = "llm")]
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[cfg(feature = "llm")]
pub struct TokioSleeper;

#[cfg(feature = "llm")]
#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Test sleeper that records requested durations and returns immediately.
#[cfg(feature = "llm")]
pub struct RecordingSleeper {
    pub slept: parking_lot::Mutex<Vec<Duration>>,
}

#[cfg(feature = "llm")]
impl RecordingSleeper {
    pub fn new() -> Self {
        Self {
            slept: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn total_slept(&self) -> Duration {
        self.slept.lock().iter().sum()
    }
}

#[cfg(feature = "llm")]
impl Default for RecordingSleeper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "llm")]
#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
    }
}
