//! Exponential backoff with jitter for LLM calls.
//!
//! Implemented as a decorator over a single-attempt async closure. Only the
//! LLM round trip is ever retried; tool executors are not, because whether to
//! try a tool again is the agent's decision on the next step.

use crate::agenthub::llm::LlmError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Backoff parameters for the LLM retry decorator.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Ceiling applied after multiplication.
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(8),
            max_delay: Duration::from_secs(64),
            multiplier: 8.0,
        }
    }
}

impl RetryPolicy {
    /// Deterministic wait for the given zero-based failure count, before
    /// jitter is applied.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = self.multiplier.powi(failures as i32);
        let delay = self.base_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }

    /// The actual wait: backoff plus uniform jitter of up to half the
    /// backoff, so that concurrent conversations do not retry in lockstep.
    pub fn jittered_backoff(&self, failures: u32) -> Duration {
        let delay = self.backoff(failures);
        let jitter = rand::thread_rng().gen_range(0.0..=0.5);
        delay + delay.mul_f64(jitter)
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the
/// policy's attempt budget is exhausted.
pub async fn retry_llm_call<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut failures = 0u32;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && failures + 1 < policy.max_attempts => {
                let wait = policy.jittered_backoff(failures);
                log::warn!(
                    "retryable LLM failure (attempt {}/{}): {}; backing off {:?}",
                    failures + 1,
                    policy.max_attempts,
                    err,
                    wait
                );
                tokio::time::sleep(wait).await;
                failures += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
