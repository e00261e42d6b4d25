//! Bounded exponential-backoff retry around one batch's generation call.
//!
//! ## State machine
//!
//! ```text
//!            ┌──────── failure, retryable, attempts < max ───────┐
//!            ▼                                                    │
//!  ──▶ Attempting(n) ── success ──▶ Succeeded                     │
//!            │                                                    │
//!            ├── failure ── sleep(initial × 2ⁿ) ──────────────────┘
//!            │
//!            └── failure, attempts == max or not retryable ──▶ Exhausted
//! ```
//!
//! `max_retries` counts attempts, the first call included: with the default
//! of 3 and 1000 ms the waits are 1 s then 2 s. No jitter is added; batches of
//! one document run sequentially, so retries never fire in lockstep.

use crate::error::{FailureClass, GenerationFailure, Pdf2CardsError};
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Retry parameters, usually taken from [`crate::config::PipelineConfig::retry_policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first call included. `0` behaves like `1`.
    pub max_retries: u32,
    /// Wait after the first failed attempt; doubles each time.
    pub initial_delay_ms: u64,
    /// Whether [`FailureClass::Malformed`] failures are retried.
    pub retry_malformed: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            retry_malformed: true,
        }
    }
}

impl RetryPolicy {
    /// Upper bound on attempts.
    pub fn attempt_limit(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Wait after 0-based attempt `attempt` failed: `initial × 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor))
    }

    /// Whether a failure of this class may be retried at all.
    pub fn is_retryable(&self, class: FailureClass) -> bool {
        match class {
            FailureClass::Transient => true,
            FailureClass::Malformed => self.retry_malformed,
            FailureClass::Permanent => false,
        }
    }
}

/// A successful value together with the number of attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Terminal failure: the last attempt's error and how many attempts were made.
#[derive(Debug)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last: GenerationFailure,
}

impl From<RetryExhausted> for Pdf2CardsError {
    fn from(e: RetryExhausted) -> Self {
        Pdf2CardsError::exhausted(e.attempts, &e.last)
    }
}

/// Run `op` until it succeeds, hits a non-retryable failure, or runs out of attempts.
///
/// `op` receives the 0-based attempt number. `on_retry` is invoked with the
/// attempt that just failed and its error, before the backoff sleep.
pub async fn retry_with_backoff<T, F, Fut, R>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    mut on_retry: R,
) -> Result<Retried<T>, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GenerationFailure>>,
    R: FnMut(u32, &GenerationFailure),
{
    let limit = policy.attempt_limit();
    let mut attempt = 0;

    loop {
        let err = match op(attempt).await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt + 1,
                })
            }
            Err(err) => err,
        };

        let attempts = attempt + 1;
        let class = err.class();
        if attempts >= limit || !policy.is_retryable(class) {
            warn!(
                "{}: giving up after {} attempt(s) ({:?}): {}",
                label, attempts, class, err
            );
            return Err(RetryExhausted {
                attempts,
                last: err,
            });
        }

        let delay = policy.delay_for(attempt);
        warn!(
            "{}: attempt {}/{} failed — {}; retrying in {}ms",
            label,
            attempts,
            limit,
            err,
            delay.as_millis()
        );
        on_retry(attempt, &err);
        sleep(delay).await;
        attempt = attempts;
    }
}
