//! Per-step retry state machine.
//!
//! ```text
//! ATTEMPT -> OUTCOME in {success, retryable-error, terminal-error}
//!   success        -> DONE
//!   retryable      -> SLEEP then ATTEMPT, while attempts < max
//!   terminal-error -> DONE
//! ```
//!
//! Assertion failures are not errors and never reach this module.

use crate::error::ErrorCode;
use crate::model::{RetryPolicy, RetryStrategy};
use crate::providers::Entropy;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff delay for 0-based attempt `k`, jitter applied last and the
/// result clamped to `[0, max_delay_ms]`.
pub fn delay_for_attempt(policy: &RetryPolicy, k: u32, entropy: &dyn Entropy) -> Duration {
    let base = policy.base_delay_ms as f64;
    let max = policy.max_delay_ms as f64;
    let raw = match policy.strategy {
        RetryStrategy::Fixed => base,
        RetryStrategy::Linear => (base * (k as f64 + 1.0)).min(max),
        RetryStrategy::Exponential => (base * policy.multiplier.powi(k as i32)).min(max),
    };
    let jittered = if policy.jitter {
        (raw * entropy.jitter_factor()).clamp(0.0, max)
    } else {
        raw
    };
    Duration::from_millis(jittered.round() as u64)
}

/// An error is retryable iff its kind is listed in `retry_on` (or the
/// list is empty, or carries `all`) and not listed in `stop_on`.
pub fn is_retryable(policy: &RetryPolicy, code: ErrorCode) -> bool {
    let kind = code.retry_kind();
    if policy.stop_on.iter().any(|k| k == kind || k == "all") {
        return false;
    }
    policy.retry_on.is_empty() || policy.retry_on.iter().any(|k| k == kind || k == "all")
}

/// Drive `op` under `policy`. `classify` inspects an outcome and
/// returns the error code when the attempt failed; outcomes carry
/// their own error payloads, so the last one is returned either way
/// along with the number of attempts executed.
pub async fn run_with_retry<T, F, Fut>(
    policy: Option<&RetryPolicy>,
    entropy: &dyn Entropy,
    classify: impl Fn(&T) -> Option<ErrorCode>,
    mut op: F,
) -> (T, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
{
    let max_attempts = policy.map_or(1, |p| p.max_attempts.max(1));
    let mut attempt = 0;
    loop {
        let outcome = op(attempt).await;
        attempt += 1;
        let code = match classify(&outcome) {
            None => return (outcome, attempt),
            Some(code) => code,
        };
        let policy = match policy {
            Some(p) => p,
            None => return (outcome, attempt),
        };
        if attempt >= max_attempts || !is_retryable(policy, code) {
            return (outcome, attempt);
        }
        let delay = delay_for_attempt(policy, attempt - 1, entropy);
        debug!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            code = code.as_str(),
            "retrying step"
        );
        tokio::time::sleep(delay).await;
    }
}
