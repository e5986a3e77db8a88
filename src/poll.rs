//! Poll controller: repeat a request until a condition holds or the
//! deadline is hit.

use crate::comparators;
use crate::http::HttpOutcome;
use crate::jsonpath;
use crate::model::{
    OnTimeout, PollCondition, PollConditionKind, PollConfig, RetryPolicy, TimeoutBehavior,
};
use crate::providers::Entropy;
use crate::report::PollDetail;
use crate::retry::delay_for_attempt;
use serde_json::Value;
use std::future::Future;
use std::time::Instant;
use tracing::debug;

/// Evaluate the poll condition against a response.
pub fn condition_holds(condition: &PollCondition, outcome: &HttpOutcome) -> bool {
    match condition.kind {
        PollConditionKind::Jsonpath => {
            let path = condition.path.as_deref().unwrap_or("$");
            let matched = jsonpath::evaluate(path, &outcome.body);
            if condition.operator == "exists" {
                return !matched.is_missing();
            }
            let actual = matched.into_value().unwrap_or(Value::Null);
            comparators::compare(&condition.operator, &actual, &condition.expected)
                .unwrap_or(false)
        }
        PollConditionKind::StatusCode => {
            if condition.operator == "exists" {
                return outcome.status_code != 0;
            }
            comparators::compare(
                &condition.operator,
                &Value::from(outcome.status_code),
                &condition.expected,
            )
            .unwrap_or(false)
        }
    }
}

/// Outcome of a poll loop: the last response (if any attempt ran), the
/// detail for the document, and whether the step failed.
pub struct PollRun<T> {
    pub last: Option<T>,
    pub detail: PollDetail,
    pub failed: bool,
}

/// Drive attempts until `check` passes, `max_attempts` is spent, or
/// the deadline elapses. Backoff between attempts reuses the retry
/// formulas with `base = interval` and `max = timeout`.
pub async fn run_poll<T, F, Fut>(
    config: &PollConfig,
    on_timeout: Option<&OnTimeout>,
    entropy: &dyn Entropy,
    mut attempt_fn: F,
    check: impl Fn(&T) -> bool,
) -> PollRun<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
{
    let backoff_policy = RetryPolicy {
        max_attempts: config.max_attempts.max(1),
        strategy: config.backoff,
        base_delay_ms: config.interval,
        max_delay_ms: config.timeout,
        multiplier: 2.0,
        jitter: false,
        retry_on: Vec::new(),
        stop_on: Vec::new(),
    };
    let max_attempts = config.max_attempts.max(1);
    let start = Instant::now();
    let mut last = None;

    for attempt in 1..=max_attempts {
        if start.elapsed().as_millis() as u64 > config.timeout {
            return timed_out(on_timeout, attempt - 1, start, last);
        }

        let outcome = attempt_fn(attempt).await;
        let met = check(&outcome);
        last = Some(outcome);
        if met {
            debug!(attempt, "poll condition met");
            return PollRun {
                last,
                detail: PollDetail {
                    attempts: attempt,
                    condition_met: true,
                    timed_out: false,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    message: None,
                },
                failed: false,
            };
        }

        if attempt < max_attempts {
            let delay = delay_for_attempt(&backoff_policy, attempt - 1, entropy);
            tokio::time::sleep(delay).await;
        }
    }

    timed_out(on_timeout, max_attempts, start, last)
}

fn timed_out<T>(
    on_timeout: Option<&OnTimeout>,
    attempts: u32,
    start: Instant,
    last: Option<T>,
) -> PollRun<T> {
    let behavior = on_timeout.map_or(TimeoutBehavior::Fail, |t| t.behavior);
    let message = on_timeout
        .and_then(|t| t.message.clone())
        .unwrap_or_else(|| format!("poll condition not met after {attempts} attempts"));
    PollRun {
        last,
        detail: PollDetail {
            attempts,
            condition_met: false,
            timed_out: true,
            elapsed_ms: start.elapsed().as_millis() as u64,
            message: Some(message),
        },
        failed: behavior == TimeoutBehavior::Fail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FixedEntropy;
    use crate::report::RequestDetail;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn outcome_with_status(status: &str) -> HttpOutcome {
        HttpOutcome {
            status_code: 200,
            headers: BTreeMap::new(),
            body: json!({"status": status}),
            body_size: 0,
            response_time: 1,
            cookies: BTreeMap::new(),
            error: None,
            request: RequestDetail::default(),
        }
    }

    fn config(max_attempts: u32, interval: u64) -> PollConfig {
        PollConfig {
            condition: PollCondition {
                kind: PollConditionKind::Jsonpath,
                path: Some("$.status".to_string()),
                operator: "eq".to_string(),
                expected: json!("ACTIVE"),
            },
            max_attempts,
            interval,
            timeout: 60_000,
            backoff: crate::model::RetryStrategy::Fixed,
        }
    }

    #[tokio::test]
    async fn test_poll_until_active() {
        // PENDING, PENDING, ACTIVE: condition holds on the third
        // attempt.
        let calls = Arc::new(AtomicU32::new(0));
        let cfg = config(5, 1);
        let calls_in = calls.clone();
        let run = run_poll(
            &cfg,
            None,
            &FixedEntropy,
            move |_| {
                let calls = calls_in.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    outcome_with_status(if n < 2 { "PENDING" } else { "ACTIVE" })
                }
            },
            |out| condition_holds(&cfg.condition, out),
        )
        .await;

        assert!(!run.failed);
        assert!(run.detail.condition_met);
        assert_eq!(run.detail.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_then_fail() {
        let cfg = config(1, 1);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let run = run_poll(
            &cfg,
            None,
            &FixedEntropy,
            move |_| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    outcome_with_status("PENDING")
                }
            },
            |out| condition_holds(&cfg.condition, out),
        )
        .await;

        // maxAttempts=1: exactly one evaluation.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(run.failed);
        assert!(run.detail.timed_out);
        assert!(!run.detail.condition_met);
    }

    #[tokio::test]
    async fn test_on_timeout_continue() {
        let cfg = config(2, 1);
        let on_timeout = OnTimeout {
            behavior: TimeoutBehavior::Continue,
            message: Some("still pending, carrying on".to_string()),
        };
        let run = run_poll(
            &cfg,
            Some(&on_timeout),
            &FixedEntropy,
            |_| async { outcome_with_status("PENDING") },
            |out| condition_holds(&cfg.condition, out),
        )
        .await;

        assert!(!run.failed);
        assert!(run.detail.timed_out);
        assert_eq!(
            run.detail.message.as_deref(),
            Some("still pending, carrying on")
        );
    }

    #[test]
    fn test_condition_operators() {
        let out = outcome_with_status("ACTIVE");
        let mut cond = PollCondition {
            kind: PollConditionKind::Jsonpath,
            path: Some("$.status".to_string()),
            operator: "eq".to_string(),
            expected: json!("ACTIVE"),
        };
        assert!(condition_holds(&cond, &out));

        cond.operator = "ne".to_string();
        assert!(!condition_holds(&cond, &out));

        cond.operator = "exists".to_string();
        assert!(condition_holds(&cond, &out));

        cond.path = Some("$.missing".to_string());
        assert!(!condition_holds(&cond, &out));
    }

    #[test]
    fn test_status_code_condition() {
        let out = outcome_with_status("x");
        let cond = PollCondition {
            kind: PollConditionKind::StatusCode,
            path: None,
            operator: "eq".to_string(),
            expected: json!(200),
        };
        assert!(condition_holds(&cond, &out));

        let ge = PollCondition {
            kind: PollConditionKind::StatusCode,
            path: None,
            operator: "ge".to_string(),
            expected: json!(200),
        };
        assert!(condition_holds(&ge, &out));
    }
}
