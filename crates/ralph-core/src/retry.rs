// Retry Engine
// Bounded-attempt retry with exponential backoff and jitter. The classifier
// gates every retry: fatal categories surface immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::classify::classify;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Inner retries after the first attempt. `retries = 2` means up to
    /// three invocations per budget.
    pub retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            retries,
            base_delay_ms,
            max_delay_ms,
        }
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
    pub last_backoff_ms: Option<u64>,
}

/// Invoke `f(attempt)` starting at attempt 1. Retriable failures back off
/// with `min(max_delay, base * 2^(attempt-1))` plus or minus 20% jitter;
/// fatal or budget-exhausting failures surface as `RetryExhausted`.
/// Cancellation aborts the backoff sleep.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<RetryOutcome<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    let mut last_backoff_ms: Option<u64> = None;
    loop {
        match f(attempt).await {
            Ok(value) => {
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt,
                    last_backoff_ms,
                });
            }
            Err(error) => {
                let category = classify(&error);
                if !category.is_retriable() || attempt > policy.retries {
                    return Err(OrchestratorError::RetryExhausted {
                        attempts: attempt,
                        last_error: Box::new(error),
                        last_backoff_ms,
                    });
                }
                let delay = backoff_delay(policy, attempt);
                last_backoff_ms = Some(delay.as_millis() as u64);
                tracing::warn!(
                    operation,
                    attempt,
                    category = category.as_str(),
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after backoff"
                );
                metrics::counter!("ralph_retries_total", "operation" => operation.to_string())
                    .increment(1);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(OrchestratorError::Cancelled(format!(
                            "{operation} cancelled during backoff"
                        )));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let shift = (attempt - 1).min(16);
    let exponential = policy.base_delay_ms.saturating_mul(1u64 << shift);
    let capped = exponential.min(policy.max_delay_ms);
    let jitter = capped / 5;
    let millis = if jitter == 0 {
        capped
    } else {
        capped - jitter + rand::thread_rng().gen_range(0..=jitter * 2)
    };
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(2, 1, 4)
    }

    #[tokio::test]
    async fn first_attempt_success_has_no_backoff() {
        let cancel = CancellationToken::new();
        let outcome = with_retry("op", &fast_policy(), &cancel, |attempt| async move {
            Ok::<_, OrchestratorError>(attempt)
        })
        .await
        .unwrap();
        assert_eq!(outcome.value, 1);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.last_backoff_ms, None);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();
        let outcome = with_retry("op", &fast_policy(), &cancel, move |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(OrchestratorError::Timeout("slow".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(outcome.value, "done");
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.last_backoff_ms.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_exhaustion_raises_retry_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();
        let err = with_retry("op", &fast_policy(), &cancel, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(OrchestratorError::Timeout("slow".into()))
            }
        })
        .await
        .unwrap_err();
        // retries = 2 means three invocations per budget.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            OrchestratorError::RetryExhausted {
                attempts,
                last_backoff_ms,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(last_backoff_ms.is_some());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn deterministic_errors_short_circuit() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();
        let err = with_retry("op", &fast_policy(), &cancel, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(OrchestratorError::Validation("bad input".into()))
            }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match err {
            OrchestratorError::RetryExhausted {
                attempts,
                last_backoff_ms,
                last_error,
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(last_backoff_ms, None);
                assert!(matches!(*last_error, OrchestratorError::Validation(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_the_backoff_sleep() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = RetryPolicy::new(2, 60_000, 60_000);
        let err = with_retry("op", &policy, &cancel, |_| async {
            Err::<(), _>(OrchestratorError::Timeout("slow".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled(_)));
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter_band() {
        let policy = RetryPolicy::new(5, 100, 10_000);
        for (attempt, nominal) in [(1u32, 100u64), (2, 200), (3, 400), (4, 800)] {
            let delay = backoff_delay(&policy, attempt).as_millis() as u64;
            let jitter = nominal / 5;
            assert!(
                delay >= nominal - jitter && delay <= nominal + jitter,
                "attempt {attempt}: {delay} outside [{}, {}]",
                nominal - jitter,
                nominal + jitter
            );
        }
    }

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let policy = RetryPolicy::new(10, 1_000, 2_500);
        let delay = backoff_delay(&policy, 8).as_millis() as u64;
        assert!(delay <= 3_000, "cap plus jitter exceeded: {delay}");
    }
}
