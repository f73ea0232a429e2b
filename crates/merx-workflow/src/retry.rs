//! Retry executor for activities.
//!
//! Every attempt runs under a start-to-close timeout; failed attempts
//! back off exponentially up to a cap; non-retryable errors (the
//! deterministic validation kinds) fail fast on the first attempt. The
//! saga's cancellation token aborts waits and in-flight attempts
//! cooperatively.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::activities::ActivityError;
use crate::{
    DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_INTERVAL, DEFAULT_START_TO_CLOSE,
};

/// Backoff schedule for failed activity attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after each failure.
    pub backoff_multiplier: f64,
    /// Upper bound on the delay.
    pub max_interval: Duration,
    /// Total attempt budget, first attempt included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            backoff_multiplier: 2.0,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Per-activity execution options.
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    /// Budget for one attempt, submission to completion.
    pub start_to_close: Duration,
    /// Backoff schedule across attempts.
    pub retry: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close: DEFAULT_START_TO_CLOSE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Run one activity under the options' timeout and retry schedule.
///
/// `attempt` is called once per attempt and must produce a fresh future
/// each time. Returns the first success, the first non-retryable error,
/// the last error once attempts are exhausted, or `Cancelled` as soon as
/// the token fires.
pub async fn run_activity<T, F, Fut>(
    name: &'static str,
    options: &ActivityOptions,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, ActivityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let policy = &options.retry;
    let mut delay = policy.initial_interval;
    let max_attempts = policy.max_attempts.max(1);

    for attempt_no in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(ActivityError::Cancelled { activity: name });
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ActivityError::Cancelled { activity: name });
            }
            timed = tokio::time::timeout(options.start_to_close, attempt()) => match timed {
                Ok(result) => result,
                Err(_) => Err(ActivityError::Timeout {
                    activity: name,
                    seconds: options.start_to_close.as_secs(),
                }),
            },
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt_no == max_attempts => return Err(err),
            Err(err) => {
                warn!(activity = name, attempt = attempt_no, delay = ?delay, error = %err,
                    "activity attempt failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(ActivityError::Cancelled { activity: name });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = delay
                    .mul_f64(policy.backoff_multiplier)
                    .min(policy.max_interval);
            }
        }
    }
    unreachable!("attempt loop always returns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use merx_domain::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_options() -> ActivityOptions {
        ActivityOptions {
            start_to_close: Duration::from_millis(200),
            retry: RetryPolicy {
                initial_interval: Duration::from_millis(5),
                backoff_multiplier: 2.0,
                max_interval: Duration::from_millis(20),
                max_attempts: 3,
            },
        }
    }

    fn failure(kind: ErrorKind) -> ActivityError {
        ActivityError::Failed {
            activity: "test",
            kind,
            message: "boom".into(),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        let result = run_activity("test", &quick_options(), &cancel, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(failure(ErrorKind::Unavailable))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_the_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        let result: Result<(), _> = run_activity("test", &quick_options(), &cancel, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(failure(ErrorKind::Unavailable))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        let result: Result<(), _> = run_activity("test", &quick_options(), &cancel, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(failure(ErrorKind::InvalidInput))
            }
        })
        .await;

        assert!(!result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeouts_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();
        let mut options = quick_options();
        options.start_to_close = Duration::from_millis(10);

        let result: Result<(), _> = run_activity("test", &options, &cancel, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            ActivityError::Timeout { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_attempts() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let result: Result<(), _> = run_activity("test", &quick_options(), &cancel, move || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;

        assert!(result.unwrap_err().is_cancelled());
    }
}
