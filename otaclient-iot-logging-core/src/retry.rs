//! The shared exponential-backoff discipline used by the cloud log client:
//! `delay = min(backoff_max, backoff_factor * 2^attempt)`, capped at a fixed
//! number of attempts. Built on `backoff`'s `ExponentialBackoff`, with the
//! attempt-count ceiling enforced by hand since the crate's own cutoff is
//! elapsed-time based, not attempt-count based.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff_factor: Duration,
    pub backoff_max: Duration,
    pub max_retry: u32,
}

impl RetryPolicy {
    pub const fn new(backoff_factor: Duration, backoff_max: Duration, max_retry: u32) -> Self {
        Self {
            backoff_factor,
            backoff_max,
            max_retry,
        }
    }

    fn new_backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.backoff_factor)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.backoff_max)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Default policy for the create-log-group/create-log-stream operations:
/// `backoff_factor=2s, backoff_max=32s, max_retry=16`.
pub const CREATE_RETRY_POLICY: RetryPolicy =
    RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(32), 16);

/// Default policy for `put_log_events`: `backoff_factor=2s, backoff_max=32s,
/// max_retry=6`.
pub const PUT_EVENTS_RETRY_POLICY: RetryPolicy =
    RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(32), 6);

/// Runs `operation` until it succeeds, a non-retriable error is produced, or
/// `policy.max_retry` attempts have been made. `is_retriable` classifies the
/// error kind on each failure.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    is_retriable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = policy.new_backoff();
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retry && is_retriable(&err) => {
                let delay = backoff.next_backoff().unwrap_or(policy.backoff_max);
                tracing::debug!(attempt, ?delay, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_follows_exponential_formula_capped_at_max() {
        let policy = RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(32), 16);
        let mut backoff = policy.new_backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(8)));
        for _ in 0..10 {
            backoff.next_backoff();
        }
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(32)));
    }

    #[tokio::test]
    async fn stops_retrying_once_successful() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(4), 5);
        let result: Result<u32, &str> = retry_with_backoff(policy, |_| true, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_errors_fail_immediately() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(4), 5);
        let result: Result<u32, &str> = retry_with_backoff(policy, |_| false, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err("fatal") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
