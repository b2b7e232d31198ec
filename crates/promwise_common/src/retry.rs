//! Retry with exponential backoff.
//!
//! The calling flow sleeps between attempts (tokio timer, no busy wait).
//! After the last attempt the last error is returned as-is.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// ±fraction of the delay added as jitter; 0 keeps delays deterministic
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_percent: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Policy allowing `max_retries` retries after the first attempt
    pub fn with_retries(max_retries: usize, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_retries + 1,
            base_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// No retries at all
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt number `attempt` (0-based): base * factor^attempt
    pub fn delay_for(&self, attempt: usize) -> Duration {
        use rand::Rng;

        let base_ms = self.base_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let base_ms = base_ms.min(self.max_delay.as_millis() as f64);

        if self.jitter_percent <= 0.0 {
            return Duration::from_millis(base_ms as u64);
        }

        let jitter_range = base_ms * self.jitter_percent;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_millis((base_ms + jitter).max(0.0) as u64)
    }
}

/// Retry every failure until the attempt ceiling
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(policy, |_| true, op).await
}

/// Retry only failures accepted by `should_retry`; others return immediately
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    should_retry: P,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    retry_with_cancel(policy, &CancellationToken::new(), should_retry, op).await
}

/// Like [`retry_if`], but stops scheduling attempts once `cancel` fires.
///
/// The first attempt always runs. A cancellation observed while waiting
/// between attempts returns the last error seen.
pub async fn retry_with_cancel<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        attempt += 1;

        if !should_retry(&err) {
            debug!(attempt, error = %err, "failure is not retryable");
            return Err(err);
        }

        if attempt >= max_attempts {
            error!(attempts = attempt, error = %err, "Operation failed after all retries");
            return Err(err);
        }

        let delay = policy.delay_for(attempt - 1);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Operation failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(attempt, "retry cancelled");
                return Err(err);
            }
            _ = sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::with_retries(3, Duration::from_secs(1), 2.0)
    }

    /// Operation failing `failures` times before it succeeds
    fn flaky(
        failures: usize,
        calls: Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::future::Ready<Result<&'static str, String>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n <= failures {
                Err(format!("attempt {} failed", n))
            } else {
                Ok("done")
            })
        }
    }

    #[test]
    fn test_delays_grow_exponentially() {
        let p = policy();
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
        assert_eq!(p.max_attempts, 4);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let p = RetryPolicy {
            jitter_percent: 0.2,
            ..policy()
        };
        for _ in 0..50 {
            let d = p.delay_for(1).as_millis();
            assert!((1600..=2400).contains(&d));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_last_allowed_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let result = retry(&policy(), flaky(3, calls.clone())).await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_final_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = retry(&policy(), flaky(10, calls.clone())).await;

        assert_eq!(result, Err("attempt 4 failed".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_early() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = retry_if(&policy(), |_: &String| false, flaky(10, calls.clone())).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let result =
            retry_with_cancel(&policy(), &cancel, |_: &String| true, flaky(10, calls.clone()))
                .await;

        // attempt 1 fails, 1s wait, attempt 2 fails, cancelled during the 2s wait
        assert_eq!(result, Err("attempt 2 failed".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
