//! Exponential-backoff retry for remote calls.
//!
//! Every request sent to the control plane goes through [`retry`]. The
//! wrapped operation is re-run until it succeeds, fails with an error that
//! is not [retryable](TowerError::is_retryable), the attempt budget is
//! spent, or the caller's [`Context`] ends.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Result, TowerError};

/// Default number of attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the backoff ratio is applied.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default growth factor between attempts.
pub const DEFAULT_RATIO: f64 = 2.0;

/// Retry policy shared by all remote calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryOptions {
    /// Maximum number of attempts; zero selects the default.
    pub max_retries: u32,
    /// Base delay; zero selects the default.
    pub initial_backoff: Duration,
    /// Growth factor; values not above 1 select the default.
    pub ratio: f64,
    /// Upper bound on a single delay; zero selects ten times the base delay.
    pub max_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            ratio: DEFAULT_RATIO,
            max_delay: DEFAULT_INITIAL_BACKOFF * 10,
        }
    }
}

impl RetryOptions {
    /// Creates options with the given attempt budget and base delay.
    #[must_use]
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            ratio: DEFAULT_RATIO,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the growth factor.
    #[must_use]
    pub const fn with_ratio(mut self, ratio: f64) -> Self {
        self.ratio = ratio;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Replaces unset or out-of-range values with their defaults.
    #[must_use]
    pub fn normalized(self) -> Self {
        let max_retries = if self.max_retries == 0 {
            DEFAULT_MAX_RETRIES
        } else {
            self.max_retries
        };
        let initial_backoff = if self.initial_backoff.is_zero() {
            DEFAULT_INITIAL_BACKOFF
        } else {
            self.initial_backoff
        };
        let ratio = if self.ratio.is_finite() && self.ratio > 1.0 {
            self.ratio
        } else {
            DEFAULT_RATIO
        };
        let max_delay = if self.max_delay.is_zero() {
            initial_backoff.saturating_mul(10)
        } else {
            self.max_delay
        };
        Self {
            max_retries,
            initial_backoff,
            ratio,
            max_delay,
        }
    }

    /// Returns the delay sequence slept between attempts.
    #[must_use]
    pub fn schedule(&self) -> Backoff {
        let opts = self.normalized();
        Backoff {
            current: opts.initial_backoff,
            ratio: opts.ratio,
            max_delay: opts.max_delay,
        }
    }
}

/// Iterator over successive backoff delays.
///
/// Each delay is the previous one multiplied by the ratio and capped at the
/// maximum, so the first delay is already `initial * ratio`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    ratio: f64,
    max_delay: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let scaled = self.current.as_secs_f64() * self.ratio;
        let next = Duration::try_from_secs_f64(scaled).unwrap_or(self.max_delay);
        self.current = next.min(self.max_delay);
        Some(self.current)
    }
}

/// Runs `op` until it succeeds, retrying failures with exponential backoff.
///
/// Cancellation is checked before every attempt and during every sleep.
///
/// # Errors
///
/// Returns the context error if `ctx` ends, the first error that is not
/// retryable as is, or [`TowerError::RetriesExhausted`] wrapping the last
/// failure once the attempt budget is spent.
pub async fn retry<T, F, Fut>(ctx: &Context, options: &RetryOptions, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let opts = options.normalized();
    let mut delays = opts.schedule();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match ctx.run(op()).await? {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            debug!("Attempt {attempt} failed permanently: {err}");
            return Err(err);
        }
        if attempt >= opts.max_retries {
            warn!("Giving up after {attempt} attempts: {err}");
            return Err(TowerError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = delays.next().unwrap_or(opts.max_delay);
        debug!(
            "Attempt {attempt}/{} failed: {err}; retrying in {delay:?}",
            opts.max_retries
        );
        ctx.sleep(delay).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextError;
    use crate::error::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn transient() -> TowerError {
        ApiError::network("get-tasks", "temporary error").into()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_try() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let res = retry(&Context::background(), &RetryOptions::default(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TowerError>("success")
        })
        .await;

        assert_eq!(res.ok(), Some("success"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let opts = RetryOptions::new(3, Duration::from_millis(100));

        let res = retry(&Context::background(), &opts, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(transient())
            } else {
                Ok("success")
            }
        })
        .await;

        assert_eq!(res.ok(), Some("success"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let opts = RetryOptions::new(3, Duration::from_millis(100));

        let res: Result<()> = retry(&Context::background(), &opts, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        match res {
            Err(TowerError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.to_string().contains("temporary error"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        for err in [
            ApiError::request("create-vm", 400, "invalid vcpu"),
            ApiError::AuthenticationFailed {
                message: String::from("token expired"),
            },
        ] {
            let counter = AtomicU32::new(0);
            let calls = &counter;
            let err = TowerError::from(err);
            let message = err.to_string();
            let mut pending = Some(err);

            let res: Result<()> = retry(&Context::background(), &RetryOptions::default(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                let err = pending
                    .take()
                    .unwrap_or_else(|| TowerError::internal("called twice"));
                async move { Err(err) }
            })
            .await;

            assert_eq!(counter.load(Ordering::SeqCst), 1);
            assert_eq!(res.expect_err("fails").to_string(), message);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let opts = RetryOptions::new(3, Duration::from_millis(100));

        let res = retry(&Context::background(), &opts, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ApiError::request("get-vms", 503, "unavailable").into())
            } else {
                Ok("success")
            }
        })
        .await;

        assert_eq!(res.ok(), Some("success"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let (ctx, handle) = Context::background().with_cancel();
        let handle = Arc::new(handle);
        let calls = AtomicU32::new(0);
        let opts = RetryOptions::new(3, Duration::from_secs(1));

        let res: Result<&str> = retry(&ctx, &opts, || {
            let handle = Arc::clone(&handle);
            let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    handle.cancel();
                    Err(transient())
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert!(matches!(
            res,
            Err(TowerError::Context(ContextError::Cancelled))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_checked_at_backoff_sleep() {
        let ctx = Context::background().with_timeout(Duration::from_millis(500));
        let start = Instant::now();
        let opts = RetryOptions::new(5, Duration::from_secs(1));

        let res: Result<()> = retry(&ctx, &opts, || async { Err(transient()) }).await;

        assert!(matches!(
            res,
            Err(TowerError::Context(ContextError::DeadlineExceeded))
        ));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let opts = RetryOptions::new(10, Duration::from_millis(500))
            .with_ratio(3.0)
            .with_max_delay(Duration::from_secs(5));

        let delays: Vec<Duration> = opts.schedule().take(12).collect();

        assert_eq!(delays[0], Duration::from_millis(1500));
        assert_eq!(delays[1], Duration::from_millis(4500));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(5)));
        assert_eq!(delays[11], Duration::from_secs(5));
    }

    #[test]
    fn test_normalized_defaults() {
        let opts = RetryOptions::new(0, Duration::ZERO).with_ratio(0.5).normalized();

        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.initial_backoff, Duration::from_secs(1));
        assert!((opts.ratio - 2.0).abs() < f64::EPSILON);
        assert_eq!(opts.max_delay, Duration::from_secs(10));
    }
}
