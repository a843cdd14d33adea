//! What the loops do when a fetch or send fails, and what the fetch loop does
//! with items the watermark already covers.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::error::Retryable;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Reaction to a failed fetch or send.
///
/// Every failure is reported on the relay's fault channel regardless of
/// policy; the policy only decides what the loop does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log, report and carry on with the next tick or item.
    Continue,
    /// Retry retryable errors up to `attempts` more times with exponential
    /// backoff starting near `base_delay`, then behave like `Continue`.
    Retry { attempts: usize, base_delay: Duration },
    /// Report and stop the loop that failed.
    Halt,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::Retry {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl ErrorPolicy {
    pub fn halts(&self) -> bool {
        matches!(self, Self::Halt)
    }

    /// Run `op` under this policy.
    ///
    /// No backoff sleep is shorter than `floor`; the post loop passes its
    /// inter-send delay so retries stay paced.
    pub(crate) async fn run<T, E, F, Fut>(&self, floor: Duration, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        match *self {
            Self::Retry {
                attempts,
                base_delay,
            } => {
                // ExponentialBackoff yields factor * 2^n ms, n starting at 1.
                let factor = u64::try_from(base_delay.as_millis() / 2)
                    .unwrap_or(u64::MAX)
                    .max(1);
                let strategy = ExponentialBackoff::from_millis(2)
                    .factor(factor)
                    .max_delay(MAX_BACKOFF)
                    .map(jitter)
                    .map(move |delay| delay.max(floor))
                    .take(attempts);
                RetryIf::spawn(strategy, op, |err: &E| err.is_retryable()).await
            }
            Self::Continue | Self::Halt => op().await,
        }
    }
}

/// Whether the fetch loop re-checks items against the watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupPolicy {
    /// Drop items whose id is not above the highest id already enqueued.
    #[default]
    FilterSeen,
    /// Enqueue whatever the source returns; its `since` filter is trusted.
    TrustSource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Flaky(bool);

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    fn retry(attempts: usize) -> ErrorPolicy {
        ErrorPolicy::Retry {
            attempts,
            base_delay: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_errors() {
        let calls = AtomicUsize::new(0);
        let result = retry(3)
            .run(Duration::ZERO, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Flaky(true))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_attempt_bound() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), Flaky> = retry(2)
            .run(Duration::ZERO, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky(true))
            })
            .await;

        assert_eq!(result, Err(Flaky(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "first try plus two retries");
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), Flaky> = retry(5)
            .run(Duration::ZERO, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky(false))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_sleeps_respect_floor() {
        let start = tokio::time::Instant::now();
        let calls = AtomicUsize::new(0);
        let _: Result<(), Flaky> = retry(2)
            .run(Duration::from_secs(5), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky(true))
            })
            .await;

        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn continue_and_halt_run_once() {
        for policy in [ErrorPolicy::Continue, ErrorPolicy::Halt] {
            let calls = AtomicUsize::new(0);
            let _: Result<(), Flaky> = policy
                .run(Duration::ZERO, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky(true))
                })
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
