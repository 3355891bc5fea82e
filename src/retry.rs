use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::future::retry_notify;
use tracing::{debug, warn};

use crate::config::TransferConfig;
use crate::error::{Result, UploadError};

/// Exponential backoff without jitter.
///
/// Attempt `i` (0-indexed) that fails is followed by a `base_delay * 2^i`
/// pause, so with the default 1s base the waits are 1s, 2s, 4s, ... A policy
/// with `max_retries = N` tries at most `N + 1` times and surfaces the last
/// error.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(config.max_retries, config.retry_base_delay)
    }

    /// Pause that follows failed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// `op` receives the 0-based attempt index. Errors for which
    /// [`UploadError::is_retryable`] is false end the loop immediately.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(self.delay_for(self.max_retries))
            .with_max_elapsed_time(None)
            .build();

        let max_retries = self.max_retries;
        let mut attempt = 0u32;

        retry_notify(
            backoff,
            || {
                let current = attempt;
                attempt += 1;
                let fut = op(current);
                async move {
                    fut.await.map_err(|err| {
                        if current >= max_retries || !err.is_retryable() {
                            debug!("{} giving up after attempt {}: {}", operation, current, err);
                            backoff::Error::permanent(err)
                        } else {
                            backoff::Error::transient(err)
                        }
                    })
                }
            },
            |err: UploadError, delay: Duration| {
                warn!("{} failed: {}, retrying in {:?}", operation, err, delay);
            },
        )
        .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    #[test]
    fn test_delay_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_always_failing_runs_n_plus_one_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fast(3);

        let result: Result<()> = policy
            .run("ping", |attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(UploadError::control("ping", Some(500), format!("attempt {attempt}")))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // The last attempt's error is the one surfaced
        let err = result.unwrap_err();
        assert!(err.to_string().ends_with("attempt 3"), "{err}");
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fast(5);

        let value = policy
            .run("flaky", |attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(UploadError::Network {
                            message: "reset".into(),
                        })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_tries_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = fast(0)
            .run("once", |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(UploadError::MissingEtag { part_number: 1 })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = fast(4)
            .run("local", |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(UploadError::Cancelled)
                }
            })
            .await;
        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backoff_waits_between_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(20));
        let start = Instant::now();
        let _: Result<()> = policy
            .run("slow", |_| async {
                Err(UploadError::Network {
                    message: "down".into(),
                })
            })
            .await;
        // 20ms + 40ms of backoff between the three attempts
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
