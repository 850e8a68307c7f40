// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Provides configurable retry behavior for transient failures.
//! Different presets are available for different use cases.
//!
//! # Example
//!
//! ```
//! use mirror_sync::resilience::retry::RetryConfig;
//! use std::time::Duration;
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Daemon: never give up, back off up to 5 minutes
//! let daemon = RetryConfig::daemon();
//! assert_eq!(daemon.max_retries, None);
//! assert_eq!(daemon.max_delay, Duration::from_secs(300));
//!
//! // Chunk writes: 5 attempts, 100ms doubling to 30s, ±25% jitter
//! let chunk = RetryConfig::chunk_write(5);
//! assert_eq!(chunk.initial_delay, Duration::from_millis(100));
//! assert_eq!(chunk.jitter, 0.25);
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SyncError;

/// Configuration for connection/operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - Fast-fail for initial connections
/// - [`RetryConfig::daemon()`] - Infinite retry, also the controller backoff
/// - [`RetryConfig::query()`] - Quick retry for individual cache reads
/// - [`RetryConfig::chunk_write()`] - Bulk chunk writes
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts (not retries after the first); `None` = forever
    pub max_retries: Option<usize>,
    /// Fractional spread applied to every delay, e.g. 0.25 = ±25%
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::daemon()
    }
}

impl RetryConfig {
    /// Fast-fail retry for initial startup connection.
    /// Attempts 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter: 0.0,
        }
    }

    /// Infinite retry, 1s doubling to a 5 minute cap.
    #[must_use]
    pub fn daemon() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            factor: 2.0,
            jitter: 0.0,
        }
    }

    /// Quick retry for individual queries (don't block forever).
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter: 0.0,
        }
    }

    /// Bulk chunk writes: `attempts` tries, 100ms ×2 capped at 30s, ±25% jitter.
    #[must_use]
    pub fn chunk_write(attempts: usize) -> Self {
        Self {
            max_retries: Some(attempts.max(1)),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.25,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[must_use]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
            jitter: 0.0,
        }
    }
}

/// Stateful delay sequence for one retrying operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        let current = config.initial_delay;
        Self { config, current }
    }

    /// Delay to wait now; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = base.mul_f64(self.config.factor).min(self.config.max_delay);
        apply_jitter(base, self.config.jitter)
    }

    /// Start over from the initial delay (after a success).
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let spread = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
    delay.mul_f64(spread)
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = Backoff::new(config.clone());
    let mut failures = 0usize;

    loop {
        let err = match operation().await {
            Ok(val) => {
                if failures > 0 {
                    info!(operation = operation_name, failures, "Recovered after retrying");
                }
                return Ok(val);
            }
            Err(err) => err,
        };

        failures += 1;
        if config.max_retries.is_some_and(|max| failures >= max) {
            return Err(err);
        }
        let delay = backoff.next_delay();
        warn!(
            operation = operation_name,
            attempt = failures,
            max = ?config.max_retries,
            error = %err,
            ?delay,
            "Attempt failed, backing off"
        );
        sleep(delay).await;
    }
}

/// Retry only [`SyncError::is_transient`] failures, giving up early on
/// cancellation.
///
/// Non-transient errors return immediately. `on_retry` observes every failure
/// that will be retried. Cancellation during a backoff sleep (or before an
/// attempt) yields [`SyncError::Cancelled`].
pub async fn retry_transient<F, Fut, T, R>(
    operation_name: &str,
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut on_retry: R,
    mut operation: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
    R: FnMut(&SyncError),
{
    let mut backoff = Backoff::new(config.clone());
    let mut failures = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let err = match operation().await {
            Ok(val) => {
                if failures > 0 {
                    info!(operation = operation_name, failures, "Recovered after transient failures");
                }
                return Ok(val);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };

        failures += 1;
        if config.max_retries.is_some_and(|max| failures >= max) {
            warn!(operation = operation_name, attempts = failures, error = %err, "Giving up");
            return Err(err);
        }

        let delay = backoff.next_delay();
        warn!(operation = operation_name, attempt = failures, error = %err, ?delay, "Transient failure, retrying");
        on_retry(&err);

        tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || async { Ok(42) },
        ).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 3 {
                        Err(TestError(format!("fail {}", count)))
                    } else {
                        Ok(42)
                    }
                }
            },
        ).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_transient_stops_on_fatal() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let cancel = CancellationToken::new();

        let result: Result<(), SyncError> = retry_transient(
            "fatal_op",
            &RetryConfig::test(),
            &cancel,
            |_| {},
            || {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::FatalIo("access denied".into()))
                }
            },
        ).await;

        assert!(matches!(result, Err(SyncError::FatalIo(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_transient_exhausts_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let retries = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        let config = RetryConfig {
            jitter: 0.25,
            ..RetryConfig::chunk_write(5)
        };
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            ..config
        };

        let result: Result<(), SyncError> = retry_transient(
            "flaky_op",
            &config,
            &cancel,
            |_| {
                retries.fetch_add(1, Ordering::SeqCst);
            },
            || {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::TransientIo("deadlock".into()))
                }
            },
        ).await;

        assert!(matches!(result, Err(SyncError::TransientIo(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        assert_eq!(retries.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_transient_cancelled_during_backoff() {
        let cancel = CancellationToken::new();
        let config = RetryConfig {
            initial_delay: Duration::from_secs(60),
            ..RetryConfig::chunk_write(5)
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<(), SyncError> = retry_transient(
            "slow_op",
            &config,
            &cancel,
            |_| {},
            || async { Err(SyncError::TransientIo("reset".into())) },
        ).await;

        assert_eq!(result, Err(SyncError::Cancelled));
    }

    #[test]
    fn test_retry_config_presets() {
        let startup = RetryConfig::startup();
        assert_eq!(startup.max_retries, Some(5));

        let daemon = RetryConfig::daemon();
        assert!(daemon.max_retries.is_none());
        assert_eq!(daemon.initial_delay, Duration::from_secs(1));

        let query = RetryConfig::query();
        assert_eq!(query.max_retries, Some(3));

        let chunk = RetryConfig::chunk_write(0);
        assert_eq!(chunk.max_retries, Some(1));
        assert_eq!(chunk.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            factor: 2.0,
            max_retries: Some(5),
            jitter: 0.0,
        });

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let mut backoff = Backoff::new(RetryConfig::chunk_write(5));
        for _ in 0..100 {
            backoff.reset();
            let d = backoff.next_delay();
            assert!(d >= Duration::from_millis(75) && d <= Duration::from_millis(125), "{:?}", d);
        }
    }
}
