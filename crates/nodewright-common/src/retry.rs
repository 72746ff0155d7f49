//! Bounded polling and retry utilities.
//!
//! Every blocking wait in the node lifecycle goes through [`poll_until`] with a
//! [`PollProfile`], so no wait can outlive its timeout. Transient errors from
//! the check function are absorbed and only surface as a timeout once the
//! bound is exceeded.
//!
//! [`retry_with_backoff`] is for single calls that may fail transiently
//! (eviction rejected by a disruption budget, API hiccups) and uses
//! exponential backoff with jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

use crate::Error;

/// Interval and timeout for a bounded poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollProfile {
    /// Time between polling attempts
    pub interval: Duration,
    /// Maximum total time to wait
    pub timeout: Duration,
}

impl PollProfile {
    /// Short profile for reconfiguration paths and quick readbacks
    pub const fn quick() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        }
    }

    /// Long profile for first-time bootstrap and annotation waits
    pub const fn standard() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(20 * 60),
        }
    }

    /// Custom profile
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollProfile {
    fn default() -> Self {
        Self::standard()
    }
}

/// Poll until a check yields a value, the profile times out, or `cancel` fires.
///
/// The check returns `Ok(Some(v))` when the condition is met, `Ok(None)` to keep
/// polling. Errors from the check are treated as transient and logged at trace
/// level; the last one is included in the timeout message.
pub async fn poll_until<T, F, Fut>(
    profile: PollProfile,
    cancel: &CancellationToken,
    context: &str,
    mut check_fn: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    let deadline = tokio::time::Instant::now() + profile.timeout;
    let mut last_error: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(context));
        }

        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                trace!(context = %context, "polling condition not yet met");
            }
            Err(e) => {
                trace!(context = %context, error = %e, "polling check failed, retrying");
                last_error = Some(e.to_string());
            }
        }

        if tokio::time::Instant::now() + profile.interval > deadline {
            let message = match last_error {
                Some(e) => format!("condition not met within {:?}, last error: {}", profile.timeout, e),
                None => format!("condition not met within {:?}", profile.timeout),
            };
            return Err(Error::timeout(context, message));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled(context)),
            _ = tokio::time::sleep(profile.interval) => {}
        }
    }
}

/// Run a single future, abandoning it if `cancel` fires first.
///
/// An already-cancelled token wins even over a future that is ready.
pub async fn cancellable<T, Fut>(
    cancel: &CancellationToken,
    context: &str,
    fut: Fut,
) -> Result<T, Error>
where
    Fut: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled(context)),
        result = fut => result,
    }
}

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries until success, or until `max_attempts` is exhausted, in which case
/// the last error is returned. `should_retry` decides whether an error is worth
/// another attempt; non-retryable errors return immediately.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !should_retry(&e) {
                    return Err(e);
                }
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                // Add jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
