//! Retry utilities with backoff and optional jitter.
//!
//! Run-task retries use a fixed interval (`backoff_multiplier = 1.0`, no
//! jitter) so that a task declaring `retries: N` makes exactly `N + 1`
//! attempts spaced by its `retryInterval`. Cluster lookups use exponential
//! backoff with jitter.
//!
//! # Example
//!
//! ```ignore
//! use maya_common::retry::{retry_when, RetryConfig};
//!
//! let pod = retry_when(
//!     &RetryConfig::with_max_attempts(3),
//!     "get_pod",
//!     || async { pods.get(&name).await.map_err(Error::from) },
//!     Error::is_retryable,
//! )
//! .await
//! .result?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Randomize each delay between 0.5x and 1.5x
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
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

    /// `retries + 1` attempts separated by a constant interval
    pub fn fixed(retries: u32, interval: Duration) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            initial_delay: interval,
            max_delay: interval,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Outcome of a retried operation along with how many attempts it took
#[derive(Debug)]
pub struct Attempted<T, E> {
    /// Final result: the first success or the last error
    pub result: Result<T, E>,
    /// Number of attempts made (at least 1)
    pub attempts: u32,
}

impl<T, E> Attempted<T, E> {
    /// Attempts beyond the first one
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Execute an async operation with backoff, retrying only errors accepted by
/// `should_retry`.
pub async fn retry_when<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Attempted<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                return Attempted {
                    result: Ok(result),
                    attempts: attempt,
                }
            }
            Err(e) => {
                if !should_retry(&e) {
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    };
                }

                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    };
                }

                let wait = if config.jitter {
                    let jitter = rand::thread_rng().gen_range(0.5..1.5);
                    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
                } else {
                    delay
                };

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = wait.as_millis(),
                    "Operation failed, retrying"
                );

                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
