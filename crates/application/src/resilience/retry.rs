//! Retry logic with configurable backoff
//!
//! Provides the retry loop used for provider calls, with fixed, linear or
//! exponential backoff and optional jitter to prevent thundering herd.
//!
//! # Example
//!
//! ```rust,ignore
//! use application::resilience::{RetryPolicy, with_retry};
//!
//! let policy = RetryPolicy::default();
//! let result = with_retry(&policy, || async {
//!     provider.call().await
//! }).await;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Jitter applied to each delay when enabled (±10%)
pub const JITTER_FACTOR: f64 = 0.1;

/// How the delay between attempts grows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Always `base`
    Fixed,
    /// `base × attempt`; the first retry (attempt 0) is immediate
    Linear,
    /// `base × factor^attempt`
    #[default]
    Exponential,
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Linear => write!(f, "linear"),
            Self::Exponential => write!(f, "exponential"),
        }
    }
}

/// Retry budget and backoff for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff strategy (default: exponential)
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Base delay in seconds (default: 1.0)
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: f64,

    /// Growth factor for exponential backoff (default: 2.0)
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Upper bound for any single delay in seconds (default: 60.0)
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,

    /// Whether to add ±10% jitter (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay() -> f64 {
    1.0
}

const fn default_factor() -> f64 {
    2.0
}

const fn default_max_delay() -> f64 {
    60.0
}

const fn default_true() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            strategy: BackoffStrategy::default(),
            base_delay_secs: default_base_delay(),
            factor: default_factor(),
            max_delay_secs: default_max_delay(),
            jitter: default_true(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom parameters and jitter enabled
    #[must_use]
    pub const fn new(
        max_retries: u32,
        strategy: BackoffStrategy,
        base_delay_secs: f64,
        factor: f64,
        max_delay_secs: f64,
    ) -> Self {
        Self {
            max_retries,
            strategy,
            base_delay_secs,
            factor,
            max_delay_secs,
            jitter: true,
        }
    }

    /// Single attempt, no retries
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, BackoffStrategy::Fixed, 0.0, 1.0, 0.0)
    }

    /// Disable jitter
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Total attempts allowed (first try plus retries)
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculate the delay before retry number `attempt` (0-indexed)
    ///
    /// The raw delay is clamped to `max_delay_secs` before jitter is applied.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max = if self.max_delay_secs.is_finite() {
            self.max_delay_secs.max(0.0)
        } else {
            0.0
        };

        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_secs,
            BackoffStrategy::Linear => self.base_delay_secs * f64::from(attempt),
            BackoffStrategy::Exponential => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                self.base_delay_secs * self.factor.powi(exponent)
            },
        };

        let capped = if raw.is_finite() { raw.clamp(0.0, max) } else { max };

        let final_delay = if self.jitter && capped > 0.0 {
            let range = capped * JITTER_FACTOR;
            capped + rand::rng().random_range(-range..=range)
        } else {
            capped
        };

        Duration::try_from_secs_f64(final_delay.max(0.0)).unwrap_or(Duration::ZERO)
    }
}

/// Trait for errors that can be checked for retryability
pub trait Retryable {
    /// Returns true if this error is retryable
    fn is_retryable(&self) -> bool;
}

/// Retry result containing either success or the last error
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The result of the operation
    pub result: Result<T, E>,
    /// Number of attempts made (1 = no retries, 2 = one retry, etc.)
    pub attempts: u32,
    /// Total time spent including backoff
    pub total_duration: Duration,
}

/// Execute an async operation with retry logic
///
/// Attempts run strictly in sequence; attempt N+1 starts only after attempt N
/// failed and its backoff elapsed. A non-retryable error ends the loop
/// immediately.
#[allow(clippy::cast_possible_truncation)]
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(
                        attempts = attempts,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Operation succeeded after retries"
                    );
                }
                return RetryResult {
                    result: Ok(value),
                    attempts,
                    total_duration: start.elapsed(),
                };
            },
            Err(err) => {
                let retry_attempt = attempts - 1;

                if !err.is_retryable() {
                    debug!(
                        attempts = attempts,
                        error = %err,
                        "Operation failed with non-retryable error"
                    );
                    return RetryResult {
                        result: Err(err),
                        attempts,
                        total_duration: start.elapsed(),
                    };
                }

                if retry_attempt >= policy.max_retries {
                    warn!(
                        attempts = attempts,
                        max_retries = policy.max_retries,
                        error = %err,
                        "Operation failed after max retries"
                    );
                    return RetryResult {
                        result: Err(err),
                        attempts,
                        total_duration: start.elapsed(),
                    };
                }

                let delay = policy.delay_for_attempt(retry_attempt);
                debug!(
                    attempt = attempts,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            },
        }
    }
}
