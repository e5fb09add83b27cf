//! Bounded retry with exponential or fixed backoff.
//!
//! Used for host calls that may fail transiently: outbound signed requests and
//! public key lookups during installation.

use std::time::Duration;

use serde::Deserialize;

use crate::error::AuthError;

/// Configuration for retry behavior.
///
/// The delay before retry `n` (zero based) is
/// `initial_delay * backoff_multiplier^n`, capped at `max_delay`. A multiplier
/// of `1.0` gives a fixed interval.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use connect_auth::reliability::RetryPolicy;
///
/// // Default policy: 3 attempts, 100ms initial delay, 5s max delay
/// let policy = RetryPolicy::default();
///
/// // Three attempts, two seconds apart
/// let fixed = RetryPolicy::fixed(3, Duration::from_secs(2));
/// assert!((fixed.backoff_multiplier - 1.0).abs() < f64::EPSILON);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default: 3)
    pub max_attempts: u32,
    /// Delay before the first retry (default: 100ms)
    pub initial_delay: Duration,
    /// Upper bound for any single delay (default: 5s)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom maximum attempts.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// Creates a policy that waits the same `delay` between attempts.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, initial_delay: delay, max_delay: delay, backoff_multiplier: 1.0 }
    }

    /// Calculates delay for a specific attempt.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(
            clippy::cast_precision_loss,
            reason = "acceptable for duration calculations"
        )]
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "delay_ms is positive and capped below"
        )]
        let delay = Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64);
        delay.min(self.max_delay)
    }
}

/// Retry settings as they appear in configuration files.
///
/// ```toml
/// [retry]
/// max_attempts = 4
/// initial_delay_ms = 200
/// max_delay_ms = 3000
/// backoff_multiplier = 2.0
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_delay_ms() -> u64 {
    100
}

const fn default_max_delay_ms() -> u64 {
    5_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Executes `operation` until it succeeds, fails with a non-retryable error,
/// or `max_attempts` is exhausted.
///
/// `should_retry` decides per error whether another attempt is worthwhile.
///
/// # Examples
///
/// ```
/// use std::sync::{
///     Arc,
///     atomic::{AtomicU32, Ordering},
/// };
///
/// use connect_auth::reliability::{RetryPolicy, retry_with_backoff};
///
/// # async fn example() -> Result<String, String> {
/// let policy = RetryPolicy::default();
/// let attempt = Arc::new(AtomicU32::new(0));
///
/// let result = retry_with_backoff(
///     &policy,
///     || {
///         let attempt = Arc::clone(&attempt);
///         async move {
///             let n = attempt.fetch_add(1, Ordering::Relaxed);
///             if n < 2 { Err("temporary failure".to_string()) } else { Ok("success".to_string()) }
///         }
///     },
///     |_| true,
/// )
/// .await?;
///
/// assert_eq!(result, "success");
/// # Ok(result)
/// # }
/// ```
///
/// # Errors
///
/// Returns the last error encountered if all attempts fail, or the first
/// non-retryable error.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let retryable = should_retry(&error);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    retryable,
                    error = %error,
                    "Operation failed"
                );

                if !retryable || attempt + 1 >= max_attempts {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(delay_ms = delay.as_millis(), "Sleeping before retry");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Determines if an error is worth retrying.
///
/// Timeouts, connection failures and 5xx responses are transient; everything
/// else indicates a permanent problem.
///
/// # Examples
///
/// ```
/// use connect_auth::{error::AuthError, reliability::is_retryable};
///
/// assert!(!is_retryable(&AuthError::InvalidSignature));
/// assert!(is_retryable(&AuthError::HostResponse { status: 503, message: String::new() }));
/// assert!(!is_retryable(&AuthError::HostResponse { status: 404, message: String::new() }));
/// ```
#[must_use]
pub fn is_retryable(error: &AuthError) -> bool {
    match error {
        AuthError::HttpError(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        AuthError::HostResponse { status, .. } => (500..600).contains(status),
        _ => false,
    }
}
