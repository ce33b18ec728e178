//! Retry executor with exponential backoff
//!
//! Retries are gated three ways: attempts remaining, the error judged
//! retryable, and the operation declared idempotent. Non-idempotent
//! operations are never retried, whatever the error — repeating a
//! side-effecting call (creating a calendar event twice) is worse than
//! failing it.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{is_retryable, GatewayError, Result};

/// Options for one retried operation
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of retries after the initial attempt
    pub max_retries: usize,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Cap applied to every computed delay
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub multiplier: f64,

    /// Whether the operation is safe to repeat. `false` disables retry
    /// unconditionally.
    pub is_idempotent: bool,

    /// Add up to 30% random jitter to each delay
    pub jitter: bool,

    /// Custom retryability predicate; defaults to [`is_retryable`]
    pub retry_on: Option<fn(&GatewayError) -> bool>,

    /// Custom delay schedule keyed by 0-based attempt number
    pub delay_fn: Option<fn(usize) -> Duration>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for RetryOptions {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            multiplier: config.multiplier,
            is_idempotent: true,
            jitter: false,
            retry_on: None,
            delay_fn: None,
        }
    }
}

impl RetryOptions {
    /// Options from the `RETRY_*` environment variables.
    pub fn from_env() -> Self {
        RetryConfig::from_env().into()
    }

    pub fn max_retries(mut self, max: usize) -> Self {
        self.max_retries = max;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn idempotent(mut self, is_idempotent: bool) -> Self {
        self.is_idempotent = is_idempotent;
        self
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    pub fn retry_when(mut self, predicate: fn(&GatewayError) -> bool) -> Self {
        self.retry_on = Some(predicate);
        self
    }

    pub fn delay_with(mut self, delay_fn: fn(usize) -> Duration) -> Self {
        self.delay_fn = Some(delay_fn);
        self
    }

    /// Delay before the retry following 0-based `attempt`:
    /// `min(initial_delay * multiplier^attempt, max_delay)`, or the custom
    /// schedule when one is set. Non-decreasing and capped.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if let Some(delay_fn) = self.delay_fn {
            return delay_fn(attempt);
        }
        // Clamp in f64 before constructing the Duration: the uncapped
        // exponential overflows Duration for large attempt numbers.
        let exp = self.multiplier.powi(attempt as i32);
        let secs = (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn should_retry(&self, error: &GatewayError) -> bool {
        match self.retry_on {
            Some(predicate) => predicate(error),
            None => is_retryable(error),
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// The last error is returned unmodified, preserving the root cause for
/// caller-side mapping.
pub async fn retry<T, F, Fut>(mut operation: F, options: &RetryOptions) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: usize = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => {
                if !options.is_idempotent {
                    debug!(%error, "operation is not idempotent, not retrying");
                    return Err(error);
                }
                if !options.should_retry(&error) {
                    debug!(%error, "non-retryable error");
                    return Err(error);
                }
                if attempt >= options.max_retries {
                    warn!(
                        attempts = attempt + 1,
                        max_retries = options.max_retries,
                        %error,
                        "retries exhausted"
                    );
                    return Err(error);
                }

                let mut delay = options.delay_for_attempt(attempt);
                if options.jitter {
                    use rand::Rng;
                    let jitter = rand::thread_rng().gen_range(0.0..0.3);
                    delay += delay.mul_f64(jitter);
                }
                attempt += 1;
                warn!(attempt, delay_ms = delay.as_millis() as u64, %error, "retrying");
                sleep(delay).await;
            }
        }
    }
}
