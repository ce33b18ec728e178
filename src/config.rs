//! Configuration for the resilience layer
//!
//! Typed structs loaded once at startup. Every default is a named constant;
//! environment overrides are integers (durations in milliseconds) and fall
//! back to the default when missing or malformed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_CIRCUIT_TIMEOUT_MS: u64 = 60_000;

pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 50_000;

/// Retries the gateway allows per provider call, on top of the initial
/// attempt. Tighter than the integration-client default: a chat user is
/// still waiting.
pub const DEFAULT_PROVIDER_MAX_RETRIES: usize = 2;

pub const DEFAULT_USER_LIMIT: u32 = 100;
pub const DEFAULT_USER_AI_LIMIT: u32 = 20;
pub const DEFAULT_USER_EXPORT_LIMIT: u32 = 10;
pub const DEFAULT_IP_PUBLIC_LIMIT: u32 = 30;

pub const USER_WINDOW: Duration = Duration::from_secs(60);
pub const USER_AI_WINDOW: Duration = Duration::from_secs(60);
pub const USER_EXPORT_WINDOW: Duration = Duration::from_secs(300);
pub const IP_PUBLIC_WINDOW: Duration = Duration::from_secs(60);

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|m: &f64| m.is_finite() && *m >= 1.0)
        .unwrap_or(default)
}

/// Backoff retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt
    pub max_retries: usize,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Cap applied to every computed delay
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RetryConfig {
    /// Load from `RETRY_MAX_RETRIES`, `RETRY_INITIAL_DELAY`,
    /// `RETRY_MAX_DELAY` (milliseconds) and `RETRY_MULTIPLIER`.
    pub fn from_env() -> Self {
        Self {
            max_retries: env_u64("RETRY_MAX_RETRIES", DEFAULT_MAX_RETRIES as u64) as usize,
            initial_delay: Duration::from_millis(env_u64(
                "RETRY_INITIAL_DELAY",
                DEFAULT_INITIAL_DELAY_MS,
            )),
            max_delay: Duration::from_millis(env_u64("RETRY_MAX_DELAY", DEFAULT_MAX_DELAY_MS)),
            multiplier: env_f64("RETRY_MULTIPLIER", DEFAULT_MULTIPLIER),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Time the circuit stays open before a half-open probe is allowed
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            timeout: Duration::from_millis(DEFAULT_CIRCUIT_TIMEOUT_MS),
        }
    }
}

impl CircuitBreakerConfig {
    /// Load from `CIRCUIT_BREAKER_FAILURE_THRESHOLD` and
    /// `CIRCUIT_BREAKER_TIMEOUT` (milliseconds).
    pub fn from_env() -> Self {
        Self {
            failure_threshold: env_u32(
                "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                DEFAULT_FAILURE_THRESHOLD,
            ),
            timeout: Duration::from_millis(env_u64(
                "CIRCUIT_BREAKER_TIMEOUT",
                DEFAULT_CIRCUIT_TIMEOUT_MS,
            )),
        }
    }
}

/// One rate-limit tier: at most `limit` admissions per trailing `window`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitTier {
    pub limit: u32,
    pub window: Duration,
}

/// The product's rate-limit tiers. Env overrides set the limit; windows are
/// fixed per tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitTiers {
    pub user_default: RateLimitTier,
    pub user_ai: RateLimitTier,
    pub user_export: RateLimitTier,
    pub ip_public: RateLimitTier,
}

impl Default for RateLimitTiers {
    fn default() -> Self {
        Self {
            user_default: RateLimitTier {
                limit: DEFAULT_USER_LIMIT,
                window: USER_WINDOW,
            },
            user_ai: RateLimitTier {
                limit: DEFAULT_USER_AI_LIMIT,
                window: USER_AI_WINDOW,
            },
            user_export: RateLimitTier {
                limit: DEFAULT_USER_EXPORT_LIMIT,
                window: USER_EXPORT_WINDOW,
            },
            ip_public: RateLimitTier {
                limit: DEFAULT_IP_PUBLIC_LIMIT,
                window: IP_PUBLIC_WINDOW,
            },
        }
    }
}

impl RateLimitTiers {
    /// Load from `RATE_LIMIT_USER_DEFAULT`, `RATE_LIMIT_USER_AI`,
    /// `RATE_LIMIT_USER_EXPORT` and `RATE_LIMIT_IP_PUBLIC`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            user_default: RateLimitTier {
                limit: env_u32("RATE_LIMIT_USER_DEFAULT", DEFAULT_USER_LIMIT),
                window: defaults.user_default.window,
            },
            user_ai: RateLimitTier {
                limit: env_u32("RATE_LIMIT_USER_AI", DEFAULT_USER_AI_LIMIT),
                window: defaults.user_ai.window,
            },
            user_export: RateLimitTier {
                limit: env_u32("RATE_LIMIT_USER_EXPORT", DEFAULT_USER_EXPORT_LIMIT),
                window: defaults.user_export.window,
            },
            ip_public: RateLimitTier {
                limit: env_u32("RATE_LIMIT_IP_PUBLIC", DEFAULT_IP_PUBLIC_LIMIT),
                window: defaults.ip_public.window,
            },
        }
    }
}

/// Gateway configuration: provider credentials and the hard per-attempt
/// deadline.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Provider API key. Absence is fatal, never retried.
    pub api_key: String,

    /// Hard deadline for one provider attempt
    pub provider_timeout: Duration,

    /// Retry settings for provider calls
    pub retry: RetryConfig,

    /// Breaker settings for the provider circuit
    pub circuit_breaker: CircuitBreakerConfig,
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            provider_timeout: Duration::from_millis(DEFAULT_PROVIDER_TIMEOUT_MS),
            retry: RetryConfig {
                max_retries: DEFAULT_PROVIDER_MAX_RETRIES,
                ..RetryConfig::default()
            },
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    /// Load from the environment. Fails with a configuration error when
    /// `OPENAI_API_KEY` is missing or empty.
    ///
    /// The `RETRY_*` variables set the backoff shape; the retry count stays
    /// at the gateway's own default.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GatewayError::config("OPENAI_API_KEY is not set"))?;

        Ok(Self {
            api_key,
            provider_timeout: Duration::from_millis(DEFAULT_PROVIDER_TIMEOUT_MS),
            retry: RetryConfig {
                max_retries: DEFAULT_PROVIDER_MAX_RETRIES,
                ..RetryConfig::from_env()
            },
            circuit_breaker: CircuitBreakerConfig::from_env(),
        })
    }
}
