//! Error types for the resilience layer
//!
//! One taxonomy shared by the circuit breaker, retry executor, rate limiter
//! and gateway. Nothing here is ever swallowed: errors propagate as-is and
//! only the gateway boundary maps them to user-safe text.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for the resilience layer
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the resilience layer
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The circuit for a dependency is open; the call was never attempted
    #[error("circuit open for '{service}' after {failures} failures (last failure {since_last_failure:?} ago)")]
    CircuitOpen {
        service: String,
        failures: u32,
        since_last_failure: Duration,
    },

    /// A deadline elapsed and the in-flight call was cancelled
    #[error("operation timed out")]
    Timeout,

    /// Upstream provider failure carrying an HTTP-like status
    #[error("provider error (status {status}): {message}")]
    Provider { status: u16, message: String },

    /// Connectivity failure before any status was received
    #[error("network error: {message}")]
    Network { message: String },

    /// Refused by the sliding-window rate limiter
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Syntactically valid provider response with no usable content
    #[error("provider returned an empty response")]
    EmptyResponse,

    /// Validation / auth / not-found class; never retried
    #[error("invalid request: {message}")]
    InvalidInput { message: String },

    /// Missing or broken configuration; fatal, never retried
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Rate-limit backing store failure (handled fail-open by the limiter)
    #[error("rate-limit store error: {message}")]
    Store { message: String },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn config(message: impl Into<String>) -> Self {
        GatewayError::Config {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        GatewayError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        GatewayError::Network {
            message: message.into(),
        }
    }

    pub fn provider(status: u16, message: impl Into<String>) -> Self {
        GatewayError::Provider {
            status,
            message: message.into(),
        }
    }

    /// HTTP-like status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// User-safe message for the gateway boundary. Never leaks upstream
    /// internals.
    pub fn user_message(&self) -> &'static str {
        match self {
            GatewayError::Provider { status: 429, .. } | GatewayError::RateLimited { .. } => {
                "The assistant is handling a lot of requests right now. Please try again in a moment."
            }
            GatewayError::Timeout => "That request took too long. Please try again.",
            GatewayError::Config { .. } => "The assistant is not configured correctly.",
            GatewayError::InvalidInput { .. } => "That request could not be processed.",
            _ => "The assistant is temporarily unavailable. Please try again shortly.",
        }
    }
}

/// Determine if an error is retryable.
///
/// Transient conditions only: timeouts, connectivity failures, and upstream
/// statuses that signal overload or a temporary outage. Validation, auth and
/// configuration failures propagate on first occurrence.
pub fn is_retryable(error: &GatewayError) -> bool {
    match error {
        GatewayError::Timeout => true,
        GatewayError::Network { .. } => true,
        GatewayError::Io(_) => true,
        GatewayError::Provider { status, .. } => matches!(status, 429 | 502 | 503 | 504),
        _ => false,
    }
}
