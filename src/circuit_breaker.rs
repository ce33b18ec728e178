//! Per-service circuit breaker registry
//!
//! A process-wide map of failure-gating state machines, keyed by a stable
//! service name. Records are created lazily on first use, live for the
//! process lifetime, and are reset only through [`CircuitBreakerRegistry::reset`].
//!
//! Legal transitions: Closed→Open, Open→HalfOpen, HalfOpen→Closed,
//! HalfOpen→Open. Every transition emits a structured tracing event.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{GatewayError, Result};

/// State of one service's circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Per-service record. Owned exclusively by the registry.
#[derive(Debug, Clone, Default)]
pub struct CircuitRecord {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
    pub half_open_successes: u32,
}

/// Registry of circuit breakers, shared across all in-flight calls.
///
/// Cloning is cheap and all clones share the same records. State mutation
/// happens under a short-lived lock that is never held across an await;
/// two concurrent failures may each increment the counter independently,
/// which converges to Open and is accepted. Calls arriving while a
/// half-open probe is in flight may also be admitted as trials — the
/// registry does not serialize trials to exactly one.
///
/// Breaker state is per-process: multiple instances of the application trip
/// independently.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    records: Arc<Mutex<HashMap<String, CircuitRecord>>>,
    default_config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(default_config: CircuitBreakerConfig) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            default_config,
        }
    }

    /// Run `op` through the breaker for `name` with the registry's default
    /// config.
    pub async fn execute<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self.default_config;
        self.execute_with(name, &config, op).await
    }

    /// Run `op` through the breaker for `name`.
    ///
    /// When the circuit is open and the reset timeout has not elapsed, the
    /// call fails immediately with [`GatewayError::CircuitOpen`] and `op` is
    /// never invoked. All failures, including the open-circuit error,
    /// propagate to the caller unmodified.
    pub async fn execute_with<T, F, Fut>(
        &self,
        name: &str,
        config: &CircuitBreakerConfig,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit(name, config)?;
        match op().await {
            Ok(value) => {
                self.on_success(name);
                Ok(value)
            }
            Err(error) => {
                self.on_failure(name, config);
                Err(error)
            }
        }
    }

    /// Current state for `name`, if a record exists.
    pub fn state(&self, name: &str) -> Option<CircuitState> {
        self.lock().get(name).map(|r| r.state)
    }

    /// Snapshot of the record for `name`, if one exists.
    pub fn record(&self, name: &str) -> Option<CircuitRecord> {
        self.lock().get(name).cloned()
    }

    /// Administrative reset: return `name` to Closed with zero failures.
    /// The only way a record is ever cleared.
    pub fn reset(&self, name: &str) {
        let mut records = self.lock();
        if let Some(record) = records.get_mut(name) {
            *record = CircuitRecord::default();
            info!(service = name, "circuit breaker reset");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CircuitRecord>> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Gate a call. Ok means the operation may run (Closed, HalfOpen, or
    /// freshly admitted as a half-open trial).
    fn admit(&self, name: &str, config: &CircuitBreakerConfig) -> Result<()> {
        let mut records = self.lock();
        let record = records.entry(name.to_string()).or_default();
        match record.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let since_last_failure = record
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(config.timeout);
                if since_last_failure >= config.timeout {
                    record.state = CircuitState::HalfOpen;
                    record.half_open_successes = 0;
                    debug!(service = name, "circuit half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(GatewayError::CircuitOpen {
                        service: name.to_string(),
                        failures: record.consecutive_failures,
                        since_last_failure,
                    })
                }
            }
        }
    }

    fn on_success(&self, name: &str) {
        let mut records = self.lock();
        let record = records.entry(name.to_string()).or_default();
        record.consecutive_failures = 0;
        if record.state == CircuitState::HalfOpen {
            record.half_open_successes += 1;
            record.state = CircuitState::Closed;
            info!(service = name, "circuit closed after successful trial");
        }
    }

    fn on_failure(&self, name: &str, config: &CircuitBreakerConfig) {
        let mut records = self.lock();
        let record = records.entry(name.to_string()).or_default();
        record.consecutive_failures += 1;
        record.last_failure = Some(Instant::now());
        match record.state {
            CircuitState::HalfOpen => {
                record.state = CircuitState::Open;
                warn!(
                    service = name,
                    failures = record.consecutive_failures,
                    "circuit reopened after failed trial"
                );
            }
            CircuitState::Closed if record.consecutive_failures >= config.failure_threshold => {
                record.state = CircuitState::Open;
                warn!(
                    service = name,
                    failures = record.consecutive_failures,
                    "circuit opened"
                );
            }
            _ => {}
        }
    }
}
