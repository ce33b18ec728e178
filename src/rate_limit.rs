//! Sliding-window rate limiting
//!
//! Admission control over the trailing `window`, not calendar buckets. The
//! per-identifier window step (drop stale timestamps, count, conditionally
//! append) runs atomically inside the backing store; the limiter adds
//! multi-identifier combination, tier plumbing and the fail-open policy.
//!
//! Fail-open is deliberate: this limiter protects capacity, not security,
//! so an unreachable store degrades to allowing traffic rather than
//! refusing all of it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::RateLimitTier;
use crate::error::Result;

/// Extra time an identifier's window entry is kept beyond the window itself
const ENTRY_TTL_SLACK: Duration = Duration::from_secs(1);

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Admissions left in the window after this check
    pub remaining: u32,
    /// Time until the most restrictive window fully resets
    pub reset_after: Duration,
}

impl RateLimitDecision {
    fn open(limit: u32, window: Duration) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            reset_after: window,
        }
    }
}

/// One identifier to evaluate in a combined check
#[derive(Debug, Clone)]
pub struct RateLimitKey {
    pub identifier: String,
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitKey {
    pub fn new(identifier: impl Into<String>, limit: u32, window: Duration) -> Self {
        Self {
            identifier: identifier.into(),
            limit,
            window,
        }
    }

    pub fn for_tier(identifier: impl Into<String>, tier: RateLimitTier) -> Self {
        Self::new(identifier, tier.limit, tier.window)
    }
}

/// Backing store performing the atomic per-identifier sliding-window step.
///
/// Implementations must, under one per-identifier critical section: drop
/// timestamps older than `now - window`, count survivors, append the new
/// admission when under `limit`, and refresh the entry's own expiry to
/// `window + 1s` regardless of outcome.
#[async_trait]
pub trait RateStore: Send + Sync {
    async fn admit(&self, identifier: &str, limit: u32, window: Duration)
        -> Result<RateLimitDecision>;
}

#[derive(Debug)]
struct WindowEntry {
    admissions: VecDeque<Instant>,
    expires_at: Instant,
}

/// In-process [`RateStore`]. Stands in for the external store in tests and
/// single-instance deployments; entries expire on their own, no manual
/// cleanup.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live identifier entries. Expired entries are swept on
    /// every admission, so this is bounded without a reaper task.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, WindowEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn admit(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, entry| entry.expires_at > now);

        let entry = entries
            .entry(identifier.to_string())
            .or_insert_with(|| WindowEntry {
                admissions: VecDeque::new(),
                expires_at: now + window + ENTRY_TTL_SLACK,
            });

        let cutoff = now.checked_sub(window);
        while let Some(oldest) = entry.admissions.front() {
            match cutoff {
                Some(cutoff) if *oldest <= cutoff => {
                    entry.admissions.pop_front();
                }
                _ => break,
            }
        }

        entry.expires_at = now + window + ENTRY_TTL_SLACK;

        let count = entry.admissions.len() as u32;
        let decision = if count < limit {
            entry.admissions.push_back(now);
            RateLimitDecision {
                allowed: true,
                remaining: limit - count - 1,
                reset_after: reset_after(&entry.admissions, window, now),
            }
        } else {
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_after: reset_after(&entry.admissions, window, now),
            }
        };
        Ok(decision)
    }
}

/// Time until the oldest admission in the window falls out of it.
fn reset_after(admissions: &VecDeque<Instant>, window: Duration, now: Instant) -> Duration {
    match admissions.front() {
        Some(oldest) => (*oldest + window).saturating_duration_since(now),
        None => window,
    }
}

/// Sliding-window admission control over a [`RateStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateStore>) -> Self {
        Self { store }
    }

    /// Limiter over the in-process store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Check and record one admission for `identifier`: at most `limit`
    /// within the trailing `window`. A store failure logs a warning and
    /// allows the request.
    pub async fn check_limit(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        match self.store.admit(identifier, limit, window).await {
            Ok(decision) => {
                if !decision.allowed {
                    debug!(
                        identifier,
                        limit,
                        reset_ms = decision.reset_after.as_millis() as u64,
                        "rate limit exceeded"
                    );
                }
                decision
            }
            Err(error) => {
                warn!(identifier, %error, "rate-limit store unreachable, failing open");
                RateLimitDecision::open(limit, window)
            }
        }
    }

    /// Convenience wrapper applying a configured tier to `identifier`.
    pub async fn check_tier(&self, identifier: &str, tier: RateLimitTier) -> RateLimitDecision {
        self.check_limit(identifier, tier.limit, tier.window).await
    }

    /// Evaluate several identifiers independently (e.g. user AND IP).
    /// Overall admission requires every identifier to allow; the returned
    /// remaining and reset reflect the most restrictive one.
    pub async fn check_all(&self, keys: &[RateLimitKey]) -> RateLimitDecision {
        let mut combined = RateLimitDecision {
            allowed: true,
            remaining: u32::MAX,
            reset_after: Duration::ZERO,
        };
        for key in keys {
            let decision = self
                .check_limit(&key.identifier, key.limit, key.window)
                .await;
            combined.allowed &= decision.allowed;
            combined.remaining = combined.remaining.min(decision.remaining);
            combined.reset_after = combined.reset_after.max(decision.reset_after);
        }
        if keys.is_empty() {
            combined.remaining = 0;
        }
        combined
    }
}
