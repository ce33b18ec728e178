//! Cross-module resilience behavior, exercised the way integration clients
//! consume the crate: one stable service name per logical dependency,
//! breaker wrapping a retried call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dealflow_resilience::{
    retry, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, GatewayError,
    RateLimitKey, RateLimitTiers, RateLimiter, Result, RetryOptions,
};
use tokio::time::sleep;

/// Route retry/breaker events through the test harness; `RUST_LOG` selects
/// verbosity. Safe to call from every test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_retry(max_retries: usize) -> RetryOptions {
    RetryOptions::default()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
}

/// Simulated CRM sync call failing `failures` times before succeeding.
fn flaky_call(
    counter: Arc<AtomicUsize>,
    failures: usize,
) -> impl FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<&'static str>> + Send>>
{
    move || {
        let counter = counter.clone();
        Box::pin(async move {
            if counter.fetch_add(1, Ordering::SeqCst) < failures {
                Err(GatewayError::provider(503, "upstream unavailable"))
            } else {
                Ok("synced")
            }
        })
    }
}

#[tokio::test]
async fn breaker_wraps_retried_integration_call() {
    init_tracing();
    let registry = CircuitBreakerRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut call = flaky_call(counter.clone(), 2);
    let options = fast_retry(3);
    let result = registry
        .execute("crm", || retry(&mut call, &options))
        .await
        .unwrap();

    assert_eq!(result, "synced");
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(registry.state("crm"), Some(CircuitState::Closed));
}

#[tokio::test]
async fn exhausted_retries_count_one_breaker_failure() {
    init_tracing();
    let registry = CircuitBreakerRegistry::with_config(CircuitBreakerConfig {
        failure_threshold: 2,
        timeout: Duration::from_millis(40),
    });
    let options = fast_retry(1);

    for _ in 0..2 {
        let result: Result<()> = registry
            .execute("calendar", || {
                retry(
                    || async { Err(GatewayError::provider(504, "gateway timeout")) },
                    &options,
                )
            })
            .await;
        assert!(matches!(result, Err(GatewayError::Provider { .. })));
    }
    assert_eq!(registry.state("calendar"), Some(CircuitState::Open));

    // While open, neither the retry executor nor the call itself runs.
    let counter = Arc::new(AtomicUsize::new(0));
    let mut probe = flaky_call(counter.clone(), 0);
    let result = registry
        .execute("calendar", || retry(&mut probe, &options))
        .await;
    assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    // After the breaker timeout the trial goes through and recovery closes
    // the circuit.
    sleep(Duration::from_millis(50)).await;
    let result = registry
        .execute("calendar", || retry(&mut probe, &options))
        .await
        .unwrap();
    assert_eq!(result, "synced");
    assert_eq!(registry.state("calendar"), Some(CircuitState::Closed));
}

#[tokio::test]
async fn non_idempotent_calendar_write_is_not_retried() {
    init_tracing();
    let registry = CircuitBreakerRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_cl = counter.clone();

    // Creating a calendar event is not safe to repeat.
    let options = fast_retry(5).idempotent(false);
    let result: Result<()> = registry
        .execute("calendar", || {
            retry(
                || {
                    let counter = counter_cl.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(GatewayError::Timeout)
                    }
                },
                &options,
            )
        })
        .await;

    assert!(matches!(result, Err(GatewayError::Timeout)));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn chat_endpoint_combines_user_and_ip_limits() {
    init_tracing();
    let limiter = RateLimiter::in_memory();
    let tiers = RateLimitTiers::default();

    // The AI tier is the tight one for a chat user.
    let keys = [
        RateLimitKey::for_tier("user:42:ai", tiers.user_ai),
        RateLimitKey::for_tier("ip:203.0.113.9", tiers.ip_public),
    ];

    let mut last_remaining = u32::MAX;
    for _ in 0..tiers.user_ai.limit {
        let decision = limiter.check_all(&keys).await;
        assert!(decision.allowed);
        assert!(decision.remaining < last_remaining);
        last_remaining = decision.remaining;
    }

    let decision = limiter.check_all(&keys).await;
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
    // Callers turn this into a Retry-After header.
    assert!(decision.reset_after > Duration::ZERO);
    assert!(decision.reset_after <= tiers.user_ai.window);
}

#[tokio::test]
async fn rate_limited_identifier_recovers_after_window() {
    init_tracing();
    let limiter = RateLimiter::in_memory();
    let window = Duration::from_millis(40);

    assert!(limiter.check_limit("user:9:export", 1, window).await.allowed);
    assert!(!limiter.check_limit("user:9:export", 1, window).await.allowed);

    sleep(Duration::from_millis(50)).await;
    assert!(limiter.check_limit("user:9:export", 1, window).await.allowed);
}

#[tokio::test]
async fn services_trip_independently_under_shared_registry() {
    init_tracing();
    let registry = CircuitBreakerRegistry::with_config(CircuitBreakerConfig {
        failure_threshold: 1,
        timeout: Duration::from_secs(60),
    });

    let result: Result<()> = registry
        .execute("crm", || async {
            Err(GatewayError::network("connection reset"))
        })
        .await;
    assert!(result.is_err());
    assert_eq!(registry.state("crm"), Some(CircuitState::Open));

    // The calendar dependency is unaffected.
    registry
        .execute("calendar", || async { Ok::<_, GatewayError>(()) })
        .await
        .unwrap();
    assert_eq!(registry.state("calendar"), Some(CircuitState::Closed));
}
