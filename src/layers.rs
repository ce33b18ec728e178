//! Tower middleware for integration clients
//!
//! CRM and calendar sync clients compose their HTTP services with the same
//! resilience contract the gateway uses internally:
//! `CircuitBreakerLayer` gates calls through a shared
//! [`CircuitBreakerRegistry`] under one stable service name per logical
//! dependency, and `RetryLayer` applies the backoff executor. Failures
//! propagate unmodified through both.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tower::{Layer, Service, ServiceExt};

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::CircuitBreakerConfig;
use crate::error::GatewayError;
use crate::retry::{retry, RetryOptions};

// ===== Retry =====

/// Layer applying [`retry`] semantics to an inner service.
#[derive(Debug, Clone)]
pub struct RetryLayer {
    options: RetryOptions,
}

impl RetryLayer {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }
}

pub struct Retry<S> {
    inner: Arc<tokio::sync::Mutex<S>>,
    options: RetryOptions,
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner: Arc::new(tokio::sync::Mutex::new(inner)),
            options: self.options.clone(),
        }
    }
}

impl<S, Req> Service<Req> for Retry<S>
where
    // The retry closure holds the request across attempts while the boxed
    // future is Send, so the request must also be Sync.
    Req: Clone + Send + Sync + 'static,
    S: Service<Req, Error = GatewayError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = GatewayError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let inner = self.inner.clone();
        let options = self.options.clone();
        Box::pin(async move {
            retry(
                || {
                    let inner = inner.clone();
                    let req = req.clone();
                    async move {
                        let mut guard = inner.lock().await;
                        ServiceExt::ready(&mut *guard).await?.call(req).await
                    }
                },
                &options,
            )
            .await
        })
    }
}

// ===== Circuit breaker =====

/// Layer gating an inner service through a shared breaker registry.
#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    registry: CircuitBreakerRegistry,
    service_name: String,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerLayer {
    pub fn new(
        registry: CircuitBreakerRegistry,
        service_name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            registry,
            service_name: service_name.into(),
            config,
        }
    }
}

pub struct CircuitBreak<S> {
    inner: S,
    registry: CircuitBreakerRegistry,
    service_name: String,
    config: CircuitBreakerConfig,
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreak<S>;
    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreak {
            inner,
            registry: self.registry.clone(),
            service_name: self.service_name.clone(),
            config: self.config,
        }
    }
}

impl<S, Req> Service<Req> for CircuitBreak<S>
where
    S: Service<Req, Error = GatewayError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = GatewayError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // The inner future is created eagerly but stays lazy; when the
        // circuit is open it is dropped unpolled and no call goes out.
        let fut = self.inner.call(req);
        let registry = self.registry.clone();
        let service_name = self.service_name.clone();
        let config = self.config;
        Box::pin(async move {
            registry
                .execute_with(&service_name, &config, move || fut)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::service_fn;

    fn fast_retry(max_retries: usize) -> RetryOptions {
        RetryOptions::default()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn retry_layer_eventually_succeeds() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_cl = count.clone();
        let svc = service_fn(move |()| {
            let count = count_cl.clone();
            async move {
                if count.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GatewayError::provider(503, "flaky"))
                } else {
                    Ok("done")
                }
            }
        });

        let mut svc = RetryLayer::new(fast_retry(5)).layer(svc);
        let out = ServiceExt::ready(&mut svc)
            .await
            .unwrap()
            .call(())
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_layer_replays_owned_request_payload() {
        // A real request body (not `()`) must be re-sent on every attempt.
        let count = Arc::new(AtomicUsize::new(0));
        let count_cl = count.clone();
        let svc = service_fn(move |req: String| {
            let count = count_cl.clone();
            async move {
                if count.fetch_add(1, Ordering::SeqCst) < 1 {
                    Err(GatewayError::provider(503, "flaky"))
                } else {
                    Ok(req)
                }
            }
        });

        let mut svc = RetryLayer::new(fast_retry(3)).layer(svc);
        let out = ServiceExt::ready(&mut svc)
            .await
            .unwrap()
            .call("sync accounts".to_string())
            .await
            .unwrap();
        assert_eq!(out, "sync accounts");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_layer_respects_idempotency() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_cl = count.clone();
        let svc = service_fn(move |()| {
            let count = count_cl.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GatewayError::Timeout)
            }
        });

        let mut svc = RetryLayer::new(fast_retry(5).idempotent(false)).layer(svc);
        let out = ServiceExt::ready(&mut svc).await.unwrap().call(()).await;
        assert!(out.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn breaker_layer_short_circuits() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_cl = count.clone();
        let svc = service_fn(move |()| {
            let count = count_cl.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GatewayError::provider(502, "bad gateway"))
            }
        });

        let registry = CircuitBreakerRegistry::new();
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            timeout: Duration::from_secs(60),
        };
        let mut svc =
            CircuitBreakerLayer::new(registry.clone(), "crm-sync", config).layer(svc);

        for _ in 0..2 {
            let _ = ServiceExt::ready(&mut svc).await.unwrap().call(()).await;
        }
        assert_eq!(registry.state("crm-sync"), Some(CircuitState::Open));

        let result = ServiceExt::ready(&mut svc).await.unwrap().call(()).await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn layers_compose_breaker_over_retry() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_cl = count.clone();
        let svc = service_fn(move |()| {
            let count = count_cl.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GatewayError::provider(503, "down"))
            }
        });

        let registry = CircuitBreakerRegistry::new();
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_secs(60),
        };
        let retried = RetryLayer::new(fast_retry(2)).layer(svc);
        let mut svc =
            CircuitBreakerLayer::new(registry.clone(), "calendar-sync", config).layer(retried);

        // One outer call burns three attempts, then the breaker opens on
        // the single recorded failure.
        let _ = ServiceExt::ready(&mut svc).await.unwrap().call(()).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(registry.state("calendar-sync"), Some(CircuitState::Open));

        let _ = ServiceExt::ready(&mut svc).await.unwrap().call(()).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
