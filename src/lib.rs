//! # dealflow-resilience
//!
//! Resilience and AI request-routing layer for a sales-pipeline product.
//! Every outbound integration (CRM sync, calendar sync, AI chat) runs its
//! calls through this crate: a per-service circuit breaker, an
//! exponential-backoff retry executor with idempotency awareness, a
//! sliding-window rate limiter, and a task-classified gateway to a
//! chat-completion provider.
//!
//! ## Core pieces
//!
//! - [`CircuitBreakerRegistry`]: keyed failure-gating state machines,
//!   created lazily, reset only administratively
//! - [`retry`] / [`RetryOptions`]: backoff retry that refuses to repeat
//!   non-idempotent operations
//! - [`RateLimiter`]: sliding-window admission control with a fail-open
//!   store policy
//! - [`classify`] + [`AIGateway`]: deterministic query classification,
//!   static model selection, and a provider call wrapped in
//!   breaker → retry → deadline
//! - [`layers`]: Tower middleware exposing the same contracts to
//!   integration clients
//!
//! ## Example
//!
//! ```rust,no_run
//! use dealflow_resilience::{AIGateway, Message, RouteOptions};
//!
//! # async fn example() -> dealflow_resilience::Result<()> {
//! let gateway = AIGateway::from_env()?;
//! let answer = gateway
//!     .route(
//!         &[Message::user("What's the risk on the Acme deal?")],
//!         "What's the risk on the Acme deal?",
//!         &RouteOptions::default(),
//!     )
//!     .await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod classify;
pub mod config;
pub mod error;
pub mod gateway;
pub mod items;
pub mod layers;
pub mod provider;
pub mod rate_limit;
pub mod retry;

pub use circuit_breaker::{CircuitBreakerRegistry, CircuitRecord, CircuitState};
pub use classify::{classify, model_config, system_prompt, ModelConfig, TaskType};
pub use config::{
    CircuitBreakerConfig, GatewayConfig, RateLimitTier, RateLimitTiers, RetryConfig,
};
pub use error::{is_retryable, GatewayError, Result};
pub use gateway::{AIGateway, RouteOptions};
pub use items::{ChatResponse, Message, Role};
pub use layers::{CircuitBreakerLayer, RetryLayer};
pub use provider::{ChatProvider, OpenAIProvider, ScriptedProvider};
pub use rate_limit::{
    MemoryStore, RateLimitDecision, RateLimitKey, RateLimiter, RateStore,
};
pub use retry::{retry, RetryOptions};
