//! AI gateway: task-classified routing with resilience
//!
//! Composes the classifier, the static model table, the circuit breaker and
//! the retry executor around a chat-completion provider. Every provider
//! attempt runs under its own hard deadline; exceeding it cancels the
//! in-flight call and surfaces as a retryable timeout.
//!
//! Breaker state is per-process. Multiple instances of the application trip
//! independently; that is a scalability boundary of this layer, not a
//! defect.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::classify::{classify, model_config, system_prompt, TaskType};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::items::Message;
use crate::provider::{ChatProvider, OpenAIProvider};
use crate::retry::{retry, RetryOptions};

/// Per-call routing options
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Domain context injected as a system block (e.g. the deal under
    /// discussion)
    pub deal_context: Option<String>,
}

impl RouteOptions {
    pub fn with_deal_context(context: impl Into<String>) -> Self {
        Self {
            deal_context: Some(context.into()),
        }
    }
}

/// Routed chat gateway over a [`ChatProvider`]
pub struct AIGateway {
    provider: Arc<dyn ChatProvider>,
    breakers: CircuitBreakerRegistry,
    config: GatewayConfig,
}

impl AIGateway {
    /// Gateway with its own breaker registry.
    pub fn new(provider: Arc<dyn ChatProvider>, config: GatewayConfig) -> Self {
        let breakers = CircuitBreakerRegistry::with_config(config.circuit_breaker);
        Self::with_registry(provider, config, breakers)
    }

    /// Gateway sharing a breaker registry with other clients of the same
    /// dependencies.
    pub fn with_registry(
        provider: Arc<dyn ChatProvider>,
        config: GatewayConfig,
        breakers: CircuitBreakerRegistry,
    ) -> Self {
        Self {
            provider,
            breakers,
            config,
        }
    }

    /// OpenAI-backed gateway from the environment. Fails immediately when
    /// the API key is missing.
    pub fn from_env() -> Result<Self> {
        let config = GatewayConfig::from_env()?;
        let provider = Arc::new(OpenAIProvider::new(config.api_key.clone()));
        Ok(Self::new(provider, config))
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Classify `raw_query`, select the model, and run the conversation
    /// through breaker → retry → deadline → provider.
    ///
    /// Returns the assistant text. Errors propagate with their root cause
    /// intact; callers map them to transport codes via
    /// [`GatewayError::user_message`] and friends.
    pub async fn route(
        &self,
        conversation: &[Message],
        raw_query: &str,
        options: &RouteOptions,
    ) -> Result<String> {
        let task = classify(raw_query);
        let model = model_config(task);
        debug!(task = ?task, model = model.model, "routing query");

        let messages = self.assemble(task, conversation, options);
        let retry_options: RetryOptions = self.config.retry.clone().into();
        let deadline = self.config.provider_timeout;
        let service = self.provider.name().to_string();

        let result = self
            .breakers
            .execute_with(&service, &self.config.circuit_breaker, || {
                retry(
                    || {
                        let provider = Arc::clone(&self.provider);
                        let messages = messages.clone();
                        async move {
                            match tokio::time::timeout(
                                deadline,
                                provider.chat(&messages, &model),
                            )
                            .await
                            {
                                Ok(outcome) => outcome,
                                Err(_) => Err(GatewayError::Timeout),
                            }
                        }
                    },
                    &retry_options,
                )
            })
            .await;

        match result {
            Ok(response) => {
                // Trait impls are not trusted to enforce the non-empty
                // guarantee themselves.
                let content = response
                    .content
                    .filter(|text| !text.trim().is_empty())
                    .ok_or(GatewayError::EmptyResponse)?;
                info!(
                    task = ?task,
                    model = response.model,
                    prompt_tokens = response.prompt_tokens,
                    completion_tokens = response.completion_tokens,
                    "chat completion served"
                );
                Ok(content)
            }
            Err(err) => {
                error!(service, task = ?task, %err, "chat completion failed");
                Err(err)
            }
        }
    }

    /// System prompt, optional deal-context block, then the supplied
    /// conversation, in that order.
    fn assemble(
        &self,
        task: TaskType,
        conversation: &[Message],
        options: &RouteOptions,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(conversation.len() + 2);
        if let Some(prompt) = system_prompt(task) {
            messages.push(Message::system(prompt));
        }
        if let Some(context) = &options.deal_context {
            messages.push(Message::system(format!("Deal context:\n{context}")));
        }
        messages.extend_from_slice(conversation);
        messages
    }
}
