//! Chat-completion provider abstraction
//!
//! Wraps async-openai behind a trait so the gateway and tests are decoupled
//! from the network client. Provider failures are mapped into the crate's
//! error taxonomy here, at the seam, so the retry executor and circuit
//! breaker never see raw client errors.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

use crate::classify::ModelConfig;
use crate::error::{GatewayError, Result};
use crate::items::{ChatResponse, Message, Role};

/// Trait for chat-completion providers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run one completion with the given model selection.
    async fn chat(&self, messages: &[Message], config: &ModelConfig) -> Result<ChatResponse>;

    /// Stable name used as the circuit-breaker service key.
    fn name(&self) -> &str;
}

/// OpenAI provider using async-openai
pub struct OpenAIProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(OpenAIConfig::new().with_api_key(api_key.into())),
        }
    }

    pub fn with_client(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }

    fn convert_message(msg: &Message) -> Result<ChatCompletionRequestMessage> {
        let converted = match msg.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content.clone())
                .build()
                .map_err(map_openai_error)?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.clone())
                .build()
                .map_err(map_openai_error)?
                .into(),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(msg.content.clone())
                .build()
                .map_err(map_openai_error)?
                .into(),
        };
        Ok(converted)
    }
}

/// Map async-openai failures into the crate taxonomy.
///
/// The client does not surface numeric statuses uniformly, so API errors
/// are classified from their message text: auth failures become fatal
/// configuration errors, quota and rate-limit failures become 429s, the
/// rest a generic upstream status.
fn map_openai_error(error: OpenAIError) -> GatewayError {
    match error {
        OpenAIError::ApiError(api) => {
            let text = api.message.to_lowercase();
            if text.contains("api key") || text.contains("authentication") {
                GatewayError::config(api.message)
            } else if text.contains("rate limit") || text.contains("quota") {
                GatewayError::provider(429, api.message)
            } else if text.contains("overloaded") || text.contains("server error") {
                GatewayError::provider(503, api.message)
            } else {
                GatewayError::provider(500, api.message)
            }
        }
        OpenAIError::InvalidArgument(message) => GatewayError::invalid_input(message),
        OpenAIError::JSONDeserialize(e) => GatewayError::network(e.to_string()),
        other => GatewayError::network(other.to_string()),
    }
}

#[async_trait]
impl ChatProvider for OpenAIProvider {
    async fn chat(&self, messages: &[Message], config: &ModelConfig) -> Result<ChatResponse> {
        let converted: Vec<ChatCompletionRequestMessage> = messages
            .iter()
            .map(Self::convert_message)
            .collect::<Result<_>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(config.model)
            .temperature(config.temperature)
            .max_tokens(config.max_tokens)
            .messages(converted)
            .build()
            .map_err(map_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|text| !text.trim().is_empty())
            .ok_or(GatewayError::EmptyResponse)?;

        let (prompt_tokens, completion_tokens) = response
            .usage
            .map(|u| (u.prompt_tokens as usize, u.completion_tokens as usize))
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content: Some(content),
            model: response.model,
            prompt_tokens,
            completion_tokens,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Provider that replays a scripted sequence of outcomes, for tests.
///
/// Each call consumes the next scripted result; an exhausted script yields
/// a fixed default response. Requests are recorded for assertions on
/// message assembly and model selection.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ChatResponse>>>,
    seen: Mutex<Vec<(Vec<Message>, ModelConfig)>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.push(Ok(ChatResponse::text(content, "scripted-model")));
        self
    }

    pub fn with_error(self, error: GatewayError) -> Self {
        self.push(Err(error));
        self
    }

    fn push(&self, outcome: Result<ChatResponse>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Number of chat calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in order.
    pub fn seen(&self) -> Vec<(Vec<Message>, ModelConfig)> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn chat(&self, messages: &[Message], config: &ModelConfig) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((messages.to_vec(), *config));

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(outcome) => outcome,
            None => Ok(ChatResponse::text("scripted default", "scripted-model")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
