//! Reply drafting through an LLM.
//!
//! Supports:
//! - **Gemini** (`google`): the default backend
//! - **Anthropic**
//! - **OpenAI**
//!
//! All three go through rig-core agents. The persona becomes the reply
//! agent's preamble; a second agent writes the optional log summary.

pub mod prompts;

use std::sync::Arc;

use async_trait::async_trait;
use rig::agent::Agent;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Prompt};
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;
use crate::pipeline::types::Message;

const REPLY_MAX_TOKENS: u64 = 1024;
const SUMMARY_MAX_TOKENS: u64 = 256;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Gemini,
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    /// Provider label used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            LlmBackend::Gemini => "google",
            LlmBackend::Anthropic => "anthropic",
            LlmBackend::OpenAi => "openai",
        }
    }

    /// Environment variable consulted when the config has no API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmBackend::Gemini => "GEMINI_API_KEY",
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
            LlmBackend::OpenAi => "OPENAI_API_KEY",
        }
    }
}

/// Configuration for creating a response generator.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    pub temperature: Option<f64>,
}

/// Drafts replies and interaction summaries.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Draft a reply body for `message`.
    async fn generate_reply(&self, message: &Message) -> Result<String, LlmError>;

    /// Summarize the exchange for the interaction log.
    async fn summarize(&self, message: &Message, reply_text: &str) -> Result<String, LlmError>;
}

/// [`ResponseGenerator`] backed by two rig agents over the same model.
pub struct RigGenerator<M: CompletionModel> {
    provider: &'static str,
    reply_agent: Agent<M>,
    summary_agent: Agent<M>,
}

impl<M: CompletionModel + 'static> RigGenerator<M> {
    fn new<C>(client: &C, config: &LlmConfig, persona: &str) -> Self
    where
        C: CompletionClient<CompletionModel = M>,
    {
        let mut reply = client
            .agent(&config.model)
            .preamble(&prompts::reply_preamble(persona))
            .max_tokens(REPLY_MAX_TOKENS);
        let mut summary = client
            .agent(&config.model)
            .preamble(prompts::SUMMARY_PREAMBLE)
            .max_tokens(SUMMARY_MAX_TOKENS);
        if let Some(t) = config.temperature {
            reply = reply.temperature(t);
            summary = summary.temperature(t);
        }

        Self {
            provider: config.backend.name(),
            reply_agent: reply.build(),
            summary_agent: summary.build(),
        }
    }

    async fn complete(&self, agent: &Agent<M>, prompt: String) -> Result<String, LlmError> {
        let text = agent
            .prompt(prompt)
            .await
            .map_err(|e| classify_error(self.provider, &e.to_string()))?;
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: self.provider.to_string(),
            });
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl<M: CompletionModel + 'static> ResponseGenerator for RigGenerator<M> {
    async fn generate_reply(&self, message: &Message) -> Result<String, LlmError> {
        let reply = self
            .complete(&self.reply_agent, prompts::reply_prompt(message))
            .await?;
        tracing::debug!(message_id = %message.id, chars = reply.len(), "Reply drafted");
        Ok(reply)
    }

    async fn summarize(&self, message: &Message, reply_text: &str) -> Result<String, LlmError> {
        self.complete(&self.summary_agent, prompts::summary_prompt(message, reply_text))
            .await
    }
}

/// Create the configured generator.
pub fn create_generator(
    config: &LlmConfig,
    persona: &str,
) -> Result<Arc<dyn ResponseGenerator>, LlmError> {
    let key = config.api_key.expose_secret();
    let client_error = |e: &dyn std::fmt::Display| LlmError::RequestFailed {
        provider: config.backend.name().to_string(),
        reason: format!("Failed to create client: {e}"),
    };

    let generator: Arc<dyn ResponseGenerator> = match config.backend {
        LlmBackend::Gemini => {
            use rig::providers::gemini;
            let client: rig::client::Client<gemini::client::GeminiExt> =
                gemini::Client::new(key).map_err(|e| client_error(&e))?;
            Arc::new(RigGenerator::new(&client, config, persona))
        }
        LlmBackend::Anthropic => {
            use rig::providers::anthropic;
            let client: rig::client::Client<anthropic::client::AnthropicExt> =
                anthropic::Client::new(key).map_err(|e| client_error(&e))?;
            Arc::new(RigGenerator::new(&client, config, persona))
        }
        LlmBackend::OpenAi => {
            use rig::providers::openai;
            let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                openai::Client::new(key).map_err(|e| client_error(&e))?;
            Arc::new(RigGenerator::new(&client, config, persona))
        }
    };

    tracing::info!(
        provider = config.backend.name(),
        model = %config.model,
        "Response generator ready"
    );
    Ok(generator)
}

/// Map a provider error message onto the error taxonomy.
fn classify_error(provider: &str, reason: &str) -> LlmError {
    let lower = reason.to_lowercase();
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("invalid api key")
        || lower.contains("invalid x-api-key")
        || lower.contains("api_key_invalid")
        || lower.contains("incorrect api key")
    {
        LlmError::AuthFailed {
            provider: provider.to_string(),
        }
    } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("resource_exhausted") {
        LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }
}
