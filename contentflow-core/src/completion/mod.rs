//! Completion client boundary.
//!
//! The engine consumes exactly one external capability from the language
//! model service: a bounded, synchronous text completion. Everything else
//! (prompt construction, output parsing) belongs to the agent stages.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{CompletionProvider, CompletionSettings};
use crate::error::Result;

pub mod openai;

pub use openai::OpenAiClient;

/// Request to a completion service
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// User prompt
    pub prompt: String,

    /// Optional system prompt
    pub system_prompt: Option<String>,

    /// Sampling temperature (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,
}

impl CompletionRequest {
    /// Create a request from a single prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Attach a system prompt
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// Response from a completion service
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated text
    pub content: String,

    /// Token usage, when the service reports it
    pub usage: Option<TokenUsage>,
}

/// Token usage information
#[derive(Debug, Clone)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

/// Trait for completion service implementations.
///
/// Implementors handle the actual service call. Failures surfaced here are
/// transport or service errors; the engine converts them into terminal
/// `failed` workflow records. No implicit retry is performed.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete a single prompt and return the raw text.
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest::from_prompt(prompt);
        let response = self.complete_request(&request).await?;
        Ok(response.content)
    }

    /// Complete a structured request.
    async fn complete_request(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

/// Stub completion client that rejects every call.
///
/// Lets the engine be constructed without credentials; callers must bring
/// a real client before starting workflows.
pub struct StubCompletionClient;

#[async_trait]
impl CompletionClient for StubCompletionClient {
    async fn complete_request(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
        Err(crate::error::EngineError::Completion(
            "Completion client not configured. Implement the CompletionClient trait or configure a provider".to_string(),
        ))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "stub".to_string(),
            model_name: "none".to_string(),
        }
    }
}

/// Build a completion client from configuration.
///
/// # Errors
///
/// Returns a configuration error if the provider requires settings that
/// are missing (e.g. an API key).
pub fn client_from_settings(settings: &CompletionSettings) -> Result<Arc<dyn CompletionClient>> {
    match settings.provider {
        CompletionProvider::OpenAI => Ok(Arc::new(OpenAiClient::from_settings(settings)?)),
        CompletionProvider::Stub => Ok(Arc::new(StubCompletionClient)),
    }
}
