use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::ProviderError;
use crate::message::Message;
use crate::model::ModelConfig;
use crate::tool::Tool;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Read `input_tokens`/`output_tokens` from a response's usage object
    pub fn from_counts(input_tokens: Option<&Value>, output_tokens: Option<&Value>) -> Self {
        let input_tokens = input_tokens.and_then(|v| v.as_u64()).map(|v| v as i32);
        let output_tokens = output_tokens.and_then(|v| v.as_u64()).map(|v| v as i32);
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        };
        Self::new(input_tokens, output_tokens, total_tokens)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderCompleteResponse {
    pub message: Message,
    pub model: String,
    pub usage: Usage,
}

impl ProviderCompleteResponse {
    pub fn new(message: Message, model: String, usage: Usage) -> Self {
        Self {
            message,
            model,
            usage,
        }
    }
}

/// How a backend takes part in tool use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSupport {
    /// The model receives a tool manifest and answers with structured tool requests
    Native,
    /// The model has no tool protocol; tools are run on its behalf before the call
    None,
}

/// A sequence of raw text fragments from a model
pub type TextStream<'a> = BoxStream<'a, Result<String, ProviderError>>;

/// Base trait for model backends (Anthropic, Ollama)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the model configuration
    fn get_model_config(&self) -> &ModelConfig;

    /// Whether this backend understands a structured tool manifest
    fn tool_support(&self) -> ToolSupport;

    /// Generate the next message using the configured model and other parameters
    ///
    /// # Arguments
    /// * `system` - The system prompt that guides the model's behavior
    /// * `messages` - The conversation history as a sequence of messages
    /// * `tools` - Tools the model may request; empty means none are offered
    ///
    /// # Returns
    /// The model's message, which holds either text or tool requests, with usage
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderCompleteResponse, ProviderError>;

    /// Stream the model's answer as text fragments.
    ///
    /// Backends without incremental delivery complete the whole call and
    /// yield its text once.
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
    ) -> Result<TextStream<'static>, ProviderError> {
        let response = self.complete(system, messages, &[]).await?;
        let text = response.message.as_concat_text();
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_creation() {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(20));
        assert_eq!(usage.total_tokens, Some(30));
    }

    #[test]
    fn test_usage_from_counts() {
        let data = json!({"input_tokens": 12, "output_tokens": 15});
        let usage = Usage::from_counts(data.get("input_tokens"), data.get("output_tokens"));
        assert_eq!(usage, Usage::new(Some(12), Some(15), Some(27)));

        let usage = Usage::from_counts(data.get("input_tokens"), None);
        assert_eq!(usage, Usage::new(Some(12), None, None));
    }

    #[test]
    fn test_provider_complete_response_creation() {
        let message = Message::assistant().with_text("Hello, world!");
        let usage = Usage::new(Some(10), Some(20), Some(30));
        let response =
            ProviderCompleteResponse::new(message.clone(), "test_model".to_string(), usage.clone());

        assert_eq!(response.message, message);
        assert_eq!(response.model, "test_model");
        assert_eq!(response.usage, usage);
    }
}
