use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

use super::base::{Provider, ProviderCompleteResponse, ToolSupport, Usage};
use super::configs::AnthropicProviderConfig;
use super::errors::ProviderError;
use super::utils::{emit_debug_trace, get_model, handle_response};
use crate::message::{Message, MessageContent, Role};
use crate::model::ModelConfig;
use crate::tool::{Tool, ToolCall};

pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// Remote Claude models over the Anthropic Messages API, with native tool use
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<Value> {
        let mut unique_tools = HashSet::new();
        let mut tool_specs = Vec::new();

        for tool in tools {
            if unique_tools.insert(tool.name.clone()) {
                tool_specs.push(json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema
                }));
            }
        }

        tool_specs
    }

    fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
        let mut anthropic_messages = Vec::new();

        for message in messages {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                // the system prompt travels in its own top-level field
                Role::System => continue,
            };

            let mut content = Vec::new();
            for msg_content in &message.content {
                match msg_content {
                    MessageContent::Text(text) => {
                        if !text.text.is_empty() {
                            content.push(json!({
                                "type": "text",
                                "text": text.text
                            }));
                        }
                    }
                    MessageContent::ToolRequest(tool_request) => {
                        content.push(json!({
                            "type": "tool_use",
                            "id": tool_request.id,
                            "name": tool_request.tool_call.name,
                            "input": tool_request.tool_call.arguments
                        }));
                    }
                    MessageContent::ToolResponse(tool_response) => {
                        content.push(json!({
                            "type": "tool_result",
                            "tool_use_id": tool_response.id,
                            "content": tool_response.output
                        }));
                    }
                }
            }

            // Skip messages with empty content
            if !content.is_empty() {
                anthropic_messages.push(json!({
                    "role": role,
                    "content": content
                }));
            }
        }

        anthropic_messages
    }

    fn parse_anthropic_response(response: &Value) -> Result<Message, ProviderError> {
        let content_blocks = response
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                ProviderError::ResponseParseError(
                    "Invalid response format: missing content array".to_string(),
                )
            })?;

        let mut message = Message::assistant();

        for block in content_blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        message = message.with_text(text);
                    }
                }
                Some("tool_use") => {
                    let id = block.get("id").and_then(|i| i.as_str()).ok_or_else(|| {
                        ProviderError::ResponseParseError("Missing tool_use id".to_string())
                    })?;
                    let name = block.get("name").and_then(|n| n.as_str()).ok_or_else(|| {
                        ProviderError::ResponseParseError("Missing tool_use name".to_string())
                    })?;
                    let input = block.get("input").cloned().unwrap_or_else(|| json!({}));

                    message = message.with_tool_request(id, ToolCall::new(name, input));
                }
                _ => continue,
            }
        }

        Ok(message)
    }

    fn create_request(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<Value, ProviderError> {
        let anthropic_messages = Self::messages_to_anthropic_spec(messages);
        if anthropic_messages.is_empty() {
            return Err(ProviderError::RequestFailed(
                "No valid messages to send to Anthropic API".to_string(),
            ));
        }

        let model = &self.config.model;
        let mut payload = json!({
            "model": model.model_name,
            "messages": anthropic_messages,
            "max_tokens": model.max_tokens(),
            "temperature": model.temperature(),
        });

        if !system.is_empty() {
            payload["system"] = json!(system);
        }

        let tool_specs = Self::tools_to_anthropic_spec(tools);
        if !tool_specs.is_empty() {
            payload["tools"] = json!(tool_specs);
            payload["tool_choice"] = json!({"type": "auto"});
        }

        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> Result<Value, ProviderError> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(payload)
            .send()
            .await?;

        handle_response(payload, response).await
    }

    fn get_usage(data: &Value) -> Usage {
        match data.get("usage") {
            Some(usage) => {
                Usage::from_counts(usage.get("input_tokens"), usage.get("output_tokens"))
            }
            None => Usage::default(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn get_model_config(&self) -> &ModelConfig {
        &self.config.model
    }

    fn tool_support(&self) -> ToolSupport {
        ToolSupport::Native
    }

    #[tracing::instrument(
        skip(self, system, messages, tools),
        fields(model = %self.config.model.model_name, tools = tools.len())
    )]
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderCompleteResponse, ProviderError> {
        let payload = self.create_request(system, messages, tools)?;

        let response = self.post(&payload).await?;

        let message = Self::parse_anthropic_response(&response)?;
        let usage = Self::get_usage(&response);
        let model = get_model(&response);
        emit_debug_trace(&self.config, &payload, &response, &usage);
        Ok(ProviderCompleteResponse::new(message, model, usage))
    }
}
