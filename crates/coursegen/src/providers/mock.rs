//! Scripted stand-ins for a model backend and a tool executor, used by the
//! generator's tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use super::base::{Provider, ProviderCompleteResponse, TextStream, ToolSupport, Usage};
use super::errors::ProviderError;
use crate::message::Message;
use crate::model::ModelConfig;
use crate::tool::{Tool, ToolError, ToolExecutor, ToolOutput, ToolResult};

/// One call the mock provider received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub streamed: bool,
}

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    responses: Mutex<VecDeque<Result<Message, ProviderError>>>,
    fragments: Option<Vec<Result<String, ProviderError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    tool_support: ToolSupport,
    model_config: ModelConfig,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Create a new mock provider whose calls may also fail
    pub fn with_results(responses: Vec<Result<Message, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fragments: None,
            calls: Mutex::new(Vec::new()),
            tool_support: ToolSupport::Native,
            model_config: ModelConfig::new("mock"),
        }
    }

    pub fn with_tool_support(mut self, tool_support: ToolSupport) -> Self {
        self.tool_support = tool_support;
        self
    }

    /// Script the fragments `stream` yields instead of replaying a response
    pub fn with_stream(mut self, fragments: Vec<Result<String, ProviderError>>) -> Self {
        self.fragments = Some(fragments);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, system: &str, messages: &[Message], tools: &[Tool], streamed: bool) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                system: system.to_string(),
                messages: messages.to_vec(),
                tools: tools.to_vec(),
                streamed,
            });
    }

    fn next_response(&self) -> Result<Message, ProviderError> {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            // Return empty response if no more pre-configured responses
            .unwrap_or_else(|| Ok(Message::assistant().with_text("")))
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn get_model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    fn tool_support(&self) -> ToolSupport {
        self.tool_support
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderCompleteResponse, ProviderError> {
        self.record(system, messages, tools, false);
        let message = self.next_response()?;
        Ok(ProviderCompleteResponse::new(
            message,
            "mock".to_string(),
            Usage::new(Some(1), Some(1), Some(2)),
        ))
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
    ) -> Result<TextStream<'static>, ProviderError> {
        self.record(system, messages, &[], true);
        match &self.fragments {
            Some(fragments) => Ok(stream::iter(fragments.clone()).boxed()),
            None => {
                let text = self.next_response()?.as_concat_text();
                Ok(stream::once(async move { Ok(text) }).boxed())
            }
        }
    }
}

/// A tool executor with a fixed outcome per tool name that records every call
pub struct MockExecutor {
    tools: Vec<Tool>,
    outcomes: HashMap<String, ToolResult<ToolOutput>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockExecutor {
    pub fn new(tools: Vec<Tool>) -> Self {
        Self {
            tools,
            outcomes: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_outcome<S: Into<String>>(
        mut self,
        name: S,
        outcome: ToolResult<ToolOutput>,
    ) -> Self {
        self.outcomes.insert(name.into(), outcome);
        self
    }

    /// Every `(name, arguments)` pair executed so far, in order
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ToolExecutor for MockExecutor {
    fn tools(&self) -> Vec<Tool> {
        self.tools.clone()
    }

    async fn execute(&self, name: &str, arguments: Value) -> ToolResult<ToolOutput> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), arguments));

        self.outcomes
            .get(name)
            .cloned()
            .unwrap_or_else(|| Err(ToolError::NotFound(name.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_provider_replays_in_order() {
        let provider = MockProvider::with_results(vec![
            Ok(Message::assistant().with_text("first")),
            Err(ProviderError::ServerError("boom".to_string())),
        ]);

        let first = provider.complete("sys", &[], &[]).await.unwrap();
        assert_eq!(first.message.as_concat_text(), "first");
        assert!(provider.complete("sys", &[], &[]).await.is_err());

        let exhausted = provider.complete("sys", &[], &[]).await.unwrap();
        assert_eq!(exhausted.message.as_concat_text(), "");
        assert_eq!(provider.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_provider_scripted_stream() {
        let provider = MockProvider::new(vec![])
            .with_stream(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let fragments: Vec<String> = provider
            .stream("sys", &[])
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fragments, vec!["a", "b"]);
        assert!(provider.calls()[0].streamed);
    }

    #[tokio::test]
    async fn test_mock_executor_records_calls() {
        let executor = MockExecutor::new(vec![])
            .with_outcome("outline_tool", Ok(ToolOutput::new("outline")));

        let output = executor
            .execute("outline_tool", json!({"course": "Intro"}))
            .await
            .unwrap();
        assert_eq!(output.content, "outline");

        let missing = executor.execute("nope", json!({})).await;
        assert_eq!(missing, Err(ToolError::NotFound("nope".to_string())));
        assert_eq!(executor.calls().len(), 2);
    }
}
