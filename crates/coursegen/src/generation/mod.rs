//! Answer generation over a model backend, with an optional single tool round trip.
//!
//! Backends that understand a tool manifest get it directly and may ask for
//! tools; the generator runs them and calls the model once more without tools.
//! Backends without a tool protocol get course search results spliced into the
//! query whenever it mentions course material.

mod keyword;
mod native;
pub mod prompt;

use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::configuration::{ConfigError, Settings};
use crate::message::Message;
use crate::providers::base::{Provider, ProviderCompleteResponse, ToolSupport};
use crate::providers::configs::ProviderConfig;
use crate::providers::errors::ProviderError;
use crate::providers::factory;
use crate::tool::{Tool, ToolError, ToolExecutor};

pub use keyword::{mentions_course_material, TRIGGER_KEYWORDS};
pub use prompt::{build_system_prompt, SYSTEM_PROMPT};

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Tool execution failed: {0}")]
    ToolExecution(#[from] ToolError),

    #[error(transparent)]
    Backend(#[from] ProviderError),

    #[error("Generation cancelled")]
    Cancelled,
}

/// One query to answer
#[derive(Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub query: &'a str,
    pub history: Option<&'a str>,
    pub tools: &'a [Tool],
    pub executor: Option<&'a dyn ToolExecutor>,
}

impl<'a> GenerationRequest<'a> {
    pub fn new(query: &'a str) -> Self {
        Self {
            query,
            history: None,
            tools: &[],
            executor: None,
        }
    }

    pub fn with_history(mut self, history: &'a str) -> Self {
        self.history = Some(history);
        self
    }

    /// Offer `tools` to the model and run requested tools through `executor`
    pub fn with_tools(mut self, tools: &'a [Tool], executor: &'a dyn ToolExecutor) -> Self {
        self.tools = tools;
        self.executor = Some(executor);
        self
    }

    fn system_prompt(&self) -> String {
        build_system_prompt(self.history)
    }

    /// The executor, if tools were offered at all
    fn tool_executor(&self) -> Option<&'a dyn ToolExecutor> {
        self.executor.filter(|_| !self.tools.is_empty())
    }
}

/// The final answer to a query and the sources its tools drew on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<String>,
}

impl Answer {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }
}

/// One item of a streamed answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamChunk {
    Content { content: String },
    Sources { sources: Vec<String> },
    Cancelled,
}

impl StreamChunk {
    pub fn content<S: Into<String>>(content: S) -> Self {
        StreamChunk::Content {
            content: content.into(),
        }
    }
}

pub type ChunkStream<'a> = BoxStream<'a, Result<StreamChunk, GenerationError>>;

/// Run `fut` unless `cancel` fires first. A token that is already cancelled
/// wins without polling `fut`.
pub(crate) async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, GenerationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GenerationError::Cancelled),
        output = fut => Ok(output),
    }
}

/// Answers course questions through one model backend
#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn Provider>,
}

impl Generator {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub fn from_config(config: ProviderConfig) -> Result<Self, GenerationError> {
        info!(model = %config.model_config().model_name, "creating generator");
        Ok(Self::new(factory::create(config)?))
    }

    /// Build from the process environment (and `.env`, `model_config.json`)
    pub fn from_env() -> Result<Self, GenerationError> {
        let config = Settings::new()?.into_provider_config()?;
        Self::from_config(config)
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Answer a query in one piece
    #[tracing::instrument(skip_all, fields(tool_support = ?self.provider.tool_support()))]
    pub async fn generate(
        &self,
        request: GenerationRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<Answer, GenerationError> {
        let system = request.system_prompt();
        match self.provider.tool_support() {
            ToolSupport::Native => self.reply_native(&system, &request, &cancel).await,
            ToolSupport::None => self.reply_keyword(&system, &request, &cancel).await,
        }
    }

    /// Answer a query as a sequence of chunks.
    ///
    /// Content chunks come first, followed by at most one sources chunk. A
    /// cancelled token ends the sequence with a `Cancelled` chunk.
    pub fn generate_stream<'a>(
        &'a self,
        request: GenerationRequest<'a>,
        cancel: CancellationToken,
    ) -> ChunkStream<'a> {
        match self.provider.tool_support() {
            ToolSupport::Native => self.stream_native(request, cancel),
            ToolSupport::None => self.stream_keyword(request, cancel),
        }
    }

    async fn call_model(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        cancel: &CancellationToken,
    ) -> Result<ProviderCompleteResponse, GenerationError> {
        debug!(messages = messages.len(), tools = tools.len(), "calling model");
        let response = until_cancelled(cancel, self.provider.complete(system, messages, tools))
            .await??;
        debug!(model = %response.model, usage = ?response.usage, "model responded");
        Ok(response)
    }
}
