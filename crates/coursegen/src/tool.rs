use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Name of the course search tool the keyword heuristic always invokes
pub const SEARCH_TOOL_NAME: &str = "search_course_content";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Execution failed: {0}")]
    ExecutionError(String),
    #[error("Tool not found: {0}")]
    NotFound(String),
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// A tool that can be offered to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// A JSON Schema object defining the expected parameters for the tool
    pub input_schema: Value,
}

impl Tool {
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool call request that the model wants to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// The name of the tool to execute
    pub name: String,
    /// The parameters for the execution
    pub arguments: Value,
}

impl ToolCall {
    pub fn new<S: Into<String>>(name: S, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// What a single tool execution produced.
///
/// Sources are returned with the output instead of being parked on the
/// executor, so two queries running at once never see each other's citations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl ToolOutput {
    pub fn new<S: Into<String>>(content: S) -> Self {
        Self {
            content: content.into(),
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }
}

/// Something that can run tools by name on behalf of a model
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// The tools this executor can run, in the order they should be offered
    fn tools(&self) -> Vec<Tool>;

    /// Run the named tool with the given arguments
    async fn execute(&self, name: &str, arguments: Value) -> ToolResult<ToolOutput>;
}

/// Trait for implementing a single tool that a registry can host
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// The name of the tool
    fn name(&self) -> &'static str;

    /// A description of what the tool does
    fn description(&self) -> &'static str;

    /// JSON schema describing the tool's parameters
    fn schema(&self) -> Value;

    /// Execute the tool with the given parameters
    async fn call(&self, params: Value) -> ToolResult<ToolOutput>;

    fn to_tool(&self) -> Tool {
        Tool::new(self.name(), self.description(), self.schema())
    }
}
