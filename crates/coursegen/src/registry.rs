use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::tool::{Tool, ToolError, ToolExecutor, ToolHandler, ToolOutput, ToolResult};

/// An in-process registry of tool handlers.
///
/// Tools are offered to the model in registration order. Besides returning
/// sources with every execution, the registry accumulates the sources of its
/// executions until `reset_sources` for callers that still poll for them.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: Vec<Arc<dyn ToolHandler>>,
    last_sources: Arc<Mutex<Vec<String>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A handler with the same name replaces the earlier one
    /// in place.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name();
        info!(tool = %name, "registering tool");

        match self.handlers.iter().position(|h| h.name() == name) {
            Some(idx) => self.handlers[idx] = handler,
            None => self.handlers.push(handler),
        }
    }

    pub fn with_tool(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.iter().find(|h| h.name() == name).cloned()
    }

    /// Sources gathered by every execution since the last reset, in call order
    pub fn last_sources(&self) -> Vec<String> {
        self.last_sources
            .lock()
            .map(|sources| sources.clone())
            .unwrap_or_default()
    }

    pub fn reset_sources(&self) {
        if let Ok(mut sources) = self.last_sources.lock() {
            sources.clear();
        }
    }

    fn record_sources(&self, sources: &[String]) {
        if let Ok(mut last) = self.last_sources.lock() {
            last.extend_from_slice(sources);
        }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn tools(&self) -> Vec<Tool> {
        self.handlers.iter().map(|h| h.to_tool()).collect()
    }

    #[tracing::instrument(skip(self, arguments), fields(tool.name = %name))]
    async fn execute(&self, name: &str, arguments: Value) -> ToolResult<ToolOutput> {
        let handler = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        debug!(tool = %name, "invoking tool");
        match handler.call(arguments).await {
            Ok(output) => {
                self.record_sources(&output.sources);
                Ok(output)
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "tool execution failed");
                Err(e)
            }
        }
    }
}
