use serde::Serialize;

use crate::model::ModelConfig;

pub const ANTHROPIC_API_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "qwen2.5:7b";

/// Everything needed to build one backend
#[derive(Debug, Clone, Serialize)]
pub enum ProviderConfig {
    Anthropic(AnthropicProviderConfig),
    Ollama(OllamaProviderConfig),
}

impl ProviderConfig {
    pub fn model_config(&self) -> &ModelConfig {
        match self {
            ProviderConfig::Anthropic(config) => &config.model,
            ProviderConfig::Ollama(config) => &config.model,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicProviderConfig {
    pub host: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: ModelConfig,
}

impl AnthropicProviderConfig {
    pub fn new<K: Into<String>>(api_key: K, model: ModelConfig) -> Self {
        Self {
            host: ANTHROPIC_API_HOST.to_string(),
            api_key: api_key.into(),
            model,
        }
    }

    pub fn with_host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = host.into();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OllamaProviderConfig {
    pub host: String,
    pub model: ModelConfig,
}

impl OllamaProviderConfig {
    pub fn new(model: ModelConfig) -> Self {
        Self {
            host: OLLAMA_HOST.to_string(),
            model,
        }
    }

    pub fn with_host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = host.into();
        self
    }
}
