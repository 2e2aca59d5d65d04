use std::sync::Arc;

use super::{
    anthropic::AnthropicProvider,
    base::Provider,
    configs::ProviderConfig,
    errors::ProviderError,
    ollama::OllamaProvider,
};

/// Build the backend named by `config`
pub fn create(config: ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    match config {
        ProviderConfig::Anthropic(config) => Ok(Arc::new(AnthropicProvider::new(config)?)),
        ProviderConfig::Ollama(config) => Ok(Arc::new(OllamaProvider::new(config)?)),
    }
}
