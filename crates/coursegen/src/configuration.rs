use std::path::{Path, PathBuf};

use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::ModelConfig;
use crate::providers::configs::{
    AnthropicProviderConfig, OllamaProviderConfig, ProviderConfig, ANTHROPIC_API_HOST,
    ANTHROPIC_DEFAULT_MODEL, OLLAMA_DEFAULT_MODEL, OLLAMA_HOST,
};

pub const MODEL_CONFIG_FILE: &str = "model_config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("Failed to read {path}: {source}")]
    ModelCatalogIo {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid model configuration in {path}: {source}")]
    ModelCatalogParse {
        path: String,
        source: serde_json::Error,
    },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Anthropic,
    Ollama,
}

impl std::str::FromStr for ProviderType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" => Ok(ProviderType::Anthropic),
            "ollama" => Ok(ProviderType::Ollama),
            _ => Err(ConfigError::UnsupportedProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderDefaults {
    pub default_model: Option<String>,
}

/// Per-provider default model names, read from `model_config.json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelCatalog {
    #[serde(default)]
    pub anthropic: ProviderDefaults,
    #[serde(default)]
    pub ollama: ProviderDefaults,
}

impl ModelCatalog {
    /// Load the catalog at `path`. A missing file is not an error; the
    /// built-in defaults apply.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no model catalog, using built-in defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::ModelCatalogIo {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| ConfigError::ModelCatalogParse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn anthropic_model(&self) -> String {
        self.anthropic
            .default_model
            .clone()
            .unwrap_or_else(|| ANTHROPIC_DEFAULT_MODEL.to_string())
    }

    pub fn ollama_model(&self) -> String {
        self.ollama
            .default_model
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_MODEL.to_string())
    }
}

/// Process settings, read from the environment
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default = "default_provider")]
    pub ai_provider: String,
    #[serde(default)]
    pub anthropic_api_key: String,
    pub anthropic_model: Option<String>,
    #[serde(default = "default_anthropic_host")]
    pub anthropic_host: String,
    #[serde(default = "default_ollama_host")]
    pub ollama_base_url: String,
    pub ollama_model: Option<String>,
    #[serde(default = "default_model_config_path")]
    pub model_config_path: PathBuf,
}

impl Settings {
    /// Load `.env` if there is one, then read the environment
    pub fn new() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        Self::from_env()
    }

    /// Read the environment as it stands
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Environment::default())
            .build()?;

        let settings: Self = config.try_deserialize()?;
        Ok(settings)
    }

    pub fn provider_type(&self) -> Result<ProviderType, ConfigError> {
        self.ai_provider.parse()
    }

    /// Resolve the backend to build. Temperature and output length are fixed
    /// by [`ModelConfig`].
    pub fn into_provider_config(self) -> Result<ProviderConfig, ConfigError> {
        let provider_type = self.provider_type()?;
        let catalog = ModelCatalog::load(&self.model_config_path)?;

        let config = match provider_type {
            ProviderType::Anthropic => {
                if self.anthropic_api_key.trim().is_empty() {
                    return Err(ConfigError::MissingEnvVar {
                        env_var: "ANTHROPIC_API_KEY".to_string(),
                    });
                }
                let model = self
                    .anthropic_model
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| catalog.anthropic_model());
                ProviderConfig::Anthropic(
                    AnthropicProviderConfig::new(self.anthropic_api_key, ModelConfig::new(model))
                        .with_host(self.anthropic_host),
                )
            }
            ProviderType::Ollama => {
                let model = self
                    .ollama_model
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| catalog.ollama_model());
                ProviderConfig::Ollama(
                    OllamaProviderConfig::new(ModelConfig::new(model))
                        .with_host(self.ollama_base_url),
                )
            }
        };

        info!(
            provider = ?provider_type,
            model = %config.model_config().model_name,
            "resolved provider configuration"
        );
        Ok(config)
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_anthropic_host() -> String {
    ANTHROPIC_API_HOST.to_string()
}

fn default_ollama_host() -> String {
    OLLAMA_HOST.to_string()
}

fn default_model_config_path() -> PathBuf {
    PathBuf::from(MODEL_CONFIG_FILE)
}
