use serde::Serialize;

/// Sampling temperature used for every request. Zero keeps answers
/// reproducible for identical inputs and model version.
pub const TEMPERATURE: f32 = 0.0;
/// Upper bound on generated tokens per model call
pub const MAX_TOKENS: i32 = 800;

/// Configuration for model-specific settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    /// The name of the model to use
    pub model_name: String,
    temperature: f32,
    max_tokens: i32,
}

impl ModelConfig {
    /// Create a new ModelConfig with the specified model name.
    ///
    /// Sampling settings are fixed; there is no way to raise the temperature.
    pub fn new<S: Into<String>>(model_name: S) -> Self {
        Self {
            model_name: model_name.into(),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        }
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> i32 {
        self.max_tokens
    }
}
