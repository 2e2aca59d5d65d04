pub mod anthropic;
pub mod base;
pub mod configs;
pub mod errors;
pub mod factory;
pub mod mock;
pub mod ollama;
pub mod utils;

pub use base::{Provider, ProviderCompleteResponse, ToolSupport, Usage};
pub use errors::ProviderError;
pub use factory::create;
