pub mod configuration;
pub mod generation;
pub mod message;
pub mod model;
pub mod providers;
pub mod registry;
pub mod sse;
pub mod tool;

pub use generation::{Answer, GenerationError, GenerationRequest, Generator, StreamChunk};
pub use tokio_util::sync::CancellationToken;
