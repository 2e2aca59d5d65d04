//! Server-sent event framing for streamed answers.

use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::generation::ChunkStream;

/// Sent once after the last chunk, including after a failure
pub const DONE_EVENT: &str = "data: [DONE]\n\n";

/// Frame one value as a `data:` event
pub fn format_event<T: Serialize>(value: &T) -> String {
    let data = serde_json::to_string(value).unwrap_or_else(|e| {
        json!({"error": format!("failed to serialize event: {e}")}).to_string()
    });
    format!("data: {data}\n\n")
}

pub fn format_error<E: std::fmt::Display>(error: &E) -> String {
    format_event(&json!({"error": error.to_string()}))
}

/// Frame a chunk stream as events. An error ends the stream with an error
/// event, and [`DONE_EVENT`] always follows.
pub fn encode_chunks(chunks: ChunkStream<'_>) -> BoxStream<'_, String> {
    stream! {
        let mut chunks = chunks;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    yield format_event(&chunk);
                }
                Err(e) => {
                    error!(error = %e, "streamed generation failed");
                    yield format_error(&e);
                    break;
                }
            }
        }
        yield DONE_EVENT.to_string();
    }
    .boxed()
}
