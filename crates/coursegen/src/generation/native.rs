use async_stream::stream;
use futures::stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{
    until_cancelled, Answer, ChunkStream, GenerationError, GenerationRequest, Generator,
    StreamChunk,
};
use crate::message::Message;
use crate::tool::ToolExecutor;

impl Generator {
    /// One model call, plus a single tool round trip when the model asks for tools
    pub(super) async fn reply_native(
        &self,
        system: &str,
        request: &GenerationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Answer, GenerationError> {
        let mut messages = vec![Message::user().with_text(request.query)];
        let response = self
            .call_model(system, &messages, request.tools, cancel)
            .await?;

        let executor = match request.tool_executor() {
            Some(executor) if response.message.is_tool_call() => executor,
            _ => return Ok(Answer::new(response.message.as_concat_text())),
        };

        messages.push(response.message.clone());
        let (tool_results, sources) = self
            .run_tool_requests(&response.message, executor, cancel)
            .await?;
        messages.push(tool_results);

        // No tools on the follow-up, so the model has to answer now
        let follow_up = self.call_model(system, &messages, &[], cancel).await?;
        Ok(Answer::new(follow_up.message.as_concat_text()).with_sources(sources))
    }

    /// Run every tool request in `message` in order. The first failure ends
    /// the round trip.
    async fn run_tool_requests(
        &self,
        message: &Message,
        executor: &dyn ToolExecutor,
        cancel: &CancellationToken,
    ) -> Result<(Message, Vec<String>), GenerationError> {
        let mut tool_results = Message::user();
        let mut sources = Vec::new();

        for request in message.tool_requests() {
            let call = &request.tool_call;
            info!(tool = %call.name, id = %request.id, "executing tool");

            let outcome =
                until_cancelled(cancel, executor.execute(&call.name, call.arguments.clone()))
                    .await?;
            match outcome {
                Ok(output) => {
                    debug!(tool = %call.name, sources = output.sources.len(), "tool finished");
                    sources.extend(output.sources);
                    tool_results =
                        tool_results.with_tool_response(request.id.clone(), output.content);
                }
                Err(e) => {
                    error!(tool = %call.name, error = %e, "tool failed, abandoning query");
                    return Err(GenerationError::ToolExecution(e));
                }
            }
        }

        Ok((tool_results, sources))
    }

    /// The whole round trip runs before anything is emitted; the answer then
    /// arrives as a single content chunk.
    pub(super) fn stream_native<'a>(
        &'a self,
        request: GenerationRequest<'a>,
        cancel: CancellationToken,
    ) -> ChunkStream<'a> {
        stream! {
            let system = request.system_prompt();
            match self.reply_native(&system, &request, &cancel).await {
                Ok(answer) => {
                    yield Ok(StreamChunk::content(answer.text));
                    if !answer.sources.is_empty() {
                        yield Ok(StreamChunk::Sources { sources: answer.sources });
                    }
                }
                Err(GenerationError::Cancelled) => {
                    yield Ok(StreamChunk::Cancelled);
                }
                Err(e) => {
                    yield Err(e);
                }
            }
        }
        .boxed()
    }
}
