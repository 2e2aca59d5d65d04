use async_stream::stream;
use futures::stream::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{
    until_cancelled, Answer, ChunkStream, GenerationError, GenerationRequest, Generator,
    StreamChunk,
};
use crate::message::Message;
use crate::tool::{ToolOutput, SEARCH_TOOL_NAME};

/// Words that mark a query as being about course material
pub const TRIGGER_KEYWORDS: [&str; 7] = [
    "course",
    "lesson",
    "instructor",
    "content",
    "material",
    "chapter",
    "topic",
];

/// Case-insensitive substring match against [`TRIGGER_KEYWORDS`]
pub fn mentions_course_material(query: &str) -> bool {
    let query = query.to_lowercase();
    TRIGGER_KEYWORDS
        .iter()
        .any(|keyword| query.contains(keyword))
}

fn with_course_context(query: &str, context: Option<&ToolOutput>) -> String {
    match context {
        Some(output) => format!("{query}\n\nRelevant course content:\n{}", output.content),
        None => query.to_string(),
    }
}

impl Generator {
    /// Run the course search ahead of the model call when the query calls for
    /// it. A failed search is logged and the query goes out without context.
    async fn search_course_context(
        &self,
        request: &GenerationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<ToolOutput>, GenerationError> {
        let Some(executor) = request.tool_executor() else {
            return Ok(None);
        };
        if !mentions_course_material(request.query) {
            return Ok(None);
        }

        debug!(tool = SEARCH_TOOL_NAME, "query mentions course material");
        let outcome = until_cancelled(
            cancel,
            executor.execute(SEARCH_TOOL_NAME, json!({"query": request.query})),
        )
        .await?;

        match outcome {
            Ok(output) => Ok(Some(output)),
            Err(e) => {
                warn!(
                    tool = SEARCH_TOOL_NAME,
                    error = %e,
                    "search tool error, answering without course context"
                );
                Ok(None)
            }
        }
    }

    pub(super) async fn reply_keyword(
        &self,
        system: &str,
        request: &GenerationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Answer, GenerationError> {
        let context = self.search_course_context(request, cancel).await?;
        let query = with_course_context(request.query, context.as_ref());

        let messages = vec![Message::user().with_text(query)];
        let response = self.call_model(system, &messages, &[], cancel).await?;

        let sources = context.map(|output| output.sources).unwrap_or_default();
        Ok(Answer::new(response.message.as_concat_text()).with_sources(sources))
    }

    /// Streams the model's fragments as they arrive. A backend failure ends
    /// the sequence with an `Error: ...` content chunk instead of an error.
    pub(super) fn stream_keyword<'a>(
        &'a self,
        request: GenerationRequest<'a>,
        cancel: CancellationToken,
    ) -> ChunkStream<'a> {
        stream! {
            let system = request.system_prompt();
            let context = match self.search_course_context(&request, &cancel).await {
                Ok(context) => context,
                Err(GenerationError::Cancelled) => {
                    yield Ok(StreamChunk::Cancelled);
                    return;
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let query = with_course_context(request.query, context.as_ref());
            let messages = vec![Message::user().with_text(query)];

            let opened = until_cancelled(&cancel, self.provider.stream(&system, &messages)).await;
            let mut fragments = match opened {
                Ok(Ok(fragments)) => fragments,
                Ok(Err(e)) => {
                    error!(error = %e, "failed to open model stream");
                    yield Ok(StreamChunk::content(format!("Error: {e}")));
                    return;
                }
                Err(_) => {
                    yield Ok(StreamChunk::Cancelled);
                    return;
                }
            };

            let mut streamed_content = false;
            loop {
                let next = until_cancelled(&cancel, fragments.next()).await;
                match next {
                    Ok(Some(Ok(fragment))) => {
                        if !fragment.is_empty() {
                            streamed_content = true;
                            yield Ok(StreamChunk::content(fragment));
                        }
                    }
                    Ok(Some(Err(e))) => {
                        error!(error = %e, "model stream failed");
                        yield Ok(StreamChunk::content(format!("Error: {e}")));
                        return;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        yield Ok(StreamChunk::Cancelled);
                        return;
                    }
                }
            }

            let sources = context.map(|output| output.sources).unwrap_or_default();
            if !sources.is_empty() {
                // sources always trail at least one content chunk
                if !streamed_content {
                    yield Ok(StreamChunk::content(""));
                }
                yield Ok(StreamChunk::Sources { sources });
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::TryStreamExt;
    use serde_json::json;

    use super::*;
    use crate::providers::base::ToolSupport;
    use crate::providers::errors::ProviderError;
    use crate::providers::mock::{MockExecutor, MockProvider};
    use crate::tool::{Tool, ToolError, ToolExecutor};

    fn search_tool() -> Tool {
        Tool::new(
            SEARCH_TOOL_NAME,
            "Search course materials",
            json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        )
    }

    fn local_model(responses: Vec<Message>) -> Arc<MockProvider> {
        Arc::new(MockProvider::new(responses).with_tool_support(ToolSupport::None))
    }

    fn search_executor(outcome: Result<ToolOutput, ToolError>) -> MockExecutor {
        MockExecutor::new(vec![search_tool()]).with_outcome(SEARCH_TOOL_NAME, outcome)
    }

    #[test]
    fn test_keyword_detection() {
        assert!(mentions_course_material("What TOPICS does lesson 3 cover?"));
        assert!(mentions_course_material("who is the Instructor"));
        assert!(mentions_course_material("reading materials"));
        assert!(!mentions_course_material("What is photosynthesis?"));
        assert!(!mentions_course_material(""));
    }

    #[tokio::test]
    async fn test_keyword_splices_search_results() -> anyhow::Result<()> {
        let provider = local_model(vec![
            Message::assistant().with_text("Lesson 3 covers recursion.")
        ]);
        let executor = search_executor(Ok(ToolOutput::new("Lesson 3: Recursion basics")
            .with_sources(vec!["Intro to Python - Lesson 3".to_string()])));
        let tools = executor.tools();
        let generator = Generator::new(provider.clone());

        let query = "What topics does lesson 3 cover?";
        let answer = generator
            .generate(
                GenerationRequest::new(query).with_tools(&tools, &executor),
                CancellationToken::new(),
            )
            .await?;

        assert_eq!(answer.text, "Lesson 3 covers recursion.");
        assert_eq!(answer.sources, vec!["Intro to Python - Lesson 3"]);
        assert_eq!(
            executor.calls(),
            vec![(SEARCH_TOOL_NAME.to_string(), json!({"query": query}))]
        );

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].tools.is_empty());
        assert_eq!(
            calls[0].messages[0].as_concat_text(),
            "What topics does lesson 3 cover?\n\nRelevant course content:\nLesson 3: Recursion basics"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_no_keyword_no_search() -> anyhow::Result<()> {
        let provider = local_model(vec![Message::assistant().with_text("Light to sugar.")]);
        let executor = search_executor(Ok(ToolOutput::new("unused")));
        let tools = executor.tools();
        let generator = Generator::new(provider.clone());

        let answer = generator
            .generate(
                GenerationRequest::new("What is photosynthesis?").with_tools(&tools, &executor),
                CancellationToken::new(),
            )
            .await?;

        assert_eq!(answer.text, "Light to sugar.");
        assert!(executor.calls().is_empty());
        assert_eq!(
            provider.calls()[0].messages[0].as_concat_text(),
            "What is photosynthesis?"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_no_manifest_no_search() -> anyhow::Result<()> {
        let provider = local_model(vec![Message::assistant().with_text("It has 4 lessons.")]);
        let executor = search_executor(Ok(ToolOutput::new("unused")));
        let generator = Generator::new(provider);

        generator
            .generate(
                GenerationRequest::new("How many lessons in the course?").with_tools(&[], &executor),
                CancellationToken::new(),
            )
            .await?;

        assert!(executor.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_search_failure_is_swallowed() -> anyhow::Result<()> {
        let provider = local_model(vec![Message::assistant().with_text("Lesson 3 is on loops.")]);
        let executor = search_executor(Err(ToolError::ExecutionError(
            "vector store offline".to_string(),
        )));
        let tools = executor.tools();
        let generator = Generator::new(provider.clone());

        let answer = generator
            .generate(
                GenerationRequest::new("What does lesson 3 cover?").with_tools(&tools, &executor),
                CancellationToken::new(),
            )
            .await?;

        assert_eq!(answer.text, "Lesson 3 is on loops.");
        assert!(answer.sources.is_empty());
        assert_eq!(executor.calls().len(), 1);
        assert_eq!(
            provider.calls()[0].messages[0].as_concat_text(),
            "What does lesson 3 cover?"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_content_before_sources() -> anyhow::Result<()> {
        let provider = Arc::new(
            MockProvider::new(vec![])
                .with_tool_support(ToolSupport::None)
                .with_stream(vec![
                    Ok("Lesson 3 ".to_string()),
                    Ok(String::new()),
                    Ok("covers recursion.".to_string()),
                ]),
        );
        let executor = search_executor(Ok(ToolOutput::new("Recursion basics")
            .with_sources(vec!["Intro to Python - Lesson 3".to_string()])));
        let tools = executor.tools();
        let generator = Generator::new(provider.clone());

        let chunks: Vec<StreamChunk> = generator
            .generate_stream(
                GenerationRequest::new("What topics does lesson 3 cover?")
                    .with_tools(&tools, &executor),
                CancellationToken::new(),
            )
            .try_collect()
            .await?;

        assert_eq!(
            chunks,
            vec![
                StreamChunk::content("Lesson 3 "),
                StreamChunk::content("covers recursion."),
                StreamChunk::Sources {
                    sources: vec!["Intro to Python - Lesson 3".to_string()]
                },
            ]
        );
        assert!(provider.calls()[0].streamed);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_stream_still_leads_with_content() -> anyhow::Result<()> {
        let provider = Arc::new(
            MockProvider::new(vec![])
                .with_tool_support(ToolSupport::None)
                .with_stream(vec![Ok(String::new())]),
        );
        let executor = search_executor(Ok(
            ToolOutput::new("Lesson 1 notes").with_sources(vec!["A - Lesson 1".to_string()])
        ));
        let tools = executor.tools();
        let generator = Generator::new(provider);

        let chunks: Vec<StreamChunk> = generator
            .generate_stream(
                GenerationRequest::new("what is in the course?").with_tools(&tools, &executor),
                CancellationToken::new(),
            )
            .try_collect()
            .await?;

        assert_eq!(
            chunks,
            vec![
                StreamChunk::content(""),
                StreamChunk::Sources {
                    sources: vec!["A - Lesson 1".to_string()]
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_failure_becomes_content() -> anyhow::Result<()> {
        let provider = Arc::new(
            MockProvider::new(vec![])
                .with_tool_support(ToolSupport::None)
                .with_stream(vec![
                    Ok("Partial".to_string()),
                    Err(ProviderError::ServerError("model runner crashed".to_string())),
                    Ok("never seen".to_string()),
                ]),
        );
        let generator = Generator::new(provider);

        let chunks: Vec<StreamChunk> = generator
            .generate_stream(GenerationRequest::new("hi"), CancellationToken::new())
            .try_collect()
            .await?;

        assert_eq!(
            chunks,
            vec![
                StreamChunk::content("Partial"),
                StreamChunk::content("Error: Server error: model runner crashed"),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_open_failure_becomes_content() -> anyhow::Result<()> {
        let generator = Generator::new(Arc::new(
            MockProvider::with_results(vec![Err(ProviderError::Authentication(
                "bad key".to_string(),
            ))])
            .with_tool_support(ToolSupport::None),
        ));

        let chunks: Vec<StreamChunk> = generator
            .generate_stream(GenerationRequest::new("hi"), CancellationToken::new())
            .try_collect()
            .await?;

        assert_eq!(
            chunks,
            vec![StreamChunk::content("Error: Authentication error: bad key")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_cancelled_mid_way() -> anyhow::Result<()> {
        let provider = Arc::new(
            MockProvider::new(vec![])
                .with_tool_support(ToolSupport::None)
                .with_stream(vec![Ok("one".to_string()), Ok("two".to_string())]),
        );
        let generator = Generator::new(provider);
        let cancel = CancellationToken::new();

        let mut stream = generator.generate_stream(GenerationRequest::new("hi"), cancel.clone());
        let first = stream.try_next().await?;
        assert_eq!(first, Some(StreamChunk::content("one")));

        cancel.cancel();
        let rest: Vec<StreamChunk> = stream.try_collect().await?;
        assert_eq!(rest, vec![StreamChunk::Cancelled]);
        Ok(())
    }
}
