use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::base::{Provider, ProviderCompleteResponse, TextStream, ToolSupport, Usage};
use super::configs::OllamaProviderConfig;
use super::errors::ProviderError;
use super::utils::{emit_debug_trace, get_model, handle_response, non_ok_response_to_provider_error};
use crate::message::{Message, MessageContent, Role};
use crate::model::ModelConfig;
use crate::tool::Tool;

pub const OLLAMA_DEFAULT_PORT: u16 = 11434;

/// A locally hosted model served by Ollama.
///
/// Ollama is driven without a tool manifest; tool use for it is emulated by
/// the generator before the call is made.
pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }

    /// OLLAMA_BASE_URL is sometimes just the 'host' or 'host:port' without a scheme
    fn chat_url(&self) -> Result<Url, ProviderError> {
        let host = self.config.host.trim_end_matches('/');
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        };

        let mut base_url = Url::parse(&base)
            .map_err(|e| ProviderError::RequestFailed(format!("Invalid base URL: {e}")))?;

        // Set the default port if missing
        let explicit_default_port = host.ends_with(":80") || host.ends_with(":443");
        if base_url.port().is_none() && !explicit_default_port && !base.starts_with("https://") {
            base_url.set_port(Some(OLLAMA_DEFAULT_PORT)).map_err(|_| {
                ProviderError::RequestFailed("Failed to set default port".to_string())
            })?;
        }

        // Keep a path prefix such as `/ollama` when joining
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        base_url.join("api/chat").map_err(|e| {
            ProviderError::RequestFailed(format!("Failed to construct endpoint URL: {e}"))
        })
    }

    /// Flatten messages into Ollama's `{role, content}` form. Tool blocks have
    /// no structured counterpart here, so they are rendered as text.
    fn messages_to_ollama_spec(system: &str, messages: &[Message]) -> Vec<Value> {
        let mut ollama_messages = Vec::new();
        if !system.is_empty() {
            ollama_messages.push(json!({"role": "system", "content": system}));
        }

        for message in messages {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };

            let content = message
                .content
                .iter()
                .map(|c| match c {
                    MessageContent::Text(text) => text.text.clone(),
                    MessageContent::ToolRequest(request) => {
                        serde_json::to_string(&request.tool_call).unwrap_or_default()
                    }
                    MessageContent::ToolResponse(response) => response.output.clone(),
                })
                .collect::<Vec<_>>()
                .join("\n");

            ollama_messages.push(json!({"role": role, "content": content}));
        }

        ollama_messages
    }

    fn create_request(&self, system: &str, messages: &[Message], stream: bool) -> Value {
        let model = &self.config.model;
        json!({
            "model": model.model_name,
            "messages": Self::messages_to_ollama_spec(system, messages),
            "stream": stream,
            "options": {
                "temperature": model.temperature(),
                "num_predict": model.max_tokens(),
            }
        })
    }

    fn get_usage(data: &Value) -> Usage {
        Usage::from_counts(data.get("prompt_eval_count"), data.get("eval_count"))
    }

    fn message_content(data: &Value) -> Option<&str> {
        data.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
    }

    /// Parse one line of the NDJSON chat stream into its text fragment
    fn parse_stream_line(line: &[u8]) -> Result<Option<String>, ProviderError> {
        let line = std::str::from_utf8(line)
            .map_err(|e| {
                ProviderError::ResponseParseError(format!("Invalid UTF-8 in chat stream: {e}"))
            })?
            .trim();
        if line.is_empty() {
            return Ok(None);
        }

        let data: Value = serde_json::from_str(line)?;
        if let Some(error) = data.get("error").and_then(|e| e.as_str()) {
            return Err(ProviderError::ServerError(error.to_string()));
        }

        Ok(Self::message_content(&data)
            .filter(|content| !content.is_empty())
            .map(str::to_string))
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn get_model_config(&self) -> &ModelConfig {
        &self.config.model
    }

    fn tool_support(&self) -> ToolSupport {
        ToolSupport::None
    }

    #[tracing::instrument(
        skip(self, system, messages, _tools),
        fields(model = %self.config.model.model_name)
    )]
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<ProviderCompleteResponse, ProviderError> {
        let payload = self.create_request(system, messages, false);
        let url = self.chat_url()?;

        let response = self.client.post(url).json(&payload).send().await?;
        let response = handle_response(&payload, response).await?;

        let text = Self::message_content(&response).ok_or_else(|| {
            ProviderError::ResponseParseError("Missing message content".to_string())
        })?;
        let message = Message::assistant().with_text(text);
        let usage = Self::get_usage(&response);
        let model = get_model(&response);
        emit_debug_trace(&self.config, &payload, &response, &usage);
        Ok(ProviderCompleteResponse::new(message, model, usage))
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
    ) -> Result<TextStream<'static>, ProviderError> {
        let payload = self.create_request(system, messages, true);
        let url = self.chat_url()?;

        let response = self.client.post(url).json(&payload).send().await?;
        if response.status() != StatusCode::OK {
            return Err(non_ok_response_to_provider_error(&payload, response).await);
        }

        let mut bytes = response.bytes_stream();
        let fragments = try_stream! {
            // Lines are decoded whole, a character may span two chunks
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                buffer.extend_from_slice(&chunk?);

                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    if let Some(fragment) = Self::parse_stream_line(&line)? {
                        yield fragment;
                    }
                }
            }

            if let Some(fragment) = Self::parse_stream_line(&buffer)? {
                yield fragment;
            }
        };

        Ok(fragments.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(host: String) -> OllamaProvider {
        OllamaProvider::new(
            OllamaProviderConfig::new(ModelConfig::new("qwen2.5:7b")).with_host(host),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_basic() -> anyhow::Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "qwen2.5:7b",
                "stream": false,
                "options": {"temperature": 0.0, "num_predict": 800},
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "What is photosynthesis?"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "qwen2.5:7b",
                "message": {"role": "assistant", "content": "Light to sugar."},
                "done": true,
                "prompt_eval_count": 30,
                "eval_count": 5
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = provider_for(mock_server.uri());
        let response = provider
            .complete("sys", &[Message::user().with_text("What is photosynthesis?")], &[])
            .await?;

        assert_eq!(response.message.as_concat_text(), "Light to sugar.");
        assert_eq!(response.usage, Usage::new(Some(30), Some(5), Some(35)));
        assert_eq!(response.model, "qwen2.5:7b");
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_yields_fragments() -> anyhow::Result<()> {
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Lesson 3 \"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"covers loops.\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}"
        );
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;

        let provider = provider_for(mock_server.uri());
        let fragments: Vec<String> = provider
            .stream("sys", &[Message::user().with_text("What does lesson 3 cover?")])
            .await?
            .try_collect()
            .await?;

        assert_eq!(fragments, vec!["Lesson 3 ", "covers loops."]);
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_surfaces_in_band_error() -> anyhow::Result<()> {
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Partial\"},\"done\":false}\n",
            "{\"error\":\"model runner crashed\"}\n"
        );
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;

        let provider = provider_for(mock_server.uri());
        let results: Vec<_> = provider
            .stream("sys", &[Message::user().with_text("hi")])
            .await?
            .collect()
            .await;

        assert_eq!(results[0], Ok("Partial".to_string()));
        assert_eq!(
            results[1],
            Err(ProviderError::ServerError("model runner crashed".to_string()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_open_failure_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let provider = provider_for(mock_server.uri());
        let result = provider
            .stream("sys", &[Message::user().with_text("hi")])
            .await;
        assert!(matches!(result, Err(ProviderError::ServerError(_))));
    }

    #[test]
    fn test_chat_url_defaults() {
        let url = provider_for("localhost".to_string()).chat_url().unwrap();
        assert_eq!(url.as_str(), "http://localhost:11434/api/chat");

        let url = provider_for("http://gpu-box:8080/".to_string())
            .chat_url()
            .unwrap();
        assert_eq!(url.as_str(), "http://gpu-box:8080/api/chat");

        let url = provider_for("https://ollama.example.com".to_string())
            .chat_url()
            .unwrap();
        assert_eq!(url.as_str(), "https://ollama.example.com/api/chat");
    }

    #[test]
    fn test_chat_url_keeps_path_prefix() {
        let url = provider_for("http://proxy/ollama".to_string())
            .chat_url()
            .unwrap();
        assert_eq!(url.as_str(), "http://proxy:11434/ollama/api/chat");

        let url = provider_for("https://gateway.example.com/llm/ollama/".to_string())
            .chat_url()
            .unwrap();
        assert_eq!(url.as_str(), "https://gateway.example.com/llm/ollama/api/chat");
    }

    /// Serve one chunked NDJSON response, writing each part separately.
    async fn serve_chunked(parts: Vec<Vec<u8>>) -> anyhow::Result<String> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Drain the request so the connection closes cleanly
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let length = String::from_utf8_lossy(&request[..end])
                    .to_lowercase()
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:").map(|v| v.trim().to_string()))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            for part in parts {
                socket
                    .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                    .await
                    .unwrap();
                socket.write_all(&part).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });

        Ok(format!("http://{addr}"))
    }

    #[tokio::test]
    async fn test_stream_keeps_characters_split_across_chunks() -> anyhow::Result<()> {
        let line = "{\"message\":{\"content\":\"café\"}}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let host = serve_chunked(vec![line[..split].to_vec(), line[split..].to_vec()]).await?;

        let provider = provider_for(host);
        let fragments: Vec<String> = provider
            .stream("sys", &[Message::user().with_text("hi")])
            .await?
            .try_collect()
            .await?;

        assert_eq!(fragments, vec!["café"]);
        Ok(())
    }

    #[test]
    fn test_invalid_utf8_line_is_parse_error() {
        let result = OllamaProvider::parse_stream_line(b"{\"message\":{\"content\":\"\xff\"}}");
        assert!(matches!(result, Err(ProviderError::ResponseParseError(_))));
    }

    #[test]
    fn test_tool_blocks_render_as_text() {
        let messages = vec![
            Message::assistant().with_tool_request(
                "1",
                crate::tool::ToolCall::new("search_course_content", json!({"query": "loops"})),
            ),
            Message::user().with_tool_response("1", "Loops repeat work."),
        ];
        let spec = OllamaProvider::messages_to_ollama_spec("", &messages);
        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["role"], "assistant");
        assert!(spec[0]["content"]
            .as_str()
            .unwrap()
            .contains("search_course_content"));
        assert_eq!(spec[1]["content"], "Loops repeat work.");
    }
}
