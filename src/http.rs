use crate::error::{Error, Result};
use crate::llm::{ChunkStream, CompletionBackend, CompletionRoute, Message, Role, StreamChunk};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const OPENAI_DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_API_BASE: &str = "http://localhost:11434";

/// Streaming completion transport. Stateless: every call builds its own
/// client so the route's timeouts apply and nothing is pooled across runs.
pub struct HttpCompletionBackend;

impl HttpCompletionBackend {
    pub fn new() -> Self {
        Self
    }

    fn client(route: &CompletionRoute) -> Result<Client> {
        Client::builder()
            .timeout(Duration::from_secs(route.params.timeout))
            .read_timeout(Duration::from_secs(route.params.stream_timeout))
            .user_agent(concat!("confab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::connection(e.to_string()))
    }
}

impl Default for HttpCompletionBackend {
    fn default() -> Self {
        Self::new()
    }
}

// -- OpenAI-compatible wire format (SSE) --

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    temperature: f64,
}

#[derive(Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Deserialize, Default)]
struct OpenAiDelta {
    content: Option<String>,
}

// -- Ollama wire format (NDJSON) --

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Deserialize)]
struct OllamaChunk {
    response: Option<String>,
    thinking: Option<String>,
    #[serde(default)]
    done: bool,
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn stream_completion(
        &self,
        route: &CompletionRoute,
        messages: &[Message],
    ) -> Result<ChunkStream> {
        match route.params.provider.as_deref() {
            Some("ollama") => self.stream_ollama(route, messages).await,
            _ => self.stream_openai(route, messages).await,
        }
    }
}

impl HttpCompletionBackend {
    /// `POST {base}/chat/completions` with `stream: true`; the body is SSE
    /// `data:` lines closed by a `[DONE]` sentinel.
    async fn stream_openai(
        &self,
        route: &CompletionRoute,
        messages: &[Message],
    ) -> Result<ChunkStream> {
        let base = route
            .params
            .api_base
            .as_deref()
            .unwrap_or(OPENAI_DEFAULT_API_BASE);
        let url = format!("{}/chat/completions", base.trim_end_matches('/'));
        let body = OpenAiRequest {
            model: &route.params.model,
            messages,
            stream: true,
            temperature: route.temperature,
        };

        debug!(%url, model = %route.params.model, "opening completion stream");
        let mut request = Self::client(route)?.post(&url).json(&body);
        if let Some(key) = &route.params.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }
        let response = request.send().await.map_err(classify_send)?;
        let response = check_status(response).await?;

        let stream = try_stream! {
            let mut lines = LineBuffer::default();
            let mut bytes = response.bytes_stream();
            'body: while let Some(next) = bytes.next().await {
                let data = next.map_err(|e| Error::connection(format!("stream interrupted: {e}")))?;
                for line in lines.push(&data) {
                    let payload = match line.strip_prefix("data: ") {
                        Some(payload) => payload,
                        None => continue,
                    };
                    if payload == "[DONE]" {
                        break 'body;
                    }
                    match serde_json::from_str::<OpenAiChunk>(payload) {
                        Ok(chunk) => {
                            let content =
                                chunk.choices.into_iter().next().and_then(|c| c.delta.content);
                            yield StreamChunk::ObjectDelta { content };
                        }
                        Err(e) => warn!(error = %e, "skipping malformed stream line"),
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    /// `POST {base}/api/generate`; the body is one JSON object per line with
    /// `response`/`thinking` fragments and a final `done: true` object.
    async fn stream_ollama(
        &self,
        route: &CompletionRoute,
        messages: &[Message],
    ) -> Result<ChunkStream> {
        let base = route
            .params
            .api_base
            .as_deref()
            .unwrap_or(OLLAMA_DEFAULT_API_BASE);
        let url = format!("{}/api/generate", base.trim_end_matches('/'));

        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let prompt: Vec<&str> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let body = OllamaRequest {
            model: &route.params.model,
            prompt: prompt.join("\n"),
            system: (!system.is_empty()).then(|| system.join("\n")),
            stream: true,
            options: OllamaOptions {
                temperature: route.temperature,
            },
        };

        debug!(%url, model = %route.params.model, "opening completion stream");
        let mut request = Self::client(route)?.post(&url).json(&body);
        if let Some(key) = &route.params.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }
        let response = request.send().await.map_err(classify_send)?;
        let response = check_status(response).await?;

        let stream = try_stream! {
            let mut lines = LineBuffer::default();
            let mut bytes = response.bytes_stream();
            'body: while let Some(next) = bytes.next().await {
                let data = next.map_err(|e| Error::connection(format!("stream interrupted: {e}")))?;
                for line in lines.push(&data) {
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<OllamaChunk>(&line) {
                        Ok(chunk) => {
                            let done = chunk.done;
                            yield StreamChunk::Mapping {
                                response: chunk.response,
                                thinking: chunk.thinking,
                            };
                            if done {
                                break 'body;
                            }
                        }
                        Err(e) => warn!(error = %e, "skipping malformed stream line"),
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Send-phase failures: a request we could not even build is a validation
/// problem; everything else is connectivity.
fn classify_send(err: reqwest::Error) -> Error {
    if err.is_builder() {
        Error::invalid_request(err.to_string())
    } else {
        Error::connection(err.to_string())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    warn!(%status, body = %body, "completion endpoint rejected the request");
    if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(Error::invalid_request(format!("HTTP {status}: {body}")))
    } else {
        Err(Error::api_with_status(
            extract_domain(&url),
            body,
            status.as_u16(),
        ))
    }
}

fn extract_domain(url: &str) -> String {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("unknown")
        .to_string()
}

/// Splits a byte stream into complete lines, holding the trailing partial
/// line until more bytes arrive. Decoding happens per complete line, so a
/// code point cut in half by a network chunk boundary survives intact.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(
                String::from_utf8_lossy(&line)
                    .trim_end_matches(['\n', '\r'])
                    .to_string(),
            );
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_holds_partial_lines() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        assert_eq!(buffer.push(b": 1}\n"), vec!["data: {\"a\": 1}"]);
    }

    #[test]
    fn line_buffer_splits_multiple_lines() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(b"one\r\ntwo\n\nthree");
        assert_eq!(lines, vec!["one", "two", ""]);
        assert_eq!(buffer.push(b"\n"), vec!["three"]);
    }

    #[test]
    fn line_buffer_reassembles_split_code_points() {
        let mut buffer = LineBuffer::default();
        let bytes = "café\n".as_bytes();
        // "é" is two bytes; cut between them.
        assert!(buffer.push(&bytes[..4]).is_empty());
        assert_eq!(buffer.push(&bytes[4..]), vec!["café"]);
    }

    #[test]
    fn domain_extraction_tolerates_odd_urls() {
        assert_eq!(extract_domain("https://api.openai.com/v1/x"), "api.openai.com");
        assert_eq!(extract_domain("http://localhost:11434/api"), "localhost:11434");
        assert_eq!(extract_domain("not a url"), "unknown");
    }

    #[test]
    fn openai_chunk_parses_delta_content() {
        let chunk: OpenAiChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap();
        let content = chunk.choices.into_iter().next().and_then(|c| c.delta.content);
        assert_eq!(content.as_deref(), Some("Hi"));
    }

    #[test]
    fn openai_chunk_tolerates_missing_fields() {
        let chunk: OpenAiChunk = serde_json::from_str(r#"{"choices":[{"delta":{}}]}"#).unwrap();
        let content = chunk.choices.into_iter().next().and_then(|c| c.delta.content);
        assert!(content.is_none());
    }

    #[test]
    fn ollama_chunk_parses_response_and_thinking() {
        let chunk: OllamaChunk = serde_json::from_str(
            r#"{"model":"m","response":"Hi","thinking":"hmm","done":false}"#,
        )
        .unwrap();
        assert_eq!(chunk.response.as_deref(), Some("Hi"));
        assert_eq!(chunk.thinking.as_deref(), Some("hmm"));
        assert!(!chunk.done);
    }

    #[test]
    fn ollama_final_chunk_marks_done() {
        let chunk: OllamaChunk = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(chunk.response.is_none());
        assert!(chunk.done);
    }
}
