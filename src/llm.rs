use crate::error::{Error, Result};
use crate::settings::LlmSettings;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::io::Write;
use std::pin::Pin;
use tracing::{debug, error};

/// Role of one prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request parameters derived from [`LlmSettings`]. An unset optional is
/// omitted entirely; it must never reach the wire as an empty string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteParams {
    pub model: String,
    pub timeout: u64,
    pub stream_timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// One fully-specified way to reach a model, built fresh per completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRoute {
    pub model_name: String,
    pub params: RouteParams,
    pub temperature: f64,
}

/// One increment of a streamed completion, in either of the two shapes
/// backends produce.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Ollama-style chunk carrying visible text and/or reasoning text.
    Mapping {
        response: Option<String>,
        thinking: Option<String>,
    },
    /// OpenAI-style delta chunk.
    ObjectDelta { content: Option<String> },
}

impl StreamChunk {
    /// The user-visible text of this chunk. Reasoning-only chunks contribute
    /// nothing; a chunk carrying both keeps the visible text.
    pub fn content(&self) -> &str {
        match self {
            Self::Mapping { response, thinking } => {
                let response = response.as_deref().unwrap_or("");
                if response.is_empty() && thinking.as_deref().is_some_and(|t| !t.is_empty()) {
                    return "";
                }
                response
            }
            Self::ObjectDelta { content } => content.as_deref().unwrap_or(""),
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Transport seam for streamed completions. The HTTP implementation lives in
/// [`crate::http`]; tests script their own.
#[async_trait]
pub trait CompletionBackend {
    async fn stream_completion(
        &self,
        route: &CompletionRoute,
        messages: &[Message],
    ) -> Result<ChunkStream>;
}

/// Drives one completion end to end: route, stream, accumulate, and fold
/// every failure into a printable string.
pub struct CompletionClient<B> {
    config: LlmSettings,
    backend: B,
}

impl CompletionClient<crate::http::HttpCompletionBackend> {
    pub fn new(config: LlmSettings) -> Self {
        Self::with_backend(config, crate::http::HttpCompletionBackend::new())
    }
}

impl<B: CompletionBackend> CompletionClient<B> {
    pub fn with_backend(config: LlmSettings, backend: B) -> Self {
        Self { config, backend }
    }

    /// Derive the request route from the validated settings.
    pub fn build_route(&self) -> CompletionRoute {
        CompletionRoute {
            model_name: self.config.model_name.clone(),
            params: RouteParams {
                model: self.config.model_name.clone(),
                timeout: self.config.timeout_seconds,
                stream_timeout: self.config.timeout_seconds,
                api_key: self.config.api_key.clone(),
                api_base: self.config.api_base.clone(),
                provider: self.config.provider.clone(),
            },
            temperature: self.config.temperature,
        }
    }

    /// Run one completion and return the full response text. Never fails:
    /// any transport or validation problem comes back as a human-readable
    /// string in place of the response.
    ///
    /// The backend is always asked for a stream. The `stream` flag only
    /// controls whether output is echoed to `out` as it arrives; an echoed
    /// response gets a closing newline, and a failure message is echoed the
    /// same way, so a streamed run always shows its outcome.
    pub async fn generate_response(
        &self,
        messages: &[Message],
        stream: bool,
        out: &mut dyn Write,
    ) -> String {
        let route = self.build_route();
        debug!(
            model = %route.model_name,
            stream,
            messages = messages.len(),
            "requesting completion"
        );

        let mut chunks = match self.backend.stream_completion(&route, messages).await {
            Ok(chunks) => chunks,
            Err(e) => return self.report_failure(e, stream, false, out),
        };

        let mut response = String::new();
        while let Some(next) = chunks.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(e) => return self.report_failure(e, stream, !response.is_empty(), out),
            };
            let content = chunk.content();
            if content.is_empty() {
                continue;
            }
            if stream {
                let _ = write!(out, "{content}");
                let _ = out.flush();
            }
            response.push_str(content);
        }

        if stream && !response.is_empty() {
            let _ = writeln!(out);
        }
        debug!(chars = response.len(), "completion finished");
        response
    }

    /// Fold a failure into the printable result, logging it at the boundary.
    /// A streamed run has no later print, so the message is echoed here on
    /// its own line; `mid_line` closes a partially echoed fragment first.
    fn report_failure(
        &self,
        err: Error,
        stream: bool,
        mid_line: bool,
        out: &mut dyn Write,
    ) -> String {
        error!(model = %self.config.model_name, error = %err, "completion failed");
        let message = match err {
            Error::Connection(msg) => format!("Connection error: {msg}"),
            Error::InvalidRequest(msg) => format!("Invalid request: {msg}"),
            other => format!("Completion failed: {other}"),
        };
        if stream {
            if mid_line {
                let _ = writeln!(out);
            }
            let _ = writeln!(out, "{message}");
            let _ = out.flush();
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_chunk_keeps_visible_text() {
        let chunk = StreamChunk::Mapping {
            response: Some("Hello".into()),
            thinking: None,
        };
        assert_eq!(chunk.content(), "Hello");
    }

    #[test]
    fn reasoning_only_chunk_is_silent() {
        let chunk = StreamChunk::Mapping {
            response: None,
            thinking: Some("working it out".into()),
        };
        assert_eq!(chunk.content(), "");
    }

    #[test]
    fn visible_text_wins_over_reasoning() {
        let chunk = StreamChunk::Mapping {
            response: Some("answer".into()),
            thinking: Some("scratchpad".into()),
        };
        assert_eq!(chunk.content(), "answer");
    }

    #[test]
    fn empty_mapping_chunk_is_silent() {
        let chunk = StreamChunk::Mapping {
            response: None,
            thinking: None,
        };
        assert_eq!(chunk.content(), "");
    }

    #[test]
    fn delta_without_content_is_silent() {
        let chunk = StreamChunk::ObjectDelta { content: None };
        assert_eq!(chunk.content(), "");
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_value(Message::system("you are a poet")).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "you are a poet");
        assert_eq!(
            serde_json::to_value(Message::user("hi")).unwrap()["role"],
            "user"
        );
        assert_eq!(
            serde_json::to_value(Message::assistant("hello")).unwrap()["role"],
            "assistant"
        );
    }
}
