//! Whisper-compatible HTTP transcription: multipart upload of one WAV clip
//! to an `/audio/transcriptions` endpoint.

use super::{AudioClip, TranscribeError, Transcriber};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{header, multipart};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "whisper-1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for OpenAI's transcription endpoint and the local servers that
/// mirror it.
pub struct WhisperHttp {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
}

impl WhisperHttp {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("confab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::connection(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
        })
    }

    /// Build from `STT_API_BASE`, `STT_API_KEY` and `STT_MODEL`, falling
    /// back to `OPENAI_API_KEY` for the key.
    pub fn from_env() -> Result<Self> {
        let api_base = std::env::var("STT_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into());
        let api_key = std::env::var("STT_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());
        Self::new(api_base, api_key, model)
    }
}

#[async_trait]
impl Transcriber for WhisperHttp {
    async fn transcribe(&self, clip: &AudioClip) -> std::result::Result<String, TranscribeError> {
        debug!(
            bytes = clip.wav.len(),
            model = %self.model,
            "sending transcription request"
        );

        let form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(clip.wav.clone())
                    .file_name("utterance.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| TranscribeError::Request(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let url = format!("{}/audio/transcriptions", self.api_base);
        let mut request = self.client.post(&url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "transcription service refused the request");
            return Err(TranscribeError::Request(format!("HTTP {status}: {body}")));
        }

        let parsed: TranscriptionResponse = response.json().await.map_err(classify_transport)?;
        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            return Err(TranscribeError::Unintelligible);
        }
        Ok(text)
    }
}

/// Connection-level failures are transient and retried upstream; anything
/// else counts as a refused request.
fn classify_transport(err: reqwest::Error) -> TranscribeError {
    if err.is_connect() || err.is_timeout() || err.is_body() || err.is_decode() {
        TranscribeError::Disconnected(err.to_string())
    } else {
        TranscribeError::Request(err.to_string())
    }
}
