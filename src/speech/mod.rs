//! Voice input: capture one utterance, transcribe it remotely, and retry
//! only when the transport drops mid-request.

#[cfg(feature = "mic")]
pub mod mic;
pub mod stt;

use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// One captured utterance, encoded as 16 kHz mono 16-bit WAV.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub wav: Vec<u8>,
    pub duration_secs: f32,
}

/// Microphone-like capability: block until one utterance has been spoken.
#[async_trait]
pub trait UtteranceSource {
    async fn capture(&mut self) -> Result<AudioClip>;
}

/// Remote speech-to-text capability.
#[async_trait]
pub trait Transcriber {
    async fn transcribe(&self, clip: &AudioClip) -> std::result::Result<String, TranscribeError>;
}

/// How one transcription attempt failed. Only `Disconnected` is worth
/// retrying; the other two cannot improve with the same audio.
#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    /// The service could not make out any words.
    #[error("could not understand audio")]
    Unintelligible,
    /// The service refused the request (bad key, quota, malformed payload).
    #[error("could not request results: {0}")]
    Request(String),
    /// The transport dropped before a result arrived.
    #[error("remote service disconnected: {0}")]
    Disconnected(String),
}

const MAX_ATTEMPTS: u32 = 3;

/// Pairs an utterance source with a transcriber and owns the retry policy
/// between them.
pub struct TranscriptionService<S, T> {
    source: S,
    transcriber: T,
}

impl<S: UtteranceSource, T: Transcriber> TranscriptionService<S, T> {
    pub fn new(source: S, transcriber: T) -> Self {
        Self {
            source,
            transcriber,
        }
    }

    /// Capture one utterance and transcribe it. The audio is captured
    /// exactly once; transport drops retry the same clip up to three
    /// attempts in total. `Ok(None)` means no usable text was produced.
    pub async fn listen_and_transcribe(&mut self, prompt: &str) -> Result<Option<String>> {
        println!("{prompt} (listening...)");
        let clip = self.source.capture().await?;
        debug!(
            bytes = clip.wav.len(),
            duration_secs = clip.duration_secs,
            "utterance captured"
        );

        for attempt in 1..=MAX_ATTEMPTS {
            match self.transcriber.transcribe(&clip).await {
                Ok(text) => {
                    info!(attempt, text = %text, "transcription resolved");
                    println!("You said: {text}");
                    return Ok(Some(text));
                }
                Err(TranscribeError::Unintelligible) => {
                    warn!(attempt, "audio was unintelligible, not retrying");
                    println!("Could not understand audio.");
                    break;
                }
                Err(TranscribeError::Request(reason)) => {
                    warn!(attempt, %reason, "transcription request refused, not retrying");
                    println!("Could not request results: {reason}");
                    break;
                }
                Err(TranscribeError::Disconnected(reason)) => {
                    warn!(attempt, %reason, "transcription service disconnected");
                    println!("Attempt {attempt}/{MAX_ATTEMPTS}: remote service disconnected.");
                    if attempt == MAX_ATTEMPTS {
                        warn!("transcription retries exhausted");
                        println!("Failed to reach the transcription service after {MAX_ATTEMPTS} attempts.");
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Stand-in source for builds without the `mic` feature.
pub struct DisabledMicrophone;

#[async_trait]
impl UtteranceSource for DisabledMicrophone {
    async fn capture(&mut self) -> Result<AudioClip> {
        Err(Error::audio(
            "microphone support was not compiled in; rebuild with --features mic or pass --who and --question",
        ))
    }
}
