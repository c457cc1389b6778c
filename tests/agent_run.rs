// End-to-end exchange wiring: prompt assembly, input precedence, and the
// missing-input bail-out.

use std::sync::Mutex;

use async_trait::async_trait;
use confab::llm::{
    ChunkStream, CompletionBackend, CompletionClient, CompletionRoute, Message, Role, StreamChunk,
};
use confab::settings::{AgentSettings, LlmSettings};
use confab::speech::{
    AudioClip, TranscribeError, Transcriber, TranscriptionService, UtteranceSource,
};
use confab::{Result, agent};
use futures::stream;

/// Backend that records the prompt it was given and answers with a fixed
/// chunk sequence.
struct RecordingBackend {
    answer: Vec<StreamChunk>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl RecordingBackend {
    fn new(answer: Vec<StreamChunk>) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for &RecordingBackend {
    async fn stream_completion(
        &self,
        _route: &CompletionRoute,
        messages: &[Message],
    ) -> Result<ChunkStream> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let chunks: Vec<Result<StreamChunk>> = self.answer.clone().into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Voice stack stand-ins. The source yields a fixed clip; the transcriber
/// replays scripted texts.
struct FixedSource;

#[async_trait]
impl UtteranceSource for FixedSource {
    async fn capture(&mut self) -> Result<AudioClip> {
        Ok(AudioClip {
            wav: b"RIFFvoice".to_vec(),
            duration_secs: 0.8,
        })
    }
}

struct VoiceScript {
    texts: Mutex<Vec<std::result::Result<String, TranscribeError>>>,
}

impl VoiceScript {
    fn new(texts: Vec<std::result::Result<String, TranscribeError>>) -> Self {
        Self {
            texts: Mutex::new(texts),
        }
    }
}

#[async_trait]
impl Transcriber for &VoiceScript {
    async fn transcribe(&self, _clip: &AudioClip) -> std::result::Result<String, TranscribeError> {
        self.texts.lock().unwrap().remove(0)
    }
}

/// Backend that fails before producing any chunk.
struct DownBackend;

#[async_trait]
impl CompletionBackend for DownBackend {
    async fn stream_completion(
        &self,
        _route: &CompletionRoute,
        _messages: &[Message],
    ) -> Result<ChunkStream> {
        Err(confab::Error::connection("backend is down"))
    }
}

fn settings(who: Option<&str>, question: Option<&str>, stream: bool) -> AgentSettings {
    AgentSettings {
        log_level: "INFO".into(),
        who: who.map(String::from),
        question: question.map(String::from),
        stream_response: stream,
        llm: LlmSettings::new("test-model", None, None, None, 0.0, 30).unwrap(),
    }
}

fn answer(text: &str) -> Vec<StreamChunk> {
    vec![StreamChunk::ObjectDelta {
        content: Some(text.into()),
    }]
}

#[tokio::test]
async fn preset_inputs_skip_voice_and_reach_the_backend() {
    let backend = RecordingBackend::new(answer("42."));
    let settings = settings(Some("a scientist"), Some("What is the answer?"), false);
    let voice = VoiceScript::new(vec![]);
    let mut speech = TranscriptionService::new(FixedSource, &voice);
    let llm = CompletionClient::with_backend(settings.llm.clone(), &backend);

    let mut out = Vec::new();
    agent::run(&settings, &mut speech, &llm, &mut out).await.unwrap();

    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 1, "exactly one completion call");
    assert_eq!(
        prompts[0],
        vec![
            Message::system("you are a scientist"),
            Message::user("What is the answer?"),
        ]
    );
    assert_eq!(String::from_utf8(out).unwrap(), "42.\n");
}

#[tokio::test]
async fn voice_fills_in_the_missing_inputs() {
    let backend = RecordingBackend::new(answer("Because."));
    let settings = settings(None, None, false);
    let voice = VoiceScript::new(vec![Ok("a poet".into()), Ok("why is the sky blue".into())]);
    let mut speech = TranscriptionService::new(FixedSource, &voice);
    let llm = CompletionClient::with_backend(settings.llm.clone(), &backend);

    let mut out = Vec::new();
    agent::run(&settings, &mut speech, &llm, &mut out).await.unwrap();

    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0][0], Message::system("you are a poet"));
    assert_eq!(prompts[0][1], Message::user("why is the sky blue"));
}

#[tokio::test]
async fn missing_input_ends_the_run_without_a_completion() {
    let backend = RecordingBackend::new(answer("unused"));
    let settings = settings(None, Some("a question"), false);
    let voice = VoiceScript::new(vec![Err(TranscribeError::Unintelligible)]);
    let mut speech = TranscriptionService::new(FixedSource, &voice);
    let llm = CompletionClient::with_backend(settings.llm.clone(), &backend);

    let mut out = Vec::new();
    agent::run(&settings, &mut speech, &llm, &mut out).await.unwrap();

    assert!(backend.prompts().is_empty(), "no completion call may happen");
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Missing input. Please try again.\n"
    );
}

#[tokio::test]
async fn streamed_exchange_echoes_without_a_duplicate_line() {
    let backend = RecordingBackend::new(vec![
        StreamChunk::ObjectDelta {
            content: Some("Hi".into()),
        },
        StreamChunk::ObjectDelta {
            content: Some("!".into()),
        },
    ]);
    let settings = settings(Some("someone"), Some("greet me"), true);
    let voice = VoiceScript::new(vec![]);
    let mut speech = TranscriptionService::new(FixedSource, &voice);
    let llm = CompletionClient::with_backend(settings.llm.clone(), &backend);

    let mut out = Vec::new();
    agent::run(&settings, &mut speech, &llm, &mut out).await.unwrap();

    assert_eq!(String::from_utf8(out).unwrap(), "Hi!\n");
}

#[tokio::test]
async fn completion_failure_is_still_printed_as_the_answer() {
    let settings = settings(Some("someone"), Some("anything"), false);
    let voice = VoiceScript::new(vec![]);
    let mut speech = TranscriptionService::new(FixedSource, &voice);
    let llm = CompletionClient::with_backend(settings.llm.clone(), DownBackend);

    let mut out = Vec::new();
    agent::run(&settings, &mut speech, &llm, &mut out).await.unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Connection error: backend is down\n"
    );
}

#[tokio::test]
async fn streamed_completion_failure_is_still_visible() {
    let settings = settings(Some("someone"), Some("anything"), true);
    let voice = VoiceScript::new(vec![]);
    let mut speech = TranscriptionService::new(FixedSource, &voice);
    let llm = CompletionClient::with_backend(settings.llm.clone(), DownBackend);

    let mut out = Vec::new();
    agent::run(&settings, &mut speech, &llm, &mut out).await.unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Connection error: backend is down\n"
    );
}

#[test]
fn prompt_messages_have_the_expected_roles() {
    let system = Message::system("you are a historian");
    let user = Message::user("Why did Rome fall?");
    assert_eq!(system.role, Role::System);
    assert_eq!(user.role, Role::User);
}
