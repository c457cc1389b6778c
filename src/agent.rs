// Conversation orchestration: collect who/question, assemble prompt, complete.

use crate::error::Result;
use crate::llm::{CompletionBackend, CompletionClient, Message};
use crate::settings::AgentSettings;
use crate::speech::{Transcriber, TranscriptionService, UtteranceSource};
use std::io::Write;
use tracing::{debug, info};

const WHO_PROMPT: &str = "Who do you want to speak to?";
const QUESTION_PROMPT: &str = "What is the problem?";

/// Run one question/answer exchange.
///
/// Explicit `--who`/`--question` values win; anything missing is collected
/// by voice. Both inputs are collected before either is checked, and if one
/// still came back empty the run ends without a completion call.
pub async fn run<S, T, B>(
    settings: &AgentSettings,
    speech: &mut TranscriptionService<S, T>,
    llm: &CompletionClient<B>,
    out: &mut dyn Write,
) -> Result<()>
where
    S: UtteranceSource,
    T: Transcriber,
    B: CompletionBackend,
{
    let who = resolve_input(settings.who.as_deref(), WHO_PROMPT, speech).await?;
    let question = resolve_input(settings.question.as_deref(), QUESTION_PROMPT, speech).await?;

    let (Some(who), Some(question)) = (who, question) else {
        info!("missing input, ending run without a completion call");
        writeln!(out, "Missing input. Please try again.")?;
        return Ok(());
    };

    let messages = vec![
        Message::system(format!("you are {who}")),
        Message::user(question),
    ];
    debug!(?messages, "prompt assembled");

    let response = llm
        .generate_response(&messages, settings.stream_response, out)
        .await;

    // A streamed run already wrote its output, answer and failure alike.
    if !settings.stream_response {
        writeln!(out, "{response}")?;
    }
    info!("exchange complete");
    Ok(())
}

async fn resolve_input<S, T>(
    explicit: Option<&str>,
    prompt: &str,
    speech: &mut TranscriptionService<S, T>,
) -> Result<Option<String>>
where
    S: UtteranceSource,
    T: Transcriber,
{
    match explicit {
        Some(value) => Ok(Some(value.to_string())),
        None => speech.listen_and_transcribe(prompt).await,
    }
}
