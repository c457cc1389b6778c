use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use confab::cli::Cli;
use confab::llm::CompletionClient;
use confab::settings::{AgentSettings, ProcessEnv, build_settings};
use confab::speech::TranscriptionService;
use confab::speech::stt::WhisperHttp;
use confab::{agent, logging};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match build_settings(&cli, &ProcessEnv) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file; stdout stays clean for the conversation itself.
    let _guard = match logging::init(&settings.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        model = %settings.llm.model_name,
        provider = settings.llm.provider.as_deref().unwrap_or("default"),
        stream = settings.stream_response,
        "starting session"
    );

    tokio::select! {
        result = run(&settings) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "session failed");
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            println!("\nInterrupted.");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: &AgentSettings) -> anyhow::Result<()> {
    let transcriber = WhisperHttp::from_env()?;

    #[cfg(feature = "mic")]
    let source = confab::speech::mic::Microphone::new();
    #[cfg(not(feature = "mic"))]
    let source = confab::speech::DisabledMicrophone;

    let mut speech = TranscriptionService::new(source, transcriber);
    let llm = CompletionClient::new(settings.llm.clone());
    let mut stdout = io::stdout();

    agent::run(settings, &mut speech, &llm, &mut stdout).await?;
    Ok(())
}
