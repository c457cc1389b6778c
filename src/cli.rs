use clap::Parser;

/// Command-line surface. Every field is optional here; precedence against
/// environment variables and defaults is resolved in [`crate::settings`].
#[derive(Debug, Parser)]
#[command(
    name = "confab",
    version,
    about = "Ask a question by voice or flags and stream back the model's answer"
)]
pub struct Cli {
    /// Logging level: DEBUG, INFO, WARNING, ERROR
    #[arg(long)]
    pub loglevel: Option<String>,

    /// Model to use for the completion
    #[arg(long)]
    pub model: Option<String>,

    /// LLM provider, e.g. openai or ollama
    #[arg(long)]
    pub provider: Option<String>,

    /// API key for the LLM request
    #[arg(long)]
    pub api_key: Option<String>,

    /// Custom API base URL for the provider
    #[arg(long)]
    pub api_base: Option<String>,

    /// Who do you want to speak to? Skips the first voice prompt.
    #[arg(long)]
    pub who: Option<String>,

    /// The question to ask. Skips the second voice prompt.
    #[arg(long)]
    pub question: Option<String>,

    /// Echo the response to stdout as it arrives
    #[arg(long)]
    pub stream: bool,

    /// Sampling temperature, between 0.0 and 2.0
    #[arg(long)]
    pub temperature: Option<f64>,
}
