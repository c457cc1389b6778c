use crate::cli::Cli;
use crate::error::{Error, Result};

/// Environment lookup used by settings resolution. Tests substitute a map so
/// precedence can be exercised without touching the process environment.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for std::collections::HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        std::collections::HashMap::get(self, key).cloned()
    }
}

/// Everything the completion call needs. Validated on construction and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub model_name: String,
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub temperature: f64,
    pub timeout_seconds: u64,
}

impl LlmSettings {
    /// Validate and normalize. Empty optional strings are treated as absent
    /// so they never leak into request parameters.
    pub fn new(
        model_name: impl Into<String>,
        provider: Option<String>,
        api_key: Option<String>,
        api_base: Option<String>,
        temperature: f64,
        timeout_seconds: u64,
    ) -> Result<Self> {
        let model_name = model_name.into();
        if model_name.is_empty() {
            return Err(Error::config(
                "LLM model not configured. Set LLM_NAME in .env or pass --model.",
            ));
        }
        if !(0.0..=2.0).contains(&temperature) {
            return Err(Error::config(format!(
                "Temperature must be between 0.0 and 2.0 (got {temperature})."
            )));
        }
        if timeout_seconds == 0 {
            return Err(Error::config(
                "LLM_TIMEOUT must be a positive number of seconds.",
            ));
        }
        Ok(Self {
            model_name,
            provider: non_empty(provider),
            api_key: non_empty(api_key),
            api_base: non_empty(api_base),
            temperature,
            timeout_seconds,
        })
    }
}

/// Resolved run configuration: completion settings plus the run-scoped
/// inputs that decide whether voice prompts happen at all.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub log_level: String,
    pub who: Option<String>,
    pub question: Option<String>,
    pub stream_response: bool,
    pub llm: LlmSettings,
}

const DEFAULT_LOG_LEVEL: &str = "INFO";
const DEFAULT_TEMPERATURE: f64 = 0.0;
const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
const OLLAMA_LOCAL_API_BASE: &str = "http://localhost:11434";

/// Resolve settings from flags and environment. A flag wins over its
/// environment variable, which wins over the built-in default; empty values
/// at either layer count as unset.
pub fn build_settings(cli: &Cli, env: &dyn EnvSource) -> Result<AgentSettings> {
    let model_name = first_present(cli.model.clone(), env.get("LLM_NAME")).ok_or_else(|| {
        Error::config("LLM model not configured. Set LLM_NAME in .env or pass --model.")
    })?;

    let temperature = match cli.temperature {
        Some(value) => value,
        None => parse_env_number(env, "LLM_TEMPERATURE")?.unwrap_or(DEFAULT_TEMPERATURE),
    };

    let timeout_seconds =
        parse_env_number::<u64>(env, "LLM_TIMEOUT")?.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

    let provider = first_present(cli.provider.clone(), env.get("LLM_PROVIDER"));
    let mut api_base = first_present(cli.api_base.clone(), env.get("LLM_API_BASE"));
    // Local ollama needs no explicit base; anything else keeps its own default.
    if provider.as_deref() == Some("ollama") && api_base.is_none() {
        api_base = Some(OLLAMA_LOCAL_API_BASE.into());
    }

    let llm = LlmSettings::new(
        model_name,
        provider,
        first_present(cli.api_key.clone(), env.get("LLM_API_KEY")),
        api_base,
        temperature,
        timeout_seconds,
    )?;

    Ok(AgentSettings {
        log_level: first_present(cli.loglevel.clone(), env.get("LOGLEVEL"))
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.into()),
        who: non_empty(cli.who.clone()),
        question: non_empty(cli.question.clone()),
        stream_response: cli.stream,
        llm,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn first_present(flag: Option<String>, env: Option<String>) -> Option<String> {
    non_empty(flag).or_else(|| non_empty(env))
}

fn parse_env_number<T: std::str::FromStr>(env: &dyn EnvSource, key: &str) -> Result<Option<T>> {
    match non_empty(env.get(key)) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::config(format!("{key} is not a valid number (got {raw:?})."))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(model: &str, temperature: f64, timeout: u64) -> Result<LlmSettings> {
        LlmSettings::new(model, None, None, None, temperature, timeout)
    }

    #[test]
    fn empty_model_is_rejected() {
        let err = settings("", 0.0, 300).unwrap_err();
        assert!(err.to_string().contains("LLM_NAME"));
        assert!(err.to_string().contains("--model"));
    }

    #[test]
    fn temperature_bounds_are_inclusive() {
        assert!(settings("m", 0.0, 300).is_ok());
        assert!(settings("m", 2.0, 300).is_ok());
        assert!(settings("m", -0.1, 300).is_err());
        assert!(settings("m", 2.1, 300).is_err());
    }

    #[test]
    fn temperature_error_names_the_value() {
        let err = settings("m", 2.5, 300).unwrap_err();
        assert!(err.to_string().contains("2.5"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(settings("m", 0.0, 0).is_err());
    }

    #[test]
    fn empty_optionals_become_absent() {
        let llm = LlmSettings::new(
            "m",
            Some(String::new()),
            Some(String::new()),
            Some(String::new()),
            0.0,
            300,
        )
        .unwrap();
        assert!(llm.provider.is_none());
        assert!(llm.api_key.is_none());
        assert!(llm.api_base.is_none());
    }
}
