//! Query reformulation.
//!
//! Rewrites a raw user query into the short, descriptive register the tags
//! are written in, before it gets embedded. One implementation is selected
//! by configuration; failures are reported to the caller, which falls back
//! to the raw query.

mod ollama;
mod openai;

pub use ollama::OllamaReformulator;
pub use openai::OpenAiReformulator;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ReformulatorConfig, ReformulatorProvider};

/// Instruction sent to the language model; `{query}` is replaced with the raw query.
pub const REWRITE_TEMPLATE: &str = "You rewrite image search queries. Images are indexed by short descriptive tags such as \"sick\", \"painted\" or \"divisible\". Rewrite the query below into a few plain words that describe what a matching image would be tagged with. Reply with the rewritten query only, no explanation and no quotes.\n\nQuery: {query}";

#[derive(Debug, thiserror::Error)]
pub enum ReformulationError {
    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider} request failed: {cause}")]
    Request {
        provider: &'static str,
        cause: String,
    },

    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an unreadable response: {cause}")]
    InvalidResponse {
        provider: &'static str,
        cause: String,
    },

    #[error("{provider} returned an empty rewrite")]
    Empty { provider: &'static str },

    #[error("API key variable {0} is not set")]
    MissingApiKey(String),
}

pub trait QueryReformulator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewrite `raw_query`. The generated text is returned as-is apart
    /// from surrounding whitespace.
    fn rewrite(&self, raw_query: &str) -> Result<String, ReformulationError>;
}

/// Leaves queries untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl QueryReformulator for Passthrough {
    fn name(&self) -> &'static str {
        "none"
    }

    fn rewrite(&self, raw_query: &str) -> Result<String, ReformulationError> {
        Ok(raw_query.to_string())
    }
}

pub fn build_prompt(raw_query: &str) -> String {
    REWRITE_TEMPLATE.replace("{query}", raw_query)
}

/// Build the reformulator selected by `config`.
pub fn from_config(
    config: &ReformulatorConfig,
) -> Result<Arc<dyn QueryReformulator>, ReformulationError> {
    let client = build_http_client(config);

    let reformulator: Arc<dyn QueryReformulator> = match config.provider {
        ReformulatorProvider::None => Arc::new(Passthrough),
        ReformulatorProvider::Ollama => {
            let mut r = OllamaReformulator::new(client);
            if let Some(endpoint) = &config.endpoint {
                r = r.with_endpoint(endpoint);
            }
            if let Some(model) = &config.model {
                r = r.with_model(model);
            }
            Arc::new(r)
        }
        ReformulatorProvider::OpenAi => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| ReformulationError::MissingApiKey(config.api_key_env.clone()))?;
            let mut r = OpenAiReformulator::new(client, api_key);
            if let Some(endpoint) = &config.endpoint {
                r = r.with_endpoint(endpoint);
            }
            if let Some(model) = &config.model {
                r = r.with_model(model);
            }
            Arc::new(r)
        }
    };

    tracing::info!(provider = reformulator.name(), "query reformulation configured");

    Ok(reformulator)
}

/// Blocking HTTP client with the configured timeouts (0 disables a timeout).
pub(crate) fn build_http_client(config: &ReformulatorConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build reformulator HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Map a transport error, logging it with provider context.
fn request_error(provider: &'static str, model: &str, e: reqwest::Error) -> ReformulationError {
    let error_kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_request() {
        "request"
    } else {
        "unknown"
    };
    tracing::warn!(
        provider,
        model,
        error = %e,
        error_kind,
        "reformulation request failed"
    );

    if e.is_timeout() {
        ReformulationError::Timeout { provider }
    } else {
        ReformulationError::Request {
            provider,
            cause: format!("{error_kind} error: {e}"),
        }
    }
}

/// Trim the model output and reject blank rewrites.
fn finish_rewrite(provider: &'static str, text: &str) -> Result<String, ReformulationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ReformulationError::Empty { provider });
    }
    Ok(text.to_string())
}
