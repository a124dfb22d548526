//! Ollama (local) reformulator.

use serde::{Deserialize, Serialize};

use super::{build_prompt, finish_rewrite, request_error, QueryReformulator, ReformulationError};

const PROVIDER: &str = "ollama";

pub struct OllamaReformulator {
    endpoint: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OllamaReformulator {
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";
    pub const DEFAULT_MODEL: &'static str = "llama3.2";

    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self {
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            client,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl QueryReformulator for OllamaReformulator {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn rewrite(&self, raw_query: &str) -> Result<String, ReformulationError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: build_prompt(raw_query),
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&request)
            .send()
            .map_err(|e| request_error(PROVIDER, &self.model, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            tracing::warn!(
                provider = PROVIDER,
                model = %self.model,
                status = %status,
                "reformulation API returned error status"
            );
            return Err(ReformulationError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body,
            });
        }

        let response: GenerateResponse =
            response
                .json()
                .map_err(|e| ReformulationError::InvalidResponse {
                    provider: PROVIDER,
                    cause: e.to_string(),
                })?;

        finish_rewrite(PROVIDER, &response.response)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}
