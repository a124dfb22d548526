//! OpenAI-compatible chat completions reformulator.

use serde::{Deserialize, Serialize};

use super::{build_prompt, finish_rewrite, request_error, QueryReformulator, ReformulationError};

const PROVIDER: &str = "openai";

pub struct OpenAiReformulator {
    api_key: String,
    endpoint: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OpenAiReformulator {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    pub fn new(client: reqwest::blocking::Client, api_key: String) -> Self {
        Self {
            api_key,
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

impl QueryReformulator for OpenAiReformulator {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn rewrite(&self, raw_query: &str) -> Result<String, ReformulationError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: build_prompt(raw_query),
            }],
            max_tokens: 64,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
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

        let response: ChatCompletionResponse =
            response
                .json()
                .map_err(|e| ReformulationError::InvalidResponse {
                    provider: PROVIDER,
                    cause: e.to_string(),
                })?;

        let content = first_choice(response)?;
        finish_rewrite(PROVIDER, &content)
    }
}

fn first_choice(response: ChatCompletionResponse) -> Result<String, ReformulationError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(ReformulationError::InvalidResponse {
            provider: PROVIDER,
            cause: "no choices in response".to_string(),
        })
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
