//! OpenAI-compatible chat completion backend.
//!
//! Works against any server exposing `/v1/chat/completions`, including a local
//! Ollama instance.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{CompletionBackend, CompletionRequest};
use crate::error::ReasoningError;
use crate::types::ChatRole;

/// Error code the API uses when the prompt does not fit the context window
const CONTEXT_LENGTH_CODE: &str = "context_length_exceeded";

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

pub struct OpenAiBackend {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Map a non-success HTTP answer onto the failure taxonomy
fn classify_failure(status: StatusCode, body: &str) -> ReasoningError {
    let parsed = serde_json::from_str::<WireErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .map(|b| b.error.message.clone())
        .unwrap_or_else(|| body.chars().take(200).collect());

    let context_exceeded = parsed
        .as_ref()
        .and_then(|b| b.error.code.as_deref())
        .is_some_and(|code| code == CONTEXT_LENGTH_CODE);

    if status == StatusCode::PAYLOAD_TOO_LARGE || context_exceeded {
        ReasoningError::PromptTooLarge(message)
    } else if status.is_server_error() {
        ReasoningError::BackendUnreachable(format!("HTTP {}: {}", status, message))
    } else {
        ReasoningError::BackendRejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    #[instrument(skip(self, request), fields(model = %self.model, turns = request.turns.len()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ReasoningError> {
        let url = format!("{}/v1/chat/completions", self.endpoint);

        let mut messages = vec![WireMessage {
            role: "system",
            content: &request.system,
        }];
        messages.extend(request.turns.iter().map(|turn| WireMessage {
            role: match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: &turn.content,
        }));

        let body = WireRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut http = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            http = http.bearer_auth(api_key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| ReasoningError::BackendUnreachable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ReasoningError::BackendUnreachable(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_failure(status, &text));
        }

        let parsed: WireResponse =
            serde_json::from_str(&text).map_err(|e| ReasoningError::BackendRejected {
                status: status.as_u16(),
                message: format!("unreadable completion: {}", e),
            })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ReasoningError::BackendRejected {
                status: status.as_u16(),
                message: "response carried no completion".to_string(),
            })?;

        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}
