//! LLM client: OpenAI-compatible chat completions, non-streaming.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One chat message in OpenAI format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Failures of a chat completion call, classified for user-facing handling.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP 429.
    #[error("inference service rate limited the request: {0}")]
    RateLimited(String),
    /// HTTP 400.
    #[error("inference service rejected the request: {0}")]
    MalformedRequest(String),
    /// Any other non-2xx status, or a timeout (`status` is `None`).
    #[error("inference service error ({}): {message}", status_label(.status))]
    Service {
        status: Option<u16>,
        message: String,
    },
    #[error("inference transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("inference response parse error: {0}")]
    Decode(String),
    #[error("inference response has no choices")]
    EmptyChoices,
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "timeout".to_string(), |status| status.to_string())
}

impl LlmError {
    /// Map an unsuccessful HTTP status and body to an error.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited(body),
            400 => Self::MalformedRequest(body),
            _ => Self::Service {
                status: Some(status),
                message: body,
            },
        }
    }
}

/// Request body for chat completions (OpenAI format).
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// Response: choices[0].message.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: AssistantMessage,
    #[serde(default)]
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// HTTP client for chat completions.
#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    inference_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn new(inference_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            inference_url,
            model,
            api_key,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send messages; returns the first choice's content (empty when the model sent none).
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            stream: false,
        };
        let mut req = self
            .client
            .post(&self.inference_url)
            .json(&body)
            .header("Content-Type", "application/json");
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                model = %self.model,
                body = %text,
                "chat completion failed"
            );
            return Err(LlmError::from_status(status.as_u16(), text));
        }
        parse_chat_response(&text)
    }
}

/// Extract the first choice's content from a chat completions response body.
pub fn parse_chat_response(text: &str) -> Result<String, LlmError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(text)
        .map_err(|e| LlmError::Decode(format!("{e}; body: {text}")))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyChoices)?;
    Ok(choice.message.content.unwrap_or_default())
}
