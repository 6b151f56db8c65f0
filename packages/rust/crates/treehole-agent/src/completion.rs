//! Completion collaborator: turns memory + window into the next assistant reply.

use std::time::Duration;

use async_trait::async_trait;
use treehole_memory::{AnnotatedTurn, PromptContext};

use crate::llm::{LlmClient, LlmError};
use crate::prompt::build_chat_messages;

/// Reply returned when no API key is configured.
pub const OFFLINE_REPLY: &str = "(offline reply) I got your message. Set TREEHOLE_API_KEY to enable real replies; \
     until then I'm running in offline mode.";

/// Everything a completion call sees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Active digest; may be empty.
    pub memory: String,
    /// Recent turns, oldest first.
    pub turns: Vec<AnnotatedTurn>,
}

impl From<PromptContext> for CompletionRequest {
    fn from(context: PromptContext) -> Self {
        Self {
            memory: context.memory,
            turns: context.turns,
        }
    }
}

/// Produces the raw assistant reply (before cleaning and splitting).
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Chat completions over HTTP, bounded by a timeout.
pub struct LlmCompletion {
    client: LlmClient,
    timeout: Duration,
}

impl LlmCompletion {
    pub fn new(client: LlmClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl CompletionBackend for LlmCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let messages = build_chat_messages(&request.memory, &request.turns);
        tracing::debug!(
            model = %self.client.model(),
            messages = messages.len(),
            memory_chars = request.memory.chars().count(),
            "chat completion request"
        );
        match tokio::time::timeout(self.timeout, self.client.chat(&messages)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(LlmError::Service {
                status: None,
                message: format!("no reply within {}s", self.timeout.as_secs()),
            }),
        }
    }
}

/// Fixed reply used when the agent runs without credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineCompletion;

#[async_trait]
impl CompletionBackend for OfflineCompletion {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        Ok(OFFLINE_REPLY.to_string())
    }
}
