//! Agent: one conversation turn = remember user turn, complete with memory, remember reply.

mod persistence;

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use treehole_memory::{
    CancellationToken, ConversationMemory, LocalMemoryStateStore, MemoryStateStore, MemoryStatus,
    Role, Skip, Summarizer, TriggerResult,
};

use crate::completion::{CompletionBackend, LlmCompletion, OfflineCompletion};
use crate::config::AgentConfig;
use crate::llm::LlmClient;
use crate::observability::AgentEvent;
use crate::reply::{ReplyPlaceholder, reply_parts};
use crate::summarizer::{LlmSummarizer, OfflineSummarizer};

use persistence::{StatePersister, start_memory};

/// Outcome of one turn as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    /// Cleaned reply utterances, each stored as its own assistant turn.
    pub parts: Vec<String>,
    /// Set when completion failed; never stored in memory.
    pub placeholder: Option<ReplyPlaceholder>,
}

impl TurnReply {
    /// Lines to display: the parts, or the placeholder text.
    pub fn display_lines(&self) -> Vec<&str> {
        match self.placeholder {
            Some(placeholder) => vec![placeholder.text()],
            None => self.parts.iter().map(String::as_str).collect(),
        }
    }
}

/// Collaborators for [`Agent::with_parts`].
pub struct AgentParts {
    pub completion: Arc<dyn CompletionBackend>,
    pub summarizer: Arc<dyn Summarizer>,
    pub state_store: Option<Arc<dyn MemoryStateStore>>,
}

/// Companion agent over one long conversation.
pub struct Agent {
    config: AgentConfig,
    memory: Arc<ConversationMemory>,
    completion: Arc<dyn CompletionBackend>,
    persister: Option<StatePersister>,
    cycle_saver: Option<JoinHandle<()>>,
}

impl Agent {
    /// Build from config: HTTP collaborators when an API key is present,
    /// offline ones otherwise; restores saved state when `memory.state_path` is set.
    /// Must run inside a tokio runtime.
    pub fn from_config(config: AgentConfig) -> Result<Self> {
        let (completion, summarizer): (Arc<dyn CompletionBackend>, Arc<dyn Summarizer>) =
            if config.has_api_key() {
                let chat = LlmClient::new(
                    config.inference_url.clone(),
                    config.model.clone(),
                    config.api_key.clone(),
                );
                let summary = LlmClient::new(
                    config.inference_url.clone(),
                    config.summary_model.clone(),
                    config.api_key.clone(),
                );
                (
                    Arc::new(LlmCompletion::new(chat, config.completion_timeout())),
                    Arc::new(LlmSummarizer::new(summary)),
                )
            } else {
                tracing::warn!("no API key configured; replies and memory run in offline mode");
                (Arc::new(OfflineCompletion), Arc::new(OfflineSummarizer))
            };
        let state_store = config.memory.state_path.as_ref().map(|path| {
            Arc::new(
                LocalMemoryStateStore::new(path.clone())
                    .with_strict_startup(config.memory.strict_startup),
            ) as Arc<dyn MemoryStateStore>
        });
        Self::with_parts(
            config,
            AgentParts {
                completion,
                summarizer,
                state_store,
            },
        )
    }

    /// Build with explicit collaborators. Must run inside a tokio runtime.
    pub fn with_parts(config: AgentConfig, parts: AgentParts) -> Result<Self> {
        let AgentParts {
            completion,
            summarizer,
            state_store,
        } = parts;
        let started = start_memory(config.memory.consolidation(), summarizer, state_store.as_ref())?;
        let memory = Arc::new(started.memory);
        let persister = state_store
            .zip(started.saved_turns)
            .map(|(store, saved_turns)| StatePersister::new(store, saved_turns));
        let cycle_saver = persister
            .as_ref()
            .map(|persister| persister.spawn_cycle_saver(&memory));
        Ok(Self {
            config,
            memory,
            completion,
            persister,
            cycle_saver,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one turn.
    ///
    /// Invalid input is returned as an error with nothing stored. Completion
    /// failures are not errors: they yield a placeholder and leave only the
    /// user turn in memory.
    pub async fn run_turn(&self, text: &str) -> Result<TurnReply> {
        self.memory.append(Role::User, text)?;
        let context = self.memory.context(self.config.window_turns());
        let window_len = context.turns.len();
        let memory_chars = context.memory.chars().count();

        let reply = match self.completion.complete(&context.into()).await {
            Ok(raw) => {
                let parts = reply_parts(&raw);
                if parts.is_empty() {
                    tracing::warn!(
                        event = AgentEvent::CompletionFailed.as_str(),
                        "completion returned no usable reply"
                    );
                    TurnReply {
                        parts,
                        placeholder: Some(ReplyPlaceholder::Unavailable),
                    }
                } else {
                    for part in &parts {
                        self.memory.append(Role::Assistant, part.as_str())?;
                    }
                    TurnReply {
                        parts,
                        placeholder: None,
                    }
                }
            }
            Err(error) => {
                let placeholder = ReplyPlaceholder::from(&error);
                tracing::warn!(
                    event = AgentEvent::CompletionFailed.as_str(),
                    placeholder = placeholder.as_str(),
                    error = %error,
                    "completion failed"
                );
                TurnReply {
                    parts: Vec::new(),
                    placeholder: Some(placeholder),
                }
            }
        };

        tracing::debug!(
            event = AgentEvent::TurnCompleted.as_str(),
            window_len,
            memory_chars,
            parts = reply.parts.len(),
            placeholder = reply.placeholder.map(ReplyPlaceholder::as_str),
            "turn completed"
        );
        self.persist("turn").await;
        Ok(reply)
    }

    /// Manual consolidation; see [`ConversationMemory::consolidate_now`].
    ///
    /// Waits for any automatic cycle first (including the catch-up started on
    /// restore), so the manual run is not skipped as in flight.
    pub async fn consolidate_now(&self, cancel: &CancellationToken) -> Result<TriggerResult> {
        let result = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = self.memory.wait_idle() => {}
            }
            let result = self.memory.consolidate_now(cancel).await?;
            if !matches!(result, TriggerResult::Skipped(Skip::InFlight)) || cancel.is_cancelled() {
                break result;
            }
        };
        tracing::info!(
            event = AgentEvent::ManualConsolidation.as_str(),
            result = ?result,
            "manual consolidation finished"
        );
        Ok(result)
    }

    pub fn memory_status(&self) -> MemoryStatus {
        self.memory.status()
    }

    /// Active digest (empty when nothing was consolidated yet).
    pub fn active_memory(&self) -> String {
        self.memory.active_memory()
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Wait for running or scheduled consolidation to finish.
    pub async fn wait_for_consolidation(&self) {
        self.memory.wait_idle().await;
    }

    /// Wait for consolidation to settle, then save state.
    pub async fn flush(&self) -> Result<()> {
        self.memory.wait_idle().await;
        match &self.persister {
            Some(persister) => persister.save(&self.memory, "flush").await,
            None => Ok(()),
        }
    }

    async fn persist(&self, reason: &str) {
        if let Some(persister) = &self.persister {
            // Failures are logged by the persister; the turn itself succeeded.
            let _ = persister.save(&self.memory, reason).await;
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if let Some(task) = self.cycle_saver.take() {
            task.abort();
        }
    }
}
