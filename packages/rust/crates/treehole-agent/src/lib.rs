//! Treehole companion agent: long single-user dialogue with rolling memory.
//!
//! - Settings: YAML (system + user), environment overrides.
//! - Completion: OpenAI-compatible chat API with the digest and recent window.
//! - Memory: `treehole-memory` consolidates old turns through an LLM summarizer.

#![allow(missing_docs)]

mod agent;
mod completion;
mod config;
mod llm;
mod observability;
mod prompt;
mod reply;
mod resolve;
mod summarizer;

pub use agent::{Agent, AgentParts, TurnReply};
pub use completion::{
    CompletionBackend, CompletionRequest, LlmCompletion, OFFLINE_REPLY, OfflineCompletion,
};
pub use config::{
    AgentConfig, DEFAULT_INFERENCE_URL, DEFAULT_MODEL, LlmSettings, MemoryConfig, MemorySettings,
    RuntimeSettings, default_state_path, load_runtime_settings,
    load_runtime_settings_from_paths, runtime_settings_paths, set_config_home_override,
};
pub use llm::{ChatMessage, LlmClient, LlmError, parse_chat_response};
pub use prompt::{SUMMARIZE_PROMPT, SYSTEM_PROMPT, build_chat_messages, build_summary_input};
pub use reply::{BREAK_DELIMITER, ReplyPlaceholder, clean_reply, reply_parts, split_reply};
pub use summarizer::{LlmSummarizer, OfflineSummarizer};
