//! Summarization collaborators plugged into the consolidation engine.

use async_trait::async_trait;
use treehole_memory::{AnnotatedTurn, Role, Summarizer};

use crate::llm::{ChatMessage, LlmClient};
use crate::prompt::{SUMMARIZE_PROMPT, build_summary_input};

const OFFLINE_LINE_MAX_CHARS: usize = 160;
const OFFLINE_MAX_LINES: usize = 40;
const OFFLINE_EMPTY_DIGEST: &str = "(nothing notable yet)";

/// Memory keeper backed by the chat completions API.
pub struct LlmSummarizer {
    client: LlmClient,
}

impl LlmSummarizer {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, old_memory: &str, batch: &[AnnotatedTurn]) -> anyhow::Result<String> {
        let messages = [
            ChatMessage::system(SUMMARIZE_PROMPT),
            ChatMessage::user(build_summary_input(old_memory, batch)),
        ];
        tracing::debug!(
            model = %self.client.model(),
            batch_len = batch.len(),
            old_memory_chars = old_memory.chars().count(),
            "summarization request"
        );
        let digest = self.client.chat(&messages).await?;
        Ok(digest)
    }
}

/// Extractive digest used without credentials: the prior digest followed by
/// one dated line per user turn, keeping the newest lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineSummarizer;

#[async_trait]
impl Summarizer for OfflineSummarizer {
    async fn summarize(&self, old_memory: &str, batch: &[AnnotatedTurn]) -> anyhow::Result<String> {
        Ok(extractive_digest(old_memory, batch))
    }
}

pub(crate) fn extractive_digest(old_memory: &str, batch: &[AnnotatedTurn]) -> String {
    let mut lines = old_memory
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    lines.extend(
        batch
            .iter()
            .filter(|turn| turn.role == Role::User)
            .map(|turn| {
                format!(
                    "- [{}] {}",
                    turn.label,
                    compact_single_line(&turn.content, OFFLINE_LINE_MAX_CHARS)
                )
            }),
    );
    if lines.is_empty() {
        lines.push(OFFLINE_EMPTY_DIGEST.to_string());
    }
    let skip = lines.len().saturating_sub(OFFLINE_MAX_LINES);
    lines.split_off(skip).join("\n")
}

fn compact_single_line(input: &str, max_chars: usize) -> String {
    let normalized = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() <= max_chars {
        return normalized;
    }
    let keep = max_chars.saturating_sub(3);
    let mut out = normalized.chars().take(keep).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: Role, content: &str) -> AnnotatedTurn {
        AnnotatedTurn {
            role,
            content: content.to_string(),
            created_at_ms: 0,
            label: "02/12 21:05".to_string(),
        }
    }

    #[test]
    fn keeps_prior_digest_and_appends_user_lines() {
        let digest = extractive_digest(
            "- [02/11 08:00] started a new job",
            &[
                turn(Role::User, "  moved   to a new flat "),
                turn(Role::Assistant, "congrats!"),
            ],
        );
        assert_eq!(
            digest,
            "- [02/11 08:00] started a new job\n- [02/12 21:05] moved to a new flat"
        );
    }

    #[test]
    fn bounds_line_count_and_length() {
        let long = "x".repeat(500);
        let batch = (0..60).map(|_| turn(Role::User, &long)).collect::<Vec<_>>();
        let digest = extractive_digest("", &batch);
        assert_eq!(digest.lines().count(), OFFLINE_MAX_LINES);
        assert!(digest.lines().all(|line| line.ends_with("...")));
    }
}
