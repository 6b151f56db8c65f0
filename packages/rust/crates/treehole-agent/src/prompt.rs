//! Prompt assembly for the companion persona and the memory keeper.

use serde::Serialize;
use treehole_memory::{AnnotatedTurn, Role};

use crate::llm::ChatMessage;

/// Companion persona.
pub const SYSTEM_PROMPT: &str = "\
You are Mr. Treehole, a warm and patient listener. The user comes to you to \
talk about their day, their worries and the people in their life.

- Reply like a close friend texting: short, casual, sincere.
- When you have several things to say, send them as separate short messages \
separated by [BREAK].
- Every user message starts with a [MM/DD HH:mm] timestamp. Use it to \
understand when things happened; never repeat the timestamp in your reply.
- Use the long-term memory, when present, to remember who the user is and \
what they told you before. Never recite it back verbatim.";

/// Memory keeper instructions: how to merge a batch of turns into the prior digest.
pub const SUMMARIZE_PROMPT: &str = "\
You are a careful memory keeper maintaining the long-term memory file of one user.
You receive two inputs:
1. [Previous memory]: the user's long-term memory so far (may be empty).
2. [New conversation]: recent messages, one JSON object per line with a \
`time` field formatted MM/DD HH:mm.

Do the following:
1. Timeline: every notable event you record MUST carry its approximate date \
(for example \"Evening of Feb 12, the user mentioned...\"). The user may ask \
what was said yesterday.
2. Integrate: extract key facts from the new conversation (traits, \
preferences, important events) and merge them into the previous memory. \
Treat the previous memory as authoritative unless contradicted.
3. Resolve conflicts: when new information contradicts old information, the \
new conversation wins.
4. Forget trivia: drop small conversational details that no longer matter; \
keep core facts and conclusions.
5. Output: reply with the complete updated memory file only, with no \
explanation or preamble.

Suggested sections:
- Profile: basic attributes, personality, preferences.
- Relationships: partner, friends, family and how things stand.
- Timeline: recent important events and when they happened.";

const MEMORY_HEADER: &str = "[Long-term memory]";
const EMPTY_MEMORY: &str = "(empty)";

/// System prompt plus memory block, then the window as chat messages.
pub fn build_chat_messages(memory: &str, turns: &[AnnotatedTurn]) -> Vec<ChatMessage> {
    let system = if memory.trim().is_empty() {
        SYSTEM_PROMPT.to_string()
    } else {
        format!("{SYSTEM_PROMPT}\n\n{MEMORY_HEADER}\n{}", memory.trim())
    };
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(ChatMessage::system(system));
    messages.extend(turns.iter().map(|turn| {
        let content = format!("[{}] {}", turn.label, turn.content);
        match turn.role {
            Role::User => ChatMessage::user(content),
            Role::Assistant => ChatMessage::assistant(content),
        }
    }));
    messages
}

#[derive(Serialize)]
struct TranscriptLine<'a> {
    time: &'a str,
    role: &'a str,
    content: &'a str,
}

/// User message for the memory keeper.
pub fn build_summary_input(old_memory: &str, batch: &[AnnotatedTurn]) -> String {
    let previous = if old_memory.trim().is_empty() {
        EMPTY_MEMORY
    } else {
        old_memory.trim()
    };
    let transcript = batch
        .iter()
        .filter_map(|turn| {
            serde_json::to_string(&TranscriptLine {
                time: &turn.label,
                role: turn.role.as_str(),
                content: &turn.content,
            })
            .ok()
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("[Previous memory]\n{previous}\n\n[New conversation]\n{transcript}")
}
