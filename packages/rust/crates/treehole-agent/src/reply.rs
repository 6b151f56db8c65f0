//! Reply post-processing: strip model artifacts, split into utterances, map failures.

use std::sync::LazyLock;

use regex::Regex;

use crate::llm::LlmError;

/// Delimiter the persona uses to send several short messages in one reply.
pub const BREAK_DELIMITER: &str = "[BREAK]";

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(_compile_err) => match Regex::new(r"$^") {
            Ok(fallback) => fallback,
            Err(fallback_err) => panic!("hardcoded fallback regex must compile: {fallback_err}"),
        },
    }
}

static ARTIFACT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"</think_never_used_[a-z0-9]+>|</?think>|unittest"));

/// Remove reasoning tags and stray tokens some models leak into replies.
pub fn clean_reply(raw: &str) -> String {
    ARTIFACT_REGEX.replace_all(raw, "").into_owned()
}

/// Split on [`BREAK_DELIMITER`], trimming and dropping empty parts.
pub fn split_reply(cleaned: &str) -> Vec<String> {
    cleaned
        .split(BREAK_DELIMITER)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Clean then split.
pub fn reply_parts(raw: &str) -> Vec<String> {
    split_reply(&clean_reply(raw))
}

/// User-facing notice shown instead of a reply when completion fails.
///
/// Placeholders are never written to the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyPlaceholder {
    /// Rate limited.
    Busy,
    /// Request rejected as malformed.
    BadRequest,
    /// Anything else.
    Unavailable,
}

impl ReplyPlaceholder {
    pub fn text(self) -> &'static str {
        match self {
            Self::Busy => "(busy) Lots of people are talking to the treehole right now. Give it a minute and try again.",
            Self::BadRequest => "(error) Something about that request looked wrong. Please try again.",
            Self::Unavailable => "(offline) The treehole can't be reached right now. Please try again later.",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::BadRequest => "bad_request",
            Self::Unavailable => "unavailable",
        }
    }
}

impl From<&LlmError> for ReplyPlaceholder {
    fn from(error: &LlmError) -> Self {
        match error {
            LlmError::RateLimited(_) => Self::Busy,
            LlmError::MalformedRequest(_) => Self::BadRequest,
            _ => Self::Unavailable,
        }
    }
}

impl std::fmt::Display for ReplyPlaceholder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_covers_hex_suffixed_close_tag() {
        assert_eq!(clean_reply("a</think_never_used_51bce0c785ca2f68081bfa7d91973934>b"), "ab");
        assert_eq!(clean_reply("<think>x</think>"), "x");
    }
}
