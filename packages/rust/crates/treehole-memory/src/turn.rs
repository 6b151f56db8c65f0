//! Chat turns and their display timestamps.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MemoryError, Result};

const TIMESTAMP_LABEL_FORMAT: &str = "%m/%d %H:%M";

/// Speaker of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The companion's replies.
    Assistant,
}

impl Role {
    /// Wire name ("user" / "assistant").
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = MemoryError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(MemoryError::Validation(format!(
                "unrecognized role '{other}' (expected user or assistant)"
            ))),
        }
    }
}

/// One stored chat message. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique identifier.
    pub id: Uuid,
    /// Insertion sequence (1-based); equals the turn's offset in the log.
    pub seq: u64,
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Creation time in unix milliseconds; primary ordering key.
    pub created_at_ms: u64,
}

impl Turn {
    /// Annotate with a local-time display label.
    #[must_use]
    pub fn annotate(&self) -> AnnotatedTurn {
        self.annotate_in(&Local)
    }

    /// Annotate with a display label rendered in `tz`.
    #[must_use]
    pub fn annotate_in<Tz>(&self, tz: &Tz) -> AnnotatedTurn
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        AnnotatedTurn {
            role: self.role,
            content: self.content.clone(),
            created_at_ms: self.created_at_ms,
            label: timestamp_label_in(self.created_at_ms, tz),
        }
    }
}

/// A turn awaiting append. The log assigns id, sequence and (by default) time.
#[derive(Clone, Debug)]
#[must_use]
pub struct NewTurn {
    pub(crate) role: Role,
    pub(crate) content: String,
    pub(crate) created_at_ms: Option<u64>,
}

impl NewTurn {
    /// Build a turn for `role`; the log stamps the creation time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at_ms: None,
        }
    }

    /// Build a turn from a raw role name.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Validation`] for an unknown role.
    pub fn parse(role: &str, content: impl Into<String>) -> Result<Self> {
        Ok(Self::new(role.parse()?, content))
    }

    /// Carry an explicit creation time (imports, replays).
    pub fn with_created_at_ms(mut self, created_at_ms: u64) -> Self {
        self.created_at_ms = Some(created_at_ms);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(MemoryError::Validation(
                "turn content must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A turn as handed to the completion or summarization collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedTurn {
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Creation time in unix milliseconds.
    pub created_at_ms: u64,
    /// Human-readable `MM/DD HH:mm` label derived from `created_at_ms`.
    pub label: String,
}

/// Render `created_at_ms` as `MM/DD HH:mm` in local time.
#[must_use]
pub fn timestamp_label(created_at_ms: u64) -> String {
    timestamp_label_in(created_at_ms, &Local)
}

/// Render `created_at_ms` as `MM/DD HH:mm` in `tz`.
#[must_use]
pub fn timestamp_label_in<Tz>(created_at_ms: u64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    i64::try_from(created_at_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|utc| {
            utc.with_timezone(tz)
                .format(TIMESTAMP_LABEL_FORMAT)
                .to_string()
        })
        .unwrap_or_default()
}

pub(crate) fn now_unix_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}
