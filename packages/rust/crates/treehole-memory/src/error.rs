//! Error taxonomy for the conversation memory core.

use thiserror::Error;

/// Result alias used across the memory core.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Structural invariant that an operation would have broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invariant {
    /// Cursor asked to move below its current offset.
    CursorRegression {
        /// Offset the cursor currently holds.
        current: usize,
        /// Offset that was requested.
        requested: usize,
    },
    /// Cursor asked to move past the end of the message log.
    CursorBeyondLog {
        /// Offset that was requested.
        requested: usize,
        /// Message log length at the time of the request.
        log_len: usize,
    },
    /// A turn would have been placed before an existing turn.
    Reorder {
        /// Creation time of the current newest turn (unix ms).
        newest_ms: u64,
        /// Creation time of the rejected turn (unix ms).
        attempted_ms: u64,
    },
}

impl std::fmt::Display for Invariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CursorRegression { current, requested } => {
                write!(f, "cursor regression: {requested} < current {current}")
            }
            Self::CursorBeyondLog { requested, log_len } => {
                write!(f, "cursor {requested} beyond message log length {log_len}")
            }
            Self::Reorder {
                newest_ms,
                attempted_ms,
            } => write!(
                f,
                "turn created at {attempted_ms} would precede newest turn at {newest_ms}"
            ),
        }
    }
}

/// Errors surfaced by the memory core.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed turn (empty content, unknown role).
    #[error("invalid turn: {0}")]
    Validation(String),

    /// Ordering or cursor invariant would be violated.
    #[error("invariant violation: {0}")]
    InvariantViolation(Invariant),

    /// Summarization collaborator failed, timed out or returned garbage.
    #[error("summarization collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    /// Snapshot store exceeded its retention cap after a commit. Always a bug.
    #[error("retention violated: {count} snapshots retained, cap is {cap}")]
    RetentionViolation {
        /// Snapshots observed after the commit.
        count: usize,
        /// Configured retention cap.
        cap: usize,
    },

    /// Persisted state could not be read, written or validated.
    #[error("persistence: {0}")]
    Persistence(String),
}

impl MemoryError {
    /// Whether the next natural trigger is expected to retry this failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CollaboratorUnavailable(_))
    }
}
