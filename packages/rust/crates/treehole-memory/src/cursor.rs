//! Consolidation cursor: how much of the message log has been folded into memory.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Invariant, MemoryError, Result};
use crate::message_log::MessageLog;
use crate::observability::MemoryEvent;

/// Monotonic offset of the newest turn already incorporated into a digest.
///
/// The next consolidation always reads `range(get(), len)`, however large, so
/// failed or missed cycles are caught up instead of skipped.
#[derive(Clone, Debug)]
pub struct ConsolidationCursor {
    log: MessageLog,
    offset: Arc<Mutex<usize>>,
}

impl ConsolidationCursor {
    /// Cursor at offset 0 over `log`.
    #[must_use]
    pub fn new(log: MessageLog) -> Self {
        Self {
            log,
            offset: Arc::new(Mutex::new(0)),
        }
    }

    /// Cursor restored at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvariantViolation`] when `offset` exceeds the log length.
    pub fn with_offset(log: MessageLog, offset: usize) -> Result<Self> {
        let log_len = log.len();
        if offset > log_len {
            return Err(MemoryError::InvariantViolation(
                Invariant::CursorBeyondLog {
                    requested: offset,
                    log_len,
                },
            ));
        }
        Ok(Self {
            log,
            offset: Arc::new(Mutex::new(offset)),
        })
    }

    /// Current offset.
    #[must_use]
    pub fn get(&self) -> usize {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the cursor forward to `offset`. Returns the previous offset.
    ///
    /// Advancing to the current offset is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvariantViolation`] if `offset` is below the
    /// current offset or beyond the message log length.
    pub fn advance_to(&self, offset: usize) -> Result<usize> {
        let mut current = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        if offset < *current {
            return Err(MemoryError::InvariantViolation(
                Invariant::CursorRegression {
                    current: *current,
                    requested: offset,
                },
            ));
        }
        let log_len = self.log.len();
        if offset > log_len {
            return Err(MemoryError::InvariantViolation(
                Invariant::CursorBeyondLog {
                    requested: offset,
                    log_len,
                },
            ));
        }
        let previous = std::mem::replace(&mut *current, offset);
        if previous != offset {
            tracing::debug!(
                event = MemoryEvent::CursorAdvanced.as_str(),
                previous,
                offset,
                "consolidation cursor advanced"
            );
        }
        Ok(previous)
    }

    /// Turns appended since the cursor (`len - offset`).
    #[must_use]
    pub fn pending(&self) -> usize {
        let offset = self.get();
        self.log.len().saturating_sub(offset)
    }
}
