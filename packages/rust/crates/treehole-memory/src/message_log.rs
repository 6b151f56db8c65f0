//! Append-only, time-ordered log of chat turns.
//!
//! Offsets are 1-based counts: offset `n` is the `n`-th turn ever appended, and
//! `range(a, Some(b))` yields the turns with offsets in `(a, b]`.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{Invariant, MemoryError, Result};
use crate::observability::MemoryEvent;
use crate::turn::{NewTurn, Role, Turn, now_unix_ms};

/// Default capacity of the append notification channel.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Published to subscribers after every successful append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppendNotice {
    /// Offset of the appended turn, which is also the new log length.
    pub offset: usize,
    /// Speaker of the appended turn.
    pub role: Role,
}

/// Shared handle to the message log. Cloning shares the same log.
#[derive(Clone, Debug)]
pub struct MessageLog {
    turns: Arc<RwLock<Vec<Turn>>>,
    notices: broadcast::Sender<AppendNotice>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

impl MessageLog {
    /// Create an empty log whose notification channel buffers `notification_capacity` notices.
    #[must_use]
    pub fn new(notification_capacity: usize) -> Self {
        let (notices, _) = broadcast::channel(notification_capacity.max(1));
        Self {
            turns: Arc::new(RwLock::new(Vec::new())),
            notices,
        }
    }

    /// Rebuild a log from persisted turns.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Persistence`] when the turns are not in
    /// `(created_at, seq)` order or their sequence numbers are not `1..=n`.
    pub fn from_turns(turns: Vec<Turn>, notification_capacity: usize) -> Result<Self> {
        for (index, turn) in turns.iter().enumerate() {
            if turn.seq != index as u64 + 1 {
                return Err(MemoryError::Persistence(format!(
                    "turn {} has sequence {} at offset {}",
                    turn.id,
                    turn.seq,
                    index + 1
                )));
            }
            if index > 0 && turns[index - 1].created_at_ms > turn.created_at_ms {
                return Err(MemoryError::Persistence(format!(
                    "turn {} is older than its predecessor",
                    turn.id
                )));
            }
        }
        let log = Self::new(notification_capacity);
        *log.write_turns() = turns;
        Ok(log)
    }

    fn read_turns(&self) -> RwLockReadGuard<'_, Vec<Turn>> {
        self.turns.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_turns(&self) -> RwLockWriteGuard<'_, Vec<Turn>> {
        self.turns.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one turn and notify subscribers.
    ///
    /// Turns without an explicit creation time are stamped with the current
    /// time, never earlier than the newest stored turn.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::Validation`] when the content is blank.
    /// - [`MemoryError::InvariantViolation`] when an explicit creation time
    ///   would place the turn before the newest stored turn.
    pub fn append(&self, turn: NewTurn) -> Result<Turn> {
        if let Err(error) = turn.validate() {
            tracing::debug!(
                event = MemoryEvent::TurnRejected.as_str(),
                role = turn.role.as_str(),
                error = %error,
                "turn rejected"
            );
            return Err(error);
        }

        let stored = {
            let mut turns = self.write_turns();
            let newest_ms = turns.last().map_or(0, |last| last.created_at_ms);
            let created_at_ms = match turn.created_at_ms {
                Some(attempted_ms) if attempted_ms < newest_ms => {
                    let violation = Invariant::Reorder {
                        newest_ms,
                        attempted_ms,
                    };
                    tracing::debug!(
                        event = MemoryEvent::TurnRejected.as_str(),
                        role = turn.role.as_str(),
                        error = %violation,
                        "turn rejected"
                    );
                    return Err(MemoryError::InvariantViolation(violation));
                }
                Some(explicit) => explicit,
                None => now_unix_ms().max(newest_ms),
            };
            let stored = Turn {
                id: Uuid::new_v4(),
                seq: turns.len() as u64 + 1,
                role: turn.role,
                content: turn.content,
                created_at_ms,
            };
            turns.push(stored.clone());
            stored
        };

        let offset = usize::try_from(stored.seq).unwrap_or(usize::MAX);
        tracing::debug!(
            event = MemoryEvent::TurnAppended.as_str(),
            offset,
            role = stored.role.as_str(),
            chars = stored.content.chars().count(),
            "turn appended"
        );
        // No receivers is fine: nobody is listening yet.
        let _ = self.notices.send(AppendNotice {
            offset,
            role: stored.role,
        });
        Ok(stored)
    }

    /// Turns with offsets in `(from_exclusive, to_inclusive]`, oldest first.
    ///
    /// `None` for `to_inclusive` means the end of the log; bounds past the end are clamped.
    #[must_use]
    pub fn range(&self, from_exclusive: usize, to_inclusive: Option<usize>) -> Vec<Turn> {
        let turns = self.read_turns();
        let end = to_inclusive.map_or(turns.len(), |to| to.min(turns.len()));
        if from_exclusive >= end {
            return Vec::new();
        }
        turns[from_exclusive..end].to_vec()
    }

    /// Last `n` turns, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let turns = self.read_turns();
        let start = turns.len().saturating_sub(n);
        turns[start..].to_vec()
    }

    /// Number of turns appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_turns().len()
    }

    /// Whether no turn has been appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_turns().is_empty()
    }

    /// Subscribe to append notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AppendNotice> {
        self.notices.subscribe()
    }

    /// Copy of every stored turn, oldest first.
    #[must_use]
    pub fn turns(&self) -> Vec<Turn> {
        self.read_turns().clone()
    }
}
