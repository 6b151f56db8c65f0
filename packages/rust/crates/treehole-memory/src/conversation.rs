//! `ConversationMemory`: the message log, snapshot store, cursor and engine wired together.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cursor::ConsolidationCursor;
use crate::engine::{ConsolidationConfig, ConsolidationEngine, CycleState, Summarizer, TriggerResult};
use crate::error::Result;
use crate::lookup::MemoryLookup;
use crate::message_log::MessageLog;
use crate::observability::MemoryEvent;
use crate::persistence::{ConversationState, StateCheckpoint};
use crate::snapshot_store::MemorySnapshotStore;
use crate::turn::{AnnotatedTurn, NewTurn, Role, Turn};
use crate::window::ContextWindowBuilder;

/// Memory handed to request assembly: active digest plus verbatim window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PromptContext {
    /// Active digest; empty when nothing has been consolidated yet.
    pub memory: String,
    /// Most recent turns, oldest first.
    pub turns: Vec<AnnotatedTurn>,
}

/// Point-in-time counters for status displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryStatus {
    /// Turns in the message log.
    pub turns: usize,
    /// Consolidation cursor offset.
    pub cursor: usize,
    /// Turns not yet folded into a digest.
    pub pending: usize,
    /// Retained snapshots.
    pub snapshots: usize,
    /// Engine state.
    pub state: CycleState,
}

/// Conversation memory for a single user.
///
/// Appends never wait on the summarizer: consolidation runs on a spawned task
/// driven by the log's append notifications.
pub struct ConversationMemory {
    log: MessageLog,
    snapshots: MemorySnapshotStore,
    window: ContextWindowBuilder,
    lookup: MemoryLookup,
    engine: Arc<ConsolidationEngine>,
    listener: Option<JoinHandle<()>>,
}

impl ConversationMemory {
    /// Start with empty stores. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(config: ConsolidationConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        let config = config.normalized();
        let log = MessageLog::new(config.notification_capacity);
        let snapshots = MemorySnapshotStore::new();
        let cursor = ConsolidationCursor::new(log.clone());
        Self::assemble(log, snapshots, cursor, summarizer, config)
    }

    /// Start from persisted state and catch up on pending turns.
    ///
    /// Snapshots beyond the retention cap are evicted oldest-first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MemoryError::Persistence`] for out-of-order turns or
    /// snapshots and [`crate::MemoryError::InvariantViolation`] for a cursor
    /// beyond the log.
    pub fn start_with_state(
        config: ConsolidationConfig,
        summarizer: Arc<dyn Summarizer>,
        state: ConversationState,
    ) -> Result<Self> {
        let config = config.normalized();
        let log = MessageLog::from_turns(state.turns, config.notification_capacity)?;
        let snapshots = MemorySnapshotStore::from_snapshots(state.snapshots, state.next_snapshot_id)?;
        let evicted = snapshots.evict_oldest_beyond(config.retention_cap);
        let cursor = ConsolidationCursor::with_offset(log.clone(), state.cursor)?;
        tracing::debug!(
            event = MemoryEvent::StateLoaded.as_str(),
            turns = log.len(),
            snapshots = snapshots.len(),
            evicted,
            cursor = cursor.get(),
            "conversation memory restored"
        );
        let memory = Self::assemble(log, snapshots, cursor, summarizer, config);
        memory.engine.notify();
        Ok(memory)
    }

    fn assemble(
        log: MessageLog,
        snapshots: MemorySnapshotStore,
        cursor: ConsolidationCursor,
        summarizer: Arc<dyn Summarizer>,
        config: ConsolidationConfig,
    ) -> Self {
        let engine = Arc::new(ConsolidationEngine::new(
            log.clone(),
            snapshots.clone(),
            cursor,
            summarizer,
            config,
        ));
        let listener = engine.spawn_listener();
        Self {
            window: ContextWindowBuilder::new(log.clone()),
            lookup: MemoryLookup::new(snapshots.clone()),
            log,
            snapshots,
            engine,
            listener: Some(listener),
        }
    }

    /// Append a turn; the engine reacts asynchronously.
    ///
    /// The trigger check is scheduled before this returns, so a following
    /// [`Self::wait_idle`] covers the cycle it starts.
    ///
    /// # Errors
    ///
    /// See [`MessageLog::append`].
    pub fn append_turn(&self, turn: NewTurn) -> Result<Turn> {
        let stored = self.log.append(turn)?;
        self.engine.notify();
        Ok(stored)
    }

    /// Append `content` spoken by `role`.
    ///
    /// # Errors
    ///
    /// See [`MessageLog::append`].
    pub fn append(&self, role: Role, content: impl Into<String>) -> Result<Turn> {
        self.append_turn(NewTurn::new(role, content))
    }

    /// Active digest plus the last `max_turns` turns.
    #[must_use]
    pub fn context(&self, max_turns: usize) -> PromptContext {
        PromptContext {
            memory: self.lookup.active(),
            turns: self.window.build(max_turns),
        }
    }

    /// Active digest text (empty when none).
    #[must_use]
    pub fn active_memory(&self) -> String {
        self.lookup.active()
    }

    /// Manual consolidation; see [`ConsolidationEngine::consolidate_now`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::MemoryError::CollaboratorUnavailable`] when the cycle fails.
    pub async fn consolidate_now(&self, cancel: &CancellationToken) -> Result<TriggerResult> {
        self.engine.consolidate_now(cancel).await
    }

    /// Wait for running and scheduled consolidation to finish.
    pub async fn wait_idle(&self) {
        self.engine.wait_idle().await;
    }

    /// Current counters.
    #[must_use]
    pub fn status(&self) -> MemoryStatus {
        let cursor = self.engine.cursor_offset();
        let turns = self.log.len();
        MemoryStatus {
            turns,
            cursor,
            pending: turns.saturating_sub(cursor),
            snapshots: self.snapshots.len(),
            state: self.engine.state(),
        }
    }

    /// Capture state for persistence.
    ///
    /// The cursor is read first, so it never exceeds the captured log length;
    /// a commit racing the capture only causes re-consolidation after restore.
    #[must_use]
    pub fn state(&self) -> ConversationState {
        let cursor = self.engine.cursor_offset();
        let next_snapshot_id = self.snapshots.last_assigned_id();
        let mut snapshots = self.snapshots.all();
        snapshots.reverse();
        ConversationState {
            turns: self.log.turns(),
            snapshots,
            next_snapshot_id,
            cursor,
        }
    }

    /// Capture turns after offset `turns_from` plus the current snapshots and cursor.
    ///
    /// Read in the same order as [`Self::state`].
    #[must_use]
    pub fn checkpoint(&self, turns_from: usize) -> StateCheckpoint {
        let cursor = self.engine.cursor_offset();
        let next_snapshot_id = self.snapshots.last_assigned_id();
        let mut snapshots = self.snapshots.all();
        snapshots.reverse();
        let turns_from = turns_from.min(self.log.len());
        StateCheckpoint {
            turns_from,
            turns: self.log.range(turns_from, None),
            snapshots,
            next_snapshot_id,
            cursor,
        }
    }

    /// Underlying message log.
    #[must_use]
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Underlying snapshot store.
    #[must_use]
    pub fn snapshots(&self) -> &MemorySnapshotStore {
        &self.snapshots
    }

    /// Consolidation engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<ConsolidationEngine> {
        &self.engine
    }
}

impl Drop for ConversationMemory {
    fn drop(&mut self) {
        if let Some(task) = self.listener.take() {
            task.abort();
        }
    }
}
