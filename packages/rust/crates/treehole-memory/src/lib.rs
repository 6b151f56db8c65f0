//! treehole-memory - conversation memory manager for long single-user dialogues.
//!
//! Decides, for every outgoing request, which turns go verbatim and which are
//! represented by a rolling long-term digest:
//! - Append-only message log with append notifications
//! - Bounded context window over the newest turns
//! - Consolidation cursor + single-flight engine folding old turns into digests
//! - Bounded snapshot store and read-only active-memory lookup
//!
//! # Architecture
//!
//! ```text
//! append(turn) ──► MessageLog ──notice──► ConsolidationEngine ──► Summarizer
//!                     │                      │        │
//!                     ▼                      ▼        ▼
//!            ContextWindowBuilder   ConsolidationCursor  MemorySnapshotStore
//!                     │                                      │
//!                     └──────────► PromptContext ◄── MemoryLookup
//! ```
//!
//! # Examples
//!
//! ```rust
//! use treehole_memory::{MessageLog, NewTurn, Role, ContextWindowBuilder};
//!
//! let log = MessageLog::default();
//! log.append(NewTurn::new(Role::User, "hello")).ok();
//! let window = ContextWindowBuilder::new(log.clone()).build(50);
//! assert_eq!(window.len(), 1);
//! ```

mod conversation;
mod cursor;
mod engine;
mod error;
mod lookup;
mod message_log;
mod observability;
mod persistence;
mod snapshot_store;
mod turn;
mod window;

pub use conversation::{ConversationMemory, MemoryStatus, PromptContext};
pub use cursor::ConsolidationCursor;
pub use engine::{
    ConsolidationConfig, ConsolidationEngine, CycleOutcome, CycleReport, CycleState,
    DEFAULT_CONSOLIDATION_THRESHOLD, DEFAULT_MANUAL_WINDOW, DEFAULT_RETENTION_CAP, Skip,
    Summarizer, Trigger, TriggerResult,
};
pub use error::{Invariant, MemoryError, Result};
pub use lookup::MemoryLookup;
pub use message_log::{AppendNotice, DEFAULT_NOTIFICATION_CAPACITY, MessageLog};
pub use observability::MemoryEvent;
pub use persistence::{
    ConversationState, LocalMemoryStateStore, MemoryStateStore, StateCheckpoint,
};
pub use snapshot_store::{MemorySnapshot, MemorySnapshotStore, SnapshotKind};
pub use turn::{AnnotatedTurn, NewTurn, Role, Turn, timestamp_label, timestamp_label_in};
pub use window::ContextWindowBuilder;

pub use tokio_util::sync::CancellationToken;
