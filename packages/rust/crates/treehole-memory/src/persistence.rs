//! Conversation state persistence.
//!
//! The local backend keeps two files side by side:
//! - `<name>.turns.jsonl`: the message log, one turn per line, only ever appended
//! - `<name>` (e.g. `conversation.json`): snapshots, cursor and the number of
//!   committed turn lines, replaced atomically on every save
//!
//! Lines past the committed count (a save interrupted between the two writes)
//! are ignored on load and truncated by the next save.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};
use crate::observability::MemoryEvent;
use crate::snapshot_store::MemorySnapshot;
use crate::turn::{Turn, now_unix_ms};

const TURNS_FILE_EXTENSION: &str = "turns.jsonl";

/// Everything needed to resume a conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Message log, oldest first.
    #[serde(default)]
    pub turns: Vec<Turn>,
    /// Retained snapshots, oldest first.
    #[serde(default)]
    pub snapshots: Vec<MemorySnapshot>,
    /// Highest snapshot id ever assigned (ids are never reused after eviction).
    #[serde(default)]
    pub next_snapshot_id: u64,
    /// Consolidation cursor offset.
    #[serde(default)]
    pub cursor: usize,
}

/// Incremental save: the turns appended since `turns_from` plus the full
/// snapshot set and cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateCheckpoint {
    /// Log offset preceding `turns[0]`.
    pub turns_from: usize,
    /// Turns with offsets `turns_from + 1 ..`.
    pub turns: Vec<Turn>,
    /// Retained snapshots, oldest first.
    pub snapshots: Vec<MemorySnapshot>,
    /// Highest snapshot id ever assigned.
    pub next_snapshot_id: u64,
    /// Consolidation cursor offset.
    pub cursor: usize,
}

impl StateCheckpoint {
    /// Log length covered by this checkpoint.
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.turns_from + self.turns.len()
    }
}

impl From<ConversationState> for StateCheckpoint {
    fn from(state: ConversationState) -> Self {
        Self {
            turns_from: 0,
            turns: state.turns,
            snapshots: state.snapshots,
            next_snapshot_id: state.next_snapshot_id,
            cursor: state.cursor,
        }
    }
}

/// Persistence abstraction for conversation state.
pub trait MemoryStateStore: Send + Sync {
    /// Backend identifier for logs.
    fn backend_name(&self) -> &'static str;

    /// Whether startup should fail if loading state fails.
    fn strict_startup(&self) -> bool {
        false
    }

    /// Load the last saved state; `None` when nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Persistence`] when stored state cannot be read or decoded.
    fn load(&self) -> Result<Option<ConversationState>>;

    /// Append the checkpoint's turns not stored yet, then replace snapshots and cursor.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Persistence`] when the state cannot be written or
    /// the checkpoint starts past the stored turns.
    fn save(&self, checkpoint: &StateCheckpoint) -> Result<()>;

    /// Move unreadable state out of the way so later saves start fresh without
    /// overwriting it. Returns `false` when the backend cannot do this; callers
    /// must then not save.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Persistence`] when the state could not be moved.
    fn set_aside(&self) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryDocument {
    turn_count: usize,
    #[serde(default)]
    snapshots: Vec<MemorySnapshot>,
    #[serde(default)]
    next_snapshot_id: u64,
    #[serde(default)]
    cursor: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct TurnsTail {
    count: usize,
    bytes: u64,
}

/// Local file backend.
#[derive(Debug, Clone)]
pub struct LocalMemoryStateStore {
    path: PathBuf,
    turns_path: PathBuf,
    strict_startup: bool,
    tail: Arc<Mutex<Option<TurnsTail>>>,
}

impl LocalMemoryStateStore {
    /// Store state at `path`, with the turn log next to it.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let turns_path = path.with_extension(TURNS_FILE_EXTENSION);
        Self {
            path,
            turns_path,
            strict_startup: false,
            tail: Arc::default(),
        }
    }

    /// Fail startup instead of starting empty when the state is unreadable.
    #[must_use]
    pub fn with_strict_startup(mut self, strict: bool) -> Self {
        self.strict_startup = strict;
        self
    }

    /// Location of the snapshot/cursor document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the append-only turn log.
    #[must_use]
    pub fn turns_path(&self) -> &Path {
        &self.turns_path
    }

    fn read_document(&self) -> anyhow::Result<Option<MemoryDocument>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state file {}", self.path.display()))?;
        let document = serde_json::from_str(&raw)
            .with_context(|| format!("failed to decode state file {}", self.path.display()))?;
        Ok(Some(document))
    }

    /// Committed turns and the byte length they occupy in the turn log.
    fn read_turns(&self, count: usize) -> anyhow::Result<(Vec<Turn>, u64)> {
        if count == 0 {
            return Ok((Vec::new(), 0));
        }
        let raw = std::fs::read_to_string(&self.turns_path)
            .with_context(|| format!("failed to read turn log {}", self.turns_path.display()))?;
        let mut turns = Vec::with_capacity(count);
        let mut bytes = 0_u64;
        for (index, line) in raw.split_inclusive('\n').take(count).enumerate() {
            if !line.ends_with('\n') {
                break;
            }
            let turn: Turn = serde_json::from_str(line.trim_end()).with_context(|| {
                format!(
                    "failed to decode line {} of turn log {}",
                    index + 1,
                    self.turns_path.display()
                )
            })?;
            turns.push(turn);
            bytes += line.len() as u64;
        }
        anyhow::ensure!(
            turns.len() == count,
            "turn log {} holds {} complete turns, state expects {count}",
            self.turns_path.display(),
            turns.len()
        );
        Ok((turns, bytes))
    }

    fn current_tail(&self) -> anyhow::Result<TurnsTail> {
        let document = self.read_document()?;
        match document {
            Some(document) => {
                let (_, bytes) = self.read_turns(document.turn_count)?;
                Ok(TurnsTail {
                    count: document.turn_count,
                    bytes,
                })
            }
            None => {
                anyhow::ensure!(
                    !non_empty_file(&self.turns_path),
                    "turn log {} exists without its state file {}",
                    self.turns_path.display(),
                    self.path.display()
                );
                Ok(TurnsTail::default())
            }
        }
    }

    fn save_checkpoint(&self, checkpoint: &StateCheckpoint) -> anyhow::Result<TurnsTail> {
        let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = match *tail {
            Some(stored) => stored,
            None => self.current_tail()?,
        };
        anyhow::ensure!(
            checkpoint.turns_from <= stored.count,
            "checkpoint starts at turn {} but only {} turns are stored",
            checkpoint.turns_from,
            stored.count
        );
        let already_stored = stored.count - checkpoint.turns_from;
        let fresh = checkpoint.turns.get(already_stored..).unwrap_or_default();
        let bytes = append_turn_lines(&self.turns_path, stored.bytes, fresh)?;
        let written = TurnsTail {
            count: stored.count + fresh.len(),
            bytes,
        };
        // Re-read from disk next time if the document write below fails.
        *tail = None;

        let document = MemoryDocument {
            turn_count: written.count,
            snapshots: checkpoint.snapshots.clone(),
            next_snapshot_id: checkpoint.next_snapshot_id,
            cursor: checkpoint.cursor,
        };
        let payload =
            serde_json::to_string_pretty(&document).context("failed to encode memory state")?;
        write_replacing(&self.path, &payload)?;
        *tail = Some(written);
        Ok(written)
    }
}

impl MemoryStateStore for LocalMemoryStateStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn strict_startup(&self) -> bool {
        self.strict_startup
    }

    fn load(&self) -> Result<Option<ConversationState>> {
        let Some(document) = self.read_document().map_err(persistence_error)? else {
            if non_empty_file(&self.turns_path) {
                return Err(MemoryError::Persistence(format!(
                    "turn log {} exists without its state file {}",
                    self.turns_path.display(),
                    self.path.display()
                )));
            }
            return Ok(None);
        };
        let (turns, bytes) = self
            .read_turns(document.turn_count)
            .map_err(persistence_error)?;
        *self.tail.lock().unwrap_or_else(PoisonError::into_inner) = Some(TurnsTail {
            count: turns.len(),
            bytes,
        });
        tracing::debug!(
            event = MemoryEvent::StateLoaded.as_str(),
            backend = self.backend_name(),
            path = %self.path.display(),
            turns = turns.len(),
            snapshots = document.snapshots.len(),
            cursor = document.cursor,
            "conversation state loaded"
        );
        Ok(Some(ConversationState {
            turns,
            snapshots: document.snapshots,
            next_snapshot_id: document.next_snapshot_id,
            cursor: document.cursor,
        }))
    }

    fn save(&self, checkpoint: &StateCheckpoint) -> Result<()> {
        let written = self.save_checkpoint(checkpoint).map_err(persistence_error)?;
        tracing::debug!(
            event = MemoryEvent::StateSaved.as_str(),
            backend = self.backend_name(),
            path = %self.path.display(),
            turns = written.count,
            turns_appended = written.count.saturating_sub(checkpoint.turns_from),
            snapshots = checkpoint.snapshots.len(),
            cursor = checkpoint.cursor,
            "conversation state saved"
        );
        Ok(())
    }

    fn set_aside(&self) -> Result<bool> {
        let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        let suffix = format!("corrupt-{}", now_unix_ms());
        for path in [&self.path, &self.turns_path] {
            if !path.exists() {
                continue;
            }
            let target = suffixed(path, &suffix);
            std::fs::rename(path, &target)
                .with_context(|| {
                    format!(
                        "failed to move unreadable state {} to {}",
                        path.display(),
                        target.display()
                    )
                })
                .map_err(persistence_error)?;
            tracing::warn!(
                event = MemoryEvent::StateSetAside.as_str(),
                backend = self.backend_name(),
                from = %path.display(),
                to = %target.display(),
                "unreadable conversation state moved aside"
            );
        }
        *tail = None;
        Ok(true)
    }
}

fn persistence_error(error: anyhow::Error) -> MemoryError {
    MemoryError::Persistence(format!("{error:#}"))
}

fn non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|metadata| metadata.len() > 0)
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn parent_dir(path: &Path) -> anyhow::Result<&Path> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory for {}", path.display()))?;
    Ok(parent)
}

/// Cut the turn log back to `committed_bytes`, append `turns`, fsync.
/// Returns the new committed length.
fn append_turn_lines(path: &Path, committed_bytes: u64, turns: &[Turn]) -> anyhow::Result<u64> {
    if turns.is_empty() && committed_bytes == 0 && !path.exists() {
        return Ok(0);
    }
    parent_dir(path)?;
    let mut lines = String::new();
    for turn in turns {
        lines.push_str(&serde_json::to_string(turn).context("failed to encode turn")?);
        lines.push('\n');
    }
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open turn log {}", path.display()))?;
    file.set_len(committed_bytes)
        .with_context(|| format!("failed to trim turn log {}", path.display()))?;
    file.seek(SeekFrom::Start(committed_bytes))
        .with_context(|| format!("failed to seek turn log {}", path.display()))?;
    file.write_all(lines.as_bytes())
        .with_context(|| format!("failed to append to turn log {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to fsync turn log {}", path.display()))?;
    Ok(committed_bytes + lines.len() as u64)
}

/// Replace `path` with `content` through a synced temp file in the same
/// directory. The temp file is removed if any step fails.
fn write_replacing(path: &Path, content: &str) -> anyhow::Result<()> {
    let parent = parent_dir(path)?;
    let mut temp = tempfile::Builder::new()
        .prefix(".treehole-state-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .with_context(|| format!("failed to create temp file next to {}", path.display()))?;
    temp.write_all(content.as_bytes())
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to fsync temp file for {}", path.display()))?;
    temp.persist(path)
        .map_err(|error| error.error)
        .with_context(|| format!("failed to move temp file onto {}", path.display()))?;
    Ok(())
}
