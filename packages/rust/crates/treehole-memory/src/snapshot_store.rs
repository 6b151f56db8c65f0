//! Bounded, time-ordered store of consolidated memory digests.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};
use crate::observability::MemoryEvent;
use crate::turn::now_unix_ms;

/// Kind of digest. Only `Summary` is produced today.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// Rolling digest of the whole conversation so far.
    #[default]
    Summary,
    /// Reserved for atomic fact entries.
    Fact,
}

/// One consolidated digest. Immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Auto-assigned, strictly increasing sequence number.
    pub id: u64,
    /// Opaque digest text.
    pub content: String,
    /// Digest kind.
    #[serde(default)]
    pub kind: SnapshotKind,
    /// Creation time in unix milliseconds.
    pub created_at_ms: u64,
    /// Message log offset this digest covers up to (inclusive).
    #[serde(default)]
    pub covers_through: usize,
}

#[derive(Debug, Default)]
struct SnapshotEntries {
    entries: VecDeque<MemorySnapshot>,
    next_id: u64,
}

impl SnapshotEntries {
    fn push(&mut self, content: String, kind: SnapshotKind, covers_through: usize) -> MemorySnapshot {
        self.next_id += 1;
        let newest_ms = self.entries.back().map_or(0, |last| last.created_at_ms);
        let snapshot = MemorySnapshot {
            id: self.next_id,
            content,
            kind,
            created_at_ms: now_unix_ms().max(newest_ms),
            covers_through,
        };
        self.entries.push_back(snapshot.clone());
        snapshot
    }

    fn evict_beyond(&mut self, cap: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > cap {
            if self.entries.pop_front().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }
}

/// Shared handle to the snapshot store. Cloning shares the same store.
#[derive(Clone, Debug, Default)]
pub struct MemorySnapshotStore {
    inner: Arc<RwLock<SnapshotEntries>>,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted snapshots (oldest first).
    ///
    /// `next_id` is raised to at least the highest stored id.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Persistence`] when ids are not strictly increasing.
    pub fn from_snapshots(snapshots: Vec<MemorySnapshot>, next_id: u64) -> Result<Self> {
        if let Some(pair) = snapshots.windows(2).find(|pair| pair[0].id >= pair[1].id) {
            return Err(MemoryError::Persistence(format!(
                "snapshot ids out of order: {} then {}",
                pair[0].id, pair[1].id
            )));
        }
        let max_id = snapshots.last().map_or(0, |last| last.id);
        let store = Self::new();
        {
            let mut inner = store.write_entries();
            inner.entries = snapshots.into();
            inner.next_id = next_id.max(max_id);
        }
        Ok(store)
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, SnapshotEntries> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, SnapshotEntries> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a digest, assigning its id.
    pub fn append(
        &self,
        content: impl Into<String>,
        kind: SnapshotKind,
        covers_through: usize,
    ) -> MemorySnapshot {
        self.write_entries()
            .push(content.into(), kind, covers_through)
    }

    /// Append a digest and evict beyond `cap` under one write lock.
    ///
    /// Readers observe either the state before or after both steps. `cap` is
    /// clamped to 1 so the new entry always survives.
    pub fn commit(
        &self,
        content: impl Into<String>,
        kind: SnapshotKind,
        covers_through: usize,
        cap: usize,
    ) -> (MemorySnapshot, usize) {
        let mut inner = self.write_entries();
        let snapshot = inner.push(content.into(), kind, covers_through);
        let evicted = inner.evict_beyond(cap.max(1));
        if evicted > 0 {
            tracing::debug!(
                event = MemoryEvent::SnapshotsEvicted.as_str(),
                evicted,
                retained = inner.entries.len(),
                cap,
                "memory snapshots evicted beyond retention cap"
            );
        }
        (snapshot, evicted)
    }

    /// Delete the oldest entries until at most `cap` remain. Returns how many were removed.
    pub fn evict_oldest_beyond(&self, cap: usize) -> usize {
        self.write_entries().evict_beyond(cap)
    }

    /// Newest digest, if any.
    #[must_use]
    pub fn latest(&self) -> Option<MemorySnapshot> {
        self.read_entries().entries.back().cloned()
    }

    /// Every retained digest, newest first.
    #[must_use]
    pub fn all(&self) -> Vec<MemorySnapshot> {
        self.read_entries().entries.iter().rev().cloned().collect()
    }

    /// Number of retained digests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_entries().entries.len()
    }

    /// Whether no digest is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_entries().entries.is_empty()
    }

    /// Highest id assigned so far (0 when none).
    #[must_use]
    pub fn last_assigned_id(&self) -> u64 {
        self.read_entries().next_id
    }
}
