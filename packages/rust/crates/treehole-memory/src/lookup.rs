//! Read-only access to the active memory digest.

use crate::snapshot_store::{MemorySnapshot, MemorySnapshotStore};

/// Resolves the single digest injected into outgoing requests.
#[derive(Clone, Debug)]
pub struct MemoryLookup {
    snapshots: MemorySnapshotStore,
}

impl MemoryLookup {
    /// Lookup over `snapshots`.
    #[must_use]
    pub fn new(snapshots: MemorySnapshotStore) -> Self {
        Self { snapshots }
    }

    /// Content of the newest snapshot, or an empty string when none exists.
    #[must_use]
    pub fn active(&self) -> String {
        self.active_snapshot()
            .map(|snapshot| snapshot.content)
            .unwrap_or_default()
    }

    /// The newest snapshot with its metadata.
    #[must_use]
    pub fn active_snapshot(&self) -> Option<MemorySnapshot> {
        self.snapshots.latest()
    }
}
