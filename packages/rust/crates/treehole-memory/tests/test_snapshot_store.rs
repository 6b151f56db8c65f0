#![allow(missing_docs)]

use treehole_memory::{MemoryError, MemoryLookup, MemorySnapshotStore, SnapshotKind};

#[test]
fn ids_increase_and_latest_is_newest() {
    let store = MemorySnapshotStore::new();
    let first = store.append("first", SnapshotKind::Summary, 10);
    let second = store.append("second", SnapshotKind::Summary, 20);

    assert_eq!((first.id, second.id), (1, 2));
    assert!(second.created_at_ms >= first.created_at_ms);
    assert_eq!(store.latest().map(|s| s.content), Some("second".to_string()));
    assert_eq!(
        store.all().iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![2, 1]
    );
}

#[test]
fn commit_evicts_oldest_beyond_cap() {
    let store = MemorySnapshotStore::new();
    for n in 1..=3 {
        let (_, evicted) = store.commit(format!("digest {n}"), SnapshotKind::Summary, n, 3);
        assert_eq!(evicted, 0);
    }
    let (snapshot, evicted) = store.commit("digest 4", SnapshotKind::Summary, 4, 3);

    assert_eq!(snapshot.id, 4);
    assert_eq!(evicted, 1);
    assert_eq!(
        store.all().iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![4, 3, 2]
    );
}

#[test]
fn commit_with_zero_cap_keeps_the_new_entry() {
    let store = MemorySnapshotStore::new();
    store.append("old", SnapshotKind::Summary, 1);
    let (snapshot, evicted) = store.commit("new", SnapshotKind::Summary, 2, 0);
    assert_eq!(evicted, 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.latest(), Some(snapshot));
}

#[test]
fn eviction_never_reuses_ids() {
    let store = MemorySnapshotStore::new();
    for n in 0..5 {
        store.commit(format!("digest {n}"), SnapshotKind::Summary, n, 2);
    }
    assert_eq!(store.last_assigned_id(), 5);
    let (next, _) = store.commit("again", SnapshotKind::Summary, 6, 2);
    assert_eq!(next.id, 6);
}

#[test]
fn evict_oldest_beyond_reports_removed_count() {
    let store = MemorySnapshotStore::new();
    for n in 0..6 {
        store.append(format!("digest {n}"), SnapshotKind::Summary, n);
    }
    assert_eq!(store.evict_oldest_beyond(4), 2);
    assert_eq!(store.evict_oldest_beyond(4), 0);
    assert_eq!(store.len(), 4);
}

#[test]
fn restore_rejects_unordered_ids() {
    let store = MemorySnapshotStore::new();
    let a = store.append("a", SnapshotKind::Summary, 1);
    let b = store.append("b", SnapshotKind::Fact, 2);

    let error = MemorySnapshotStore::from_snapshots(vec![b.clone(), a.clone()], 2)
        .expect_err("descending ids");
    assert!(matches!(error, MemoryError::Persistence(_)));

    let restored = MemorySnapshotStore::from_snapshots(vec![a, b], 0).expect("ordered ids");
    assert_eq!(restored.last_assigned_id(), 2);
    assert_eq!(restored.append("c", SnapshotKind::Summary, 3).id, 3);
}

#[test]
fn lookup_returns_empty_string_without_snapshots() {
    let store = MemorySnapshotStore::new();
    let lookup = MemoryLookup::new(store.clone());
    assert_eq!(lookup.active(), "");
    assert!(lookup.active_snapshot().is_none());

    store.append("prefers green tea", SnapshotKind::Summary, 4);
    assert_eq!(lookup.active(), "prefers green tea");
    assert_eq!(lookup.active_snapshot().map(|s| s.covers_through), Some(4));
}
