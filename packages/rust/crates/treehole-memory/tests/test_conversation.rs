#![allow(missing_docs)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedSummarizer, test_config, wait_until};
use treehole_memory::{
    ConversationMemory, ConversationState, CycleState, LocalMemoryStateStore, MemoryError,
    MemoryStateStore, Role,
};

fn chat(memory: &ConversationMemory, exchanges: usize) {
    for n in 0..exchanges {
        memory
            .append(Role::User, format!("question {n}"))
            .expect("user turn");
        memory
            .append(Role::Assistant, format!("answer {n}"))
            .expect("assistant turn");
    }
}

#[tokio::test]
async fn context_carries_digest_and_recent_turns() {
    let summarizer = Arc::new(ScriptedSummarizer::new());
    let memory = ConversationMemory::start(test_config(6), summarizer);
    let mut reports = memory.engine().subscribe_cycles();

    let empty = memory.context(50);
    assert_eq!(empty.memory, "");
    assert!(empty.turns.is_empty());

    chat(&memory, 3);
    let report = tokio::time::timeout(Duration::from_secs(2), reports.recv())
        .await
        .expect("cycle report in time")
        .expect("report channel open");
    assert!(report.is_committed());

    let context = memory.context(4);
    assert_eq!(context.memory, "digest[question 0..answer 2]");
    assert_eq!(context.turns.len(), 4);
    assert_eq!(context.turns[0].content, "question 1");
    assert_eq!(context.turns[3].content, "answer 2");
    assert_eq!(memory.active_memory(), context.memory);

    let status = memory.status();
    assert_eq!(status.turns, 6);
    assert_eq!(status.cursor, 6);
    assert_eq!(status.pending, 0);
    assert_eq!(status.snapshots, 1);
}

#[tokio::test]
async fn appends_do_not_wait_for_a_stalled_summarizer() {
    let (summarizer, entered, release) = ScriptedSummarizer::gated();
    let memory = ConversationMemory::start(test_config(2), Arc::new(summarizer));

    chat(&memory, 1);
    entered.notified().await;
    assert_eq!(memory.status().state, CycleState::Running);

    chat(&memory, 5);
    assert_eq!(memory.log().len(), 12);
    assert_eq!(memory.active_memory(), "");

    release.notify_one();
    assert!(wait_until(|| memory.status().pending == 0 && !memory.engine().is_running()).await);
    assert_eq!(memory.status().cursor, 12);
}

#[tokio::test]
async fn state_round_trips_through_local_store() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = LocalMemoryStateStore::new(temp.path().join("nested").join("conversation.json"));
    assert!(store.load().expect("load missing file").is_none());

    let summarizer = Arc::new(ScriptedSummarizer::new());
    let memory = ConversationMemory::start(test_config(4), summarizer.clone());
    chat(&memory, 2);
    assert!(wait_until(|| memory.status().snapshots == 1).await);
    chat(&memory, 1);

    let state = memory.state();
    store.save(&state.clone().into()).expect("save state");
    let loaded = store.load().expect("load state").expect("state present");
    assert_eq!(loaded, state);
    assert_eq!(loaded.cursor, 4);
    assert_eq!(loaded.turns.len(), 6);
    assert_eq!(loaded.next_snapshot_id, 1);

    let restored =
        ConversationMemory::start_with_state(test_config(4), summarizer, loaded).expect("restore");
    assert_eq!(restored.status().cursor, 4);
    assert_eq!(restored.status().pending, 2);
    assert_eq!(restored.active_memory(), "digest[question 0..answer 1]");
}

#[tokio::test]
async fn restore_catches_up_on_pending_turns() {
    let seed = ConversationMemory::start(test_config(100), Arc::new(ScriptedSummarizer::new()));
    chat(&seed, 4);
    let state = seed.state();
    assert_eq!(state.cursor, 0);

    let summarizer = Arc::new(ScriptedSummarizer::new());
    let restored = ConversationMemory::start_with_state(test_config(8), summarizer.clone(), state)
        .expect("restore");
    assert!(wait_until(|| restored.status().cursor == 8).await);
    assert_eq!(summarizer.call_count(), 1);
}

#[tokio::test]
async fn restore_applies_retention_cap() {
    let summarizer = Arc::new(ScriptedSummarizer::new());
    let mut wide = test_config(1);
    wide.retention_cap = 20;
    let seed = ConversationMemory::start(wide, summarizer.clone());
    for n in 0..5 {
        seed.append(Role::User, format!("note {n}")).expect("append");
        assert!(wait_until(|| seed.status().snapshots == n + 1).await);
    }
    let state = seed.state();

    let mut narrow = test_config(1);
    narrow.retention_cap = 3;
    let restored = ConversationMemory::start_with_state(narrow, summarizer, state).expect("restore");
    let ids = restored
        .snapshots()
        .all()
        .iter()
        .map(|snapshot| snapshot.id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![5, 4, 3]);
}

#[tokio::test]
async fn restore_rejects_cursor_beyond_log() {
    let state = ConversationState {
        cursor: 3,
        ..ConversationState::default()
    };
    let error = ConversationMemory::start_with_state(
        test_config(5),
        Arc::new(ScriptedSummarizer::new()),
        state,
    )
    .err()
    .expect("cursor beyond empty log");
    assert!(matches!(error, MemoryError::InvariantViolation(_)));
}

#[test]
fn corrupt_state_file_is_a_persistence_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("conversation.json");
    std::fs::write(&path, "{ not json").expect("write corrupt file");

    let store = LocalMemoryStateStore::new(&path).with_strict_startup(true);
    assert!(store.strict_startup());
    assert_eq!(store.backend_name(), "local");
    let error = store.load().expect_err("corrupt state");
    assert!(matches!(error, MemoryError::Persistence(_)));
}
