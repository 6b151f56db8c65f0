#![allow(missing_docs)]

mod common;

use std::path::Path;
use std::sync::Arc;

use common::{ScriptedSummarizer, test_config};
use treehole_memory::{
    ConversationMemory, LocalMemoryStateStore, MemoryError, MemoryStateStore, Role,
    StateCheckpoint,
};

fn chat(memory: &ConversationMemory, from: usize, to: usize) {
    for n in from..to {
        memory
            .append(Role::User, format!("line {n}"))
            .expect("append turn");
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[tokio::test]
async fn saves_append_only_new_turns() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = LocalMemoryStateStore::new(temp.path().join("conversation.json"));
    let memory = ConversationMemory::start(test_config(100), Arc::new(ScriptedSummarizer::new()));

    chat(&memory, 0, 4);
    store.save(&memory.checkpoint(0)).expect("first save");
    let first = std::fs::read(store.turns_path()).expect("turn log");

    chat(&memory, 4, 6);
    let checkpoint = memory.checkpoint(4);
    assert_eq!(checkpoint.turns.len(), 2);
    assert_eq!(checkpoint.turn_count(), 6);
    store.save(&checkpoint).expect("second save");

    let second = std::fs::read(store.turns_path()).expect("turn log");
    assert!(second.starts_with(&first));
    assert_eq!(second.iter().filter(|byte| **byte == b'\n').count(), 6);

    let reloaded = LocalMemoryStateStore::new(store.path())
        .load()
        .expect("load")
        .expect("state present");
    assert_eq!(reloaded, memory.state());
}

#[tokio::test]
async fn uncommitted_turn_lines_are_ignored_then_truncated() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = LocalMemoryStateStore::new(temp.path().join("conversation.json"));
    let memory = ConversationMemory::start(test_config(100), Arc::new(ScriptedSummarizer::new()));
    chat(&memory, 0, 3);
    store.save(&memory.checkpoint(0)).expect("save");

    let mut raw = std::fs::read_to_string(store.turns_path()).expect("turn log");
    raw.push_str("{\"id\":\"interrupted");
    std::fs::write(store.turns_path(), raw).expect("append partial line");

    let reopened = LocalMemoryStateStore::new(store.path());
    let state = reopened.load().expect("load").expect("state present");
    assert_eq!(state.turns.len(), 3);

    chat(&memory, 3, 4);
    reopened.save(&memory.checkpoint(3)).expect("save after reopen");
    let raw = std::fs::read_to_string(store.turns_path()).expect("turn log");
    assert!(!raw.contains("interrupted"));
    assert_eq!(raw.lines().count(), 4);
}

#[test]
fn checkpoint_past_stored_turns_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = LocalMemoryStateStore::new(temp.path().join("conversation.json"));
    let checkpoint = StateCheckpoint {
        turns_from: 3,
        ..StateCheckpoint::default()
    };
    let error = store.save(&checkpoint).expect_err("gap before checkpoint");
    assert!(matches!(error, MemoryError::Persistence(_)));
}

#[test]
fn turn_log_without_state_file_is_unreadable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = LocalMemoryStateStore::new(temp.path().join("conversation.json"));
    std::fs::write(store.turns_path(), "{}\n").expect("write orphan turn log");
    assert!(matches!(store.load(), Err(MemoryError::Persistence(_))));
}

#[test]
fn set_aside_keeps_unreadable_files_intact() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = LocalMemoryStateStore::new(temp.path().join("conversation.json"));
    std::fs::write(store.path(), "{ not json").expect("write corrupt state");
    std::fs::write(store.turns_path(), "precious\n").expect("write turn log");

    assert!(store.load().is_err());
    assert!(store.set_aside().expect("set aside"));
    assert!(!store.path().exists());
    assert!(!store.turns_path().exists());

    let names = file_names(temp.path());
    let kept_state = names
        .iter()
        .find(|name| name.starts_with("conversation.json.corrupt-"))
        .expect("state moved aside");
    let kept_turns = names
        .iter()
        .find(|name| name.starts_with("conversation.turns.jsonl.corrupt-"))
        .expect("turn log moved aside");
    assert_eq!(
        std::fs::read_to_string(temp.path().join(kept_state)).expect("read kept state"),
        "{ not json"
    );
    assert_eq!(
        std::fs::read_to_string(temp.path().join(kept_turns)).expect("read kept turns"),
        "precious\n"
    );

    store
        .save(&StateCheckpoint::default())
        .expect("save into fresh files");
    assert!(store.load().expect("load").is_some());
}

#[tokio::test]
async fn failed_replace_leaves_no_temp_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = LocalMemoryStateStore::new(temp.path().join("conversation.json"));
    let memory = ConversationMemory::start(test_config(100), Arc::new(ScriptedSummarizer::new()));
    chat(&memory, 0, 2);
    store.save(&memory.checkpoint(0)).expect("save");

    std::fs::remove_file(store.path()).expect("remove state file");
    std::fs::create_dir(store.path()).expect("directory in its place");
    std::fs::write(store.path().join("occupied"), "x").expect("fill directory");

    chat(&memory, 2, 3);
    assert!(store.save(&memory.checkpoint(2)).is_err());
    assert!(
        file_names(temp.path())
            .iter()
            .all(|name| !name.ends_with(".tmp")),
        "{:?}",
        file_names(temp.path())
    );
}
