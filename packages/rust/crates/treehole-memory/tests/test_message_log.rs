#![allow(missing_docs)]

mod common;

use chrono::Utc;
use common::fill;
use treehole_memory::{
    ContextWindowBuilder, ConsolidationCursor, Invariant, MemoryError, MessageLog, NewTurn, Role,
};

#[test]
fn append_assigns_contiguous_offsets() {
    let log = MessageLog::default();
    let first = log.append(NewTurn::new(Role::User, "hi")).expect("append");
    let second = log
        .append(NewTurn::new(Role::Assistant, "hello"))
        .expect("append");

    assert_eq!(first.seq, 1);
    assert_eq!(second.seq, 2);
    assert_ne!(first.id, second.id);
    assert!(second.created_at_ms >= first.created_at_ms);
    assert_eq!(log.len(), 2);
}

#[test]
fn blank_content_is_rejected_without_appending() {
    let log = MessageLog::default();
    let error = log
        .append(NewTurn::new(Role::User, "  \n\t "))
        .expect_err("blank content");
    assert!(matches!(error, MemoryError::Validation(_)));
    assert!(log.is_empty());
}

#[test]
fn unknown_role_is_rejected() {
    let error = NewTurn::parse("system", "hello").expect_err("unknown role");
    assert!(matches!(error, MemoryError::Validation(_)));
    assert!(NewTurn::parse("Assistant", "hello").is_ok());
}

#[test]
fn explicit_timestamp_older_than_newest_is_rejected() {
    let log = MessageLog::default();
    log.append(NewTurn::new(Role::User, "later").with_created_at_ms(2_000))
        .expect("append");

    let error = log
        .append(NewTurn::new(Role::Assistant, "earlier").with_created_at_ms(1_000))
        .expect_err("reordering append");
    assert!(matches!(
        error,
        MemoryError::InvariantViolation(Invariant::Reorder {
            newest_ms: 2_000,
            attempted_ms: 1_000
        })
    ));
    assert_eq!(log.len(), 1);

    let same_ms = log
        .append(NewTurn::new(Role::Assistant, "same millisecond").with_created_at_ms(2_000))
        .expect("equal timestamps keep append order");
    assert_eq!(same_ms.seq, 2);
}

#[test]
fn implicit_timestamp_never_goes_backwards() {
    let log = MessageLog::default();
    let future = u64::MAX / 2;
    log.append(NewTurn::new(Role::User, "from the future").with_created_at_ms(future))
        .expect("append");
    let now = log.append(NewTurn::new(Role::Assistant, "now")).expect("append");
    assert_eq!(now.created_at_ms, future);
}

#[test]
fn range_is_half_open_and_clamped() {
    let log = MessageLog::default();
    fill(&log, 10);

    let middle = log.range(3, Some(6));
    assert_eq!(
        middle.iter().map(|turn| turn.seq).collect::<Vec<_>>(),
        vec![4, 5, 6]
    );
    assert_eq!(log.range(8, None).len(), 2);
    assert_eq!(log.range(8, Some(100)).len(), 2);
    assert!(log.range(10, None).is_empty());
    assert!(log.range(7, Some(5)).is_empty());
}

#[test]
fn recent_returns_tail_in_order() {
    let log = MessageLog::default();
    fill(&log, 5);
    let tail = log.recent(3);
    assert_eq!(
        tail.iter().map(|turn| turn.content.as_str()).collect::<Vec<_>>(),
        vec!["turn 3", "turn 4", "turn 5"]
    );
    assert_eq!(log.recent(50).len(), 5);
}

#[tokio::test]
async fn subscribers_receive_append_notices() {
    let log = MessageLog::new(8);
    let mut notices = log.subscribe();
    fill(&log, 2);

    let first = notices.recv().await.expect("first notice");
    let second = notices.recv().await.expect("second notice");
    assert_eq!((first.offset, first.role), (1, Role::User));
    assert_eq!((second.offset, second.role), (2, Role::Assistant));
}

#[test]
fn from_turns_rejects_gaps_in_sequence() {
    let log = MessageLog::default();
    fill(&log, 3);
    let mut turns = log.turns();
    turns.remove(1);

    let error = MessageLog::from_turns(turns, 8).expect_err("gap in offsets");
    assert!(matches!(error, MemoryError::Persistence(_)));
}

#[test]
fn window_holds_last_turns_oldest_first() {
    let log = MessageLog::default();
    fill(&log, 60);
    let window = ContextWindowBuilder::new(log.clone()).build_in(50, &Utc);

    assert_eq!(window.len(), 50);
    assert_eq!(window[0].content, "turn 11");
    assert_eq!(window[49].content, "turn 60");
    assert!(
        window
            .windows(2)
            .all(|pair| pair[0].created_at_ms <= pair[1].created_at_ms)
    );
}

#[test]
fn window_returns_everything_when_log_is_short() {
    let log = MessageLog::default();
    fill(&log, 4);
    let window = ContextWindowBuilder::new(log).build(50);
    assert_eq!(window.len(), 4);
    assert_eq!(window[0].role, Role::User);
    assert_eq!(window[1].role, Role::Assistant);
}

#[test]
fn window_labels_render_in_requested_zone() {
    let log = MessageLog::default();
    log.append(NewTurn::new(Role::User, "hi").with_created_at_ms(1_770_930_300_000))
        .expect("append");
    let window = ContextWindowBuilder::new(log).build_in(1, &Utc);
    assert_eq!(window[0].label, "02/12 21:05");
}

#[test]
fn cursor_only_moves_forward_within_the_log() {
    let log = MessageLog::default();
    fill(&log, 10);
    let cursor = ConsolidationCursor::new(log.clone());
    assert_eq!(cursor.get(), 0);
    assert_eq!(cursor.pending(), 10);

    assert_eq!(cursor.advance_to(6).expect("advance"), 0);
    assert_eq!(cursor.pending(), 4);
    assert_eq!(cursor.advance_to(6).expect("no-op advance"), 6);

    let regression = cursor.advance_to(5).expect_err("regression");
    assert!(matches!(
        regression,
        MemoryError::InvariantViolation(Invariant::CursorRegression {
            current: 6,
            requested: 5
        })
    ));

    let beyond = cursor.advance_to(11).expect_err("beyond the log");
    assert!(matches!(
        beyond,
        MemoryError::InvariantViolation(Invariant::CursorBeyondLog {
            requested: 11,
            log_len: 10
        })
    ));
    assert_eq!(cursor.get(), 6);
}

#[test]
fn restored_cursor_must_fit_the_log() {
    let log = MessageLog::default();
    fill(&log, 3);
    assert!(ConsolidationCursor::with_offset(log.clone(), 3).is_ok());
    assert!(ConsolidationCursor::with_offset(log, 4).is_err());
}
