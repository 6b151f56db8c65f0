//! Shared test helpers: scripted summarizers and engine wiring.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use treehole_memory::{
    AnnotatedTurn, ConsolidationConfig, ConsolidationCursor, ConsolidationEngine, MemorySnapshotStore,
    MessageLog, NewTurn, Role, Summarizer,
};

/// One recorded summarizer call.
#[derive(Clone, Debug)]
pub struct SummarizeCall {
    pub old_memory: String,
    pub contents: Vec<String>,
}

/// Summarizer that records calls and can be switched into failure mode.
///
/// With a gate installed, the first call blocks until `release` is notified.
#[derive(Default)]
pub struct ScriptedSummarizer {
    calls: Mutex<Vec<SummarizeCall>>,
    failing: AtomicBool,
    started: AtomicUsize,
    delay: Option<Duration>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl ScriptedSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Returns (summarizer, entered, release).
    pub fn gated() -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let summarizer = Self {
            gate: Some((Arc::clone(&entered), Arc::clone(&release))),
            ..Self::default()
        };
        (summarizer, entered, release)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SummarizeCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, old_memory: &str, batch: &[AnnotatedTurn]) -> anyhow::Result<String> {
        let call_index = self.started.fetch_add(1, Ordering::SeqCst);
        if call_index == 0
            && let Some((entered, release)) = &self.gate
        {
            entered.notify_one();
            release.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("summarizer offline");
        }
        self.calls.lock().expect("calls lock").push(SummarizeCall {
            old_memory: old_memory.to_string(),
            contents: batch.iter().map(|turn| turn.content.clone()).collect(),
        });
        let first = batch.first().map_or("", |turn| turn.content.as_str());
        let last = batch.last().map_or("", |turn| turn.content.as_str());
        Ok(format!("digest[{first}..{last}]"))
    }
}

/// Config with no retry backoff and a short summary timeout.
pub fn test_config(threshold: usize) -> ConsolidationConfig {
    ConsolidationConfig {
        threshold,
        min_retry_interval: Duration::ZERO,
        summary_timeout: Duration::from_secs(2),
        ..ConsolidationConfig::default()
    }
}

pub struct Harness {
    pub log: MessageLog,
    pub snapshots: MemorySnapshotStore,
    pub engine: Arc<ConsolidationEngine>,
}

pub fn harness(summarizer: Arc<dyn Summarizer>, config: ConsolidationConfig) -> Harness {
    let log = MessageLog::default();
    let snapshots = MemorySnapshotStore::new();
    let cursor = ConsolidationCursor::new(log.clone());
    let engine = Arc::new(ConsolidationEngine::new(
        log.clone(),
        snapshots.clone(),
        cursor,
        summarizer,
        config,
    ));
    Harness {
        log,
        snapshots,
        engine,
    }
}

/// Append `count` alternating turns named `turn <n>` (1-based, continuing the log).
pub fn fill(log: &MessageLog, count: usize) {
    for _ in 0..count {
        let n = log.len() + 1;
        let role = if n % 2 == 1 { Role::User } else { Role::Assistant };
        log.append(NewTurn::new(role, format!("turn {n}")))
            .expect("append should succeed");
    }
}

/// Parse the `n` out of `turn <n>`.
pub fn turn_number(content: &str) -> usize {
    content
        .strip_prefix("turn ")
        .and_then(|n| n.parse().ok())
        .expect("content should be `turn <n>`")
}

/// Poll `condition` every 5ms for up to 2s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
