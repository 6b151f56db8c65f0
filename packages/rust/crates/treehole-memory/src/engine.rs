//! Consolidation engine: folds pending turns into a rolling memory digest.
//!
//! Cycle states: `Idle -> TriggerCheck -> (skip | Running) -> (Committed | Failed) -> Idle`.
//! At most one cycle runs at a time; the in-flight flag, not the threshold, is
//! what keeps a burst of appends from starting duplicate cycles.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cursor::ConsolidationCursor;
use crate::error::{MemoryError, Result};
use crate::message_log::{DEFAULT_NOTIFICATION_CAPACITY, MessageLog};
use crate::observability::MemoryEvent;
use crate::snapshot_store::{MemorySnapshotStore, SnapshotKind};
use crate::turn::{AnnotatedTurn, Turn};

/// Default pending-turn count that starts an automatic cycle.
pub const DEFAULT_CONSOLIDATION_THRESHOLD: usize = 50;
/// Default number of recent turns a manual cycle re-summarizes.
pub const DEFAULT_MANUAL_WINDOW: usize = 500;
/// Default number of retained snapshots.
pub const DEFAULT_RETENTION_CAP: usize = 10;

const DEFAULT_SUMMARY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MIN_RETRY_INTERVAL: Duration = Duration::from_secs(10);
const CYCLE_REPORT_CAPACITY: usize = 32;

/// External collaborator that merges a batch of turns into the prior digest.
///
/// Contract: treat `old_memory` as authoritative prior knowledge, integrate new
/// facts from `batch`, resolve conflicts in favor of newer information, prune
/// stale trivia, and keep a dated chronological account of notable events.
/// The engine treats the returned digest as opaque text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Produce the replacement digest.
    async fn summarize(&self, old_memory: &str, batch: &[AnnotatedTurn]) -> anyhow::Result<String>;
}

/// Engine tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsolidationConfig {
    /// Pending turns required before an automatic cycle runs.
    pub threshold: usize,
    /// Recent turns re-summarized by a manual cycle.
    pub manual_window: usize,
    /// Maximum retained snapshots.
    pub retention_cap: usize,
    /// Upper bound on one summarization call.
    pub summary_timeout: Duration,
    /// Minimum time between a failed automatic cycle and the next attempt.
    pub min_retry_interval: Duration,
    /// Capacity of the message log's append notification channel.
    pub notification_capacity: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONSOLIDATION_THRESHOLD,
            manual_window: DEFAULT_MANUAL_WINDOW,
            retention_cap: DEFAULT_RETENTION_CAP,
            summary_timeout: DEFAULT_SUMMARY_TIMEOUT,
            min_retry_interval: DEFAULT_MIN_RETRY_INTERVAL,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

impl ConsolidationConfig {
    /// Clamp counts to at least 1.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.threshold = self.threshold.max(1);
        self.manual_window = self.manual_window.max(1);
        self.retention_cap = self.retention_cap.max(1);
        self.notification_capacity = self.notification_capacity.max(1);
        self
    }
}

/// What asked for a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Message log append notification.
    Append,
    /// Explicit request; ignores threshold and backoff.
    Manual,
}

impl Trigger {
    /// Log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Manual => "manual",
        }
    }
}

/// Engine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    /// No cycle in progress.
    Idle,
    /// Deciding whether to run.
    TriggerCheck,
    /// Waiting on the summarizer.
    Running,
    /// Snapshot written, cursor advanced.
    Committed,
    /// Cycle failed; nothing was written.
    Failed,
}

/// Why a trigger check did not run a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skip {
    /// Not enough pending turns.
    BelowThreshold {
        /// Turns pending at check time.
        pending: usize,
        /// Configured threshold.
        threshold: usize,
    },
    /// Another cycle is running.
    InFlight,
    /// Last automatic attempt failed too recently.
    Backoff {
        /// Time left before the next attempt is allowed.
        retry_in: Duration,
    },
    /// The selected batch is empty.
    NothingPending,
}

/// Result of one cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Snapshot appended and cursor advanced.
    Committed {
        /// Id of the new snapshot.
        snapshot_id: u64,
        /// Snapshots evicted by retention.
        evicted: usize,
    },
    /// Summarizer failed, timed out or returned an empty digest.
    Failed {
        /// Failure description.
        error: String,
    },
    /// Caller cancelled a manual cycle; nothing was written.
    Cancelled,
}

/// Report broadcast after every cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleReport {
    /// What started the cycle.
    pub trigger: Trigger,
    /// How it ended.
    pub outcome: CycleOutcome,
    /// Turns handed to the summarizer.
    pub batch_len: usize,
    /// Cursor before the cycle.
    pub cursor_before: usize,
    /// Cursor after the cycle.
    pub cursor_after: usize,
}

impl CycleReport {
    /// Whether the cycle committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Committed { .. })
    }
}

/// Result of a trigger check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerResult {
    /// No cycle ran.
    Skipped(Skip),
    /// A cycle ran to completion or cancellation.
    Ran(CycleReport),
}

impl TriggerResult {
    /// The cycle report, when a cycle ran.
    #[must_use]
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Ran(report) => Some(report),
            Self::Skipped(_) => None,
        }
    }
}

struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
    idle: &'a Notify,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}

/// Decides when to consolidate, calls the summarizer, commits snapshots and
/// advances the cursor.
pub struct ConsolidationEngine {
    log: MessageLog,
    snapshots: MemorySnapshotStore,
    cursor: ConsolidationCursor,
    summarizer: Arc<dyn Summarizer>,
    config: ConsolidationConfig,
    in_flight: AtomicBool,
    rerun_requested: AtomicBool,
    scheduled_checks: AtomicUsize,
    idle: Notify,
    state: Mutex<CycleState>,
    last_failure: Mutex<Option<Instant>>,
    reports: broadcast::Sender<CycleReport>,
}

impl ConsolidationEngine {
    /// Engine over the given stores.
    #[must_use]
    pub fn new(
        log: MessageLog,
        snapshots: MemorySnapshotStore,
        cursor: ConsolidationCursor,
        summarizer: Arc<dyn Summarizer>,
        config: ConsolidationConfig,
    ) -> Self {
        let (reports, _) = broadcast::channel(CYCLE_REPORT_CAPACITY);
        Self {
            log,
            snapshots,
            cursor,
            summarizer,
            config: config.normalized(),
            in_flight: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            scheduled_checks: AtomicUsize::new(0),
            idle: Notify::new(),
            state: Mutex::new(CycleState::Idle),
            last_failure: Mutex::new(None),
            reports,
        }
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Current engine state.
    #[must_use]
    pub fn state(&self) -> CycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current cursor offset.
    #[must_use]
    pub fn cursor_offset(&self) -> usize {
        self.cursor.get()
    }

    /// Turns appended since the cursor.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.cursor.pending()
    }

    /// Whether a cycle is running right now.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether a cycle is running or an automatic check has been scheduled.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) || self.scheduled_checks.load(Ordering::SeqCst) > 0
    }

    /// Wait until no cycle is running and no scheduled check is outstanding.
    ///
    /// Follow-up checks requested while a cycle ran are waited for too.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if !self.is_busy() {
                return;
            }
            idle.await;
        }
    }

    /// Receive a [`CycleReport`] for every finished cycle.
    #[must_use]
    pub fn subscribe_cycles(&self) -> broadcast::Receiver<CycleReport> {
        self.reports.subscribe()
    }

    fn set_state(&self, state: CycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard {
                flag: &self.in_flight,
                idle: &self.idle,
            })
    }

    fn backoff_remaining(&self) -> Option<Duration> {
        let last_failure = *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let elapsed = last_failure?.elapsed();
        (elapsed < self.config.min_retry_interval)
            .then(|| self.config.min_retry_interval.saturating_sub(elapsed))
    }

    fn record_failure(&self, failed: bool) {
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = failed.then(Instant::now);
    }

    /// Subscribe to message log appends and run a trigger check for each.
    ///
    /// The task holds a weak reference and exits once the engine is dropped.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut notices = self.log.subscribe();
        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // Pending is derived from the cursor, so dropped notices lose nothing.
                        tracing::debug!(
                            event = MemoryEvent::NotificationsLagged.as_str(),
                            skipped,
                            "append listener lagged behind notifications"
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.notify();
            }
        })
    }

    /// Non-blocking trigger: schedule an automatic check if enough turns are pending.
    ///
    /// While a cycle is running this only records that one more check is wanted.
    pub fn notify(self: &Arc<Self>) {
        if self.pending() < self.config.threshold {
            return;
        }
        self.rerun_requested.store(true, Ordering::SeqCst);
        if self.in_flight.load(Ordering::SeqCst) {
            return;
        }
        self.scheduled_checks.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _ = engine.check().await;
            engine.scheduled_checks.fetch_sub(1, Ordering::SeqCst);
            engine.idle.notify_waiters();
        });
    }

    /// Automatic trigger check, awaited inline.
    ///
    /// Returns the result of the first check. If appends arrived while that
    /// cycle ran, one follow-up check runs before returning.
    pub async fn check(&self) -> TriggerResult {
        let first = self.check_once().await;
        let mut ran = matches!(first, TriggerResult::Ran(_));
        while ran && self.rerun_requested.swap(false, Ordering::SeqCst) {
            ran = matches!(self.check_once().await, TriggerResult::Ran(_));
        }
        first
    }

    async fn check_once(&self) -> TriggerResult {
        let threshold = self.config.threshold;
        let pending = self.pending();
        if pending < threshold {
            return self.skip(Trigger::Append, Skip::BelowThreshold { pending, threshold });
        }
        if let Some(retry_in) = self.backoff_remaining() {
            return self.skip(Trigger::Append, Skip::Backoff { retry_in });
        }
        let Some(_guard) = self.try_begin() else {
            self.rerun_requested.store(true, Ordering::SeqCst);
            return self.skip(Trigger::Append, Skip::InFlight);
        };
        self.rerun_requested.store(false, Ordering::SeqCst);
        self.set_state(CycleState::TriggerCheck);

        // A cycle that finished between the first read and the guard may have drained it.
        let pending = self.pending();
        let result = if pending < threshold {
            self.skip(Trigger::Append, Skip::BelowThreshold { pending, threshold })
        } else {
            self.run_cycle(Trigger::Append, None).await
        };
        self.set_state(CycleState::Idle);
        result
    }

    /// Manual trigger: consolidate now regardless of threshold and backoff.
    ///
    /// Re-summarizes at least the last `manual_window` turns, extended back to
    /// the cursor when more turns than that are pending, and advances the
    /// cursor to the pre-cycle log length on success. Cancelling `cancel`
    /// before the summarizer is called has no side effects; cancelling during
    /// the call discards its result.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::CollaboratorUnavailable`] when the cycle fails.
    pub async fn consolidate_now(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<TriggerResult> {
        let result = {
            let Some(_guard) = self.try_begin() else {
                return Ok(self.skip(Trigger::Manual, Skip::InFlight));
            };
            self.set_state(CycleState::TriggerCheck);
            let result = self.run_cycle(Trigger::Manual, Some(cancel)).await;
            self.set_state(CycleState::Idle);
            result
        };
        if self.rerun_requested.swap(false, Ordering::SeqCst) {
            self.notify();
        }
        if let TriggerResult::Ran(CycleReport {
            outcome: CycleOutcome::Failed { error },
            ..
        }) = &result
        {
            return Err(MemoryError::CollaboratorUnavailable(error.clone()));
        }
        Ok(result)
    }

    fn skip(&self, trigger: Trigger, reason: Skip) -> TriggerResult {
        tracing::trace!(
            event = MemoryEvent::TriggerSkipped.as_str(),
            trigger = trigger.as_str(),
            reason = ?reason,
            "consolidation trigger skipped"
        );
        TriggerResult::Skipped(reason)
    }

    async fn run_cycle(&self, trigger: Trigger, cancel: Option<&CancellationToken>) -> TriggerResult {
        // Turns appended after this point stay pending for the next cycle.
        let observed_len = self.log.len();
        let cursor_before = self.cursor.get();
        let start = match trigger {
            Trigger::Append => cursor_before,
            Trigger::Manual => {
                cursor_before.min(observed_len.saturating_sub(self.config.manual_window))
            }
        };
        if start >= observed_len {
            return self.skip(trigger, Skip::NothingPending);
        }

        let report = |outcome: CycleOutcome, batch_len: usize, cursor_after: usize| CycleReport {
            trigger,
            outcome,
            batch_len,
            cursor_before,
            cursor_after,
        };

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return self.finish(report(CycleOutcome::Cancelled, 0, cursor_before));
        }

        self.set_state(CycleState::Running);
        let old_memory = self
            .snapshots
            .latest()
            .map(|snapshot| snapshot.content)
            .unwrap_or_default();
        let batch = self
            .log
            .range(start, Some(observed_len))
            .iter()
            .map(Turn::annotate)
            .collect::<Vec<_>>();
        let batch_len = batch.len();
        tracing::debug!(
            event = MemoryEvent::CycleStarted.as_str(),
            trigger = trigger.as_str(),
            cursor = cursor_before,
            start,
            observed_len,
            batch_len,
            old_memory_chars = old_memory.chars().count(),
            "consolidation cycle started"
        );

        let call = tokio::time::timeout(
            self.config.summary_timeout,
            self.summarizer.summarize(&old_memory, &batch),
        );
        let response = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => None,
                response = call => Some(response),
            },
            None => Some(call.await),
        };

        let digest = match response {
            None => return self.finish(report(CycleOutcome::Cancelled, batch_len, cursor_before)),
            Some(Err(_elapsed)) => Err(format!(
                "summarizer timed out after {}ms",
                self.config.summary_timeout.as_millis()
            )),
            Some(Ok(Err(error))) => Err(format!("{error:#}")),
            Some(Ok(Ok(digest))) if digest.trim().is_empty() => {
                Err("summarizer returned an empty digest".to_string())
            }
            Some(Ok(Ok(digest))) => Ok(digest.trim().to_string()),
        };

        let outcome = match digest {
            Ok(digest) => self.commit(digest, observed_len),
            Err(error) => {
                self.record_failure(true);
                CycleOutcome::Failed { error }
            }
        };
        let cursor_after = self.cursor.get();
        self.finish(report(outcome, batch_len, cursor_after))
    }

    fn commit(&self, digest: String, observed_len: usize) -> CycleOutcome {
        let cap = self.config.retention_cap;
        let (snapshot, evicted) =
            self.snapshots
                .commit(digest, SnapshotKind::Summary, observed_len, cap);
        let retained = self.snapshots.len();
        if retained > cap {
            let violation = MemoryError::RetentionViolation {
                count: retained,
                cap,
            };
            tracing::error!(
                event = MemoryEvent::RetentionViolated.as_str(),
                error = %violation,
                "snapshot store exceeded retention cap after commit"
            );
            debug_assert!(retained <= cap, "{violation}");
        }
        if let Err(error) = self.cursor.advance_to(observed_len) {
            tracing::error!(
                event = MemoryEvent::CycleCommitted.as_str(),
                error = %error,
                observed_len,
                "cursor advance rejected after commit"
            );
        }
        self.record_failure(false);
        CycleOutcome::Committed {
            snapshot_id: snapshot.id,
            evicted,
        }
    }

    fn finish(&self, report: CycleReport) -> TriggerResult {
        match &report.outcome {
            CycleOutcome::Committed {
                snapshot_id,
                evicted,
            } => {
                self.set_state(CycleState::Committed);
                tracing::info!(
                    event = MemoryEvent::CycleCommitted.as_str(),
                    trigger = report.trigger.as_str(),
                    snapshot_id,
                    evicted,
                    batch_len = report.batch_len,
                    cursor_before = report.cursor_before,
                    cursor_after = report.cursor_after,
                    "consolidation cycle committed"
                );
            }
            CycleOutcome::Failed { error } => {
                self.set_state(CycleState::Failed);
                tracing::warn!(
                    event = MemoryEvent::CycleFailed.as_str(),
                    trigger = report.trigger.as_str(),
                    batch_len = report.batch_len,
                    cursor = report.cursor_before,
                    error = %error,
                    "consolidation cycle failed; pending turns kept for retry"
                );
            }
            CycleOutcome::Cancelled => {
                tracing::debug!(
                    event = MemoryEvent::CycleCancelled.as_str(),
                    trigger = report.trigger.as_str(),
                    batch_len = report.batch_len,
                    "consolidation cycle cancelled"
                );
            }
        }
        let _ = self.reports.send(report.clone());
        TriggerResult::Ran(report)
    }
}

impl std::fmt::Debug for ConsolidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsolidationEngine")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("cursor", &self.cursor.get())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
