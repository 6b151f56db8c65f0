use std::sync::{Arc, Weak};
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use treehole_memory::{ConsolidationConfig, ConversationMemory, MemoryStateStore, Summarizer};

use crate::observability::AgentEvent;

/// Serializes saves so an older capture never overwrites a newer one, and
/// tracks how many turns the store already holds so each save only appends.
#[derive(Clone)]
pub(super) struct StatePersister {
    store: Arc<dyn MemoryStateStore>,
    saved_turns: Arc<Mutex<usize>>,
}

impl StatePersister {
    pub(super) fn new(store: Arc<dyn MemoryStateStore>, saved_turns: usize) -> Self {
        Self {
            store,
            saved_turns: Arc::new(Mutex::new(saved_turns)),
        }
    }

    pub(super) async fn save(&self, memory: &ConversationMemory, reason: &str) -> anyhow::Result<()> {
        let mut saved_turns = self.saved_turns.lock().await;
        let checkpoint = memory.checkpoint(*saved_turns);
        let turns = checkpoint.turn_count();
        let appended = checkpoint.turns.len();
        let store = Arc::clone(&self.store);
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || store.save(&checkpoint)).await;
        let result = match result {
            Ok(saved) => saved.map_err(anyhow::Error::from),
            Err(join_error) => Err(anyhow::anyhow!("state save task failed: {join_error}")),
        };
        match &result {
            Ok(()) => {
                *saved_turns = turns;
                tracing::debug!(
                    event = AgentEvent::StateSaveSucceeded.as_str(),
                    backend = self.store.backend_name(),
                    reason,
                    turns,
                    appended,
                    duration_ms = started.elapsed().as_millis(),
                    "conversation state persisted"
                );
            }
            Err(error) => tracing::warn!(
                event = AgentEvent::StateSaveFailed.as_str(),
                backend = self.store.backend_name(),
                reason,
                duration_ms = started.elapsed().as_millis(),
                error = %error,
                "failed to persist conversation state"
            ),
        }
        result
    }

    /// Save after every committed cycle until the memory is dropped.
    pub(super) fn spawn_cycle_saver(&self, memory: &Arc<ConversationMemory>) -> JoinHandle<()> {
        let mut reports = memory.engine().subscribe_cycles();
        let memory: Weak<ConversationMemory> = Arc::downgrade(memory);
        let persister = self.clone();
        tokio::spawn(async move {
            loop {
                match reports.recv().await {
                    Ok(report) if !report.is_committed() => continue,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                let Some(memory) = memory.upgrade() else {
                    break;
                };
                let _ = persister.save(&memory, "cycle_committed").await;
            }
        })
    }
}

/// Memory ready to use, plus how many of its turns the store already holds.
/// `saved_turns` is `None` when saving must stay off.
pub(super) struct StartedMemory {
    pub(super) memory: ConversationMemory,
    pub(super) saved_turns: Option<usize>,
}

/// Restore from `store`, or start empty when nothing usable was saved.
///
/// With strict startup, unreadable or invalid state is an error instead.
/// Otherwise the unreadable state is moved aside before anything is saved;
/// when that fails, saving stays off for this session.
pub(super) fn start_memory(
    config: ConsolidationConfig,
    summarizer: Arc<dyn Summarizer>,
    store: Option<&Arc<dyn MemoryStateStore>>,
) -> anyhow::Result<StartedMemory> {
    let Some(store) = store else {
        return Ok(StartedMemory {
            memory: ConversationMemory::start(config, summarizer),
            saved_turns: None,
        });
    };
    let restored = match store.load() {
        Ok(Some(state)) => {
            let turns = state.turns.len();
            ConversationMemory::start_with_state(config.clone(), Arc::clone(&summarizer), state)
                .map(|memory| Some((memory, turns)))
        }
        Ok(None) => Ok(None),
        Err(error) => Err(error),
    };
    match restored {
        Ok(Some((memory, turns))) => {
            let status = memory.status();
            tracing::info!(
                event = AgentEvent::StateRestored.as_str(),
                backend = store.backend_name(),
                turns = status.turns,
                snapshots = status.snapshots,
                cursor = status.cursor,
                "conversation memory restored"
            );
            Ok(StartedMemory {
                memory,
                saved_turns: Some(turns),
            })
        }
        Ok(None) => Ok(StartedMemory {
            memory: ConversationMemory::start(config, summarizer),
            saved_turns: Some(0),
        }),
        Err(error) if store.strict_startup() => Err(anyhow::Error::from(error)
            .context(format!("failed to restore conversation state ({})", store.backend_name()))),
        Err(error) => {
            let saved_turns = match store.set_aside() {
                Ok(true) => {
                    tracing::warn!(
                        event = AgentEvent::StateLoadFailed.as_str(),
                        backend = store.backend_name(),
                        error = %error,
                        "failed to restore conversation state; kept it aside and starting empty"
                    );
                    Some(0)
                }
                Ok(false) => {
                    tracing::warn!(
                        event = AgentEvent::StateLoadFailed.as_str(),
                        backend = store.backend_name(),
                        error = %error,
                        "failed to restore conversation state; starting empty with saving disabled"
                    );
                    None
                }
                Err(set_aside_error) => {
                    tracing::warn!(
                        event = AgentEvent::StateLoadFailed.as_str(),
                        backend = store.backend_name(),
                        error = %error,
                        set_aside_error = %set_aside_error,
                        "failed to restore conversation state; starting empty with saving disabled"
                    );
                    None
                }
            };
            Ok(StartedMemory {
                memory: ConversationMemory::start(config, summarizer),
                saved_turns,
            })
        }
    }
}
