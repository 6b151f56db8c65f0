/// Stable event names for agent-level structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AgentEvent {
    TurnCompleted,
    CompletionFailed,
    StateRestored,
    StateLoadFailed,
    StateSaveSucceeded,
    StateSaveFailed,
    ManualConsolidation,
}

impl AgentEvent {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::TurnCompleted => "agent.turn.completed",
            Self::CompletionFailed => "agent.turn.completion_failed",
            Self::StateRestored => "agent.memory.state_restored",
            Self::StateLoadFailed => "agent.memory.state_load_failed",
            Self::StateSaveSucceeded => "agent.memory.state_save_succeeded",
            Self::StateSaveFailed => "agent.memory.state_save_failed",
            Self::ManualConsolidation => "agent.memory.manual_consolidation",
        }
    }
}
