//! Stable event names attached to every log record as `event = ...`.

/// Log-worthy transitions of the memory core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryEvent {
    /// A turn was appended to the message log.
    TurnAppended,
    /// A turn was rejected by validation or ordering checks.
    TurnRejected,
    /// The append listener fell behind the notification channel.
    NotificationsLagged,
    /// A trigger check decided not to run a cycle.
    TriggerSkipped,
    /// A consolidation cycle entered RUNNING.
    CycleStarted,
    /// A consolidation cycle committed a snapshot.
    CycleCommitted,
    /// A consolidation cycle failed without side effects.
    CycleFailed,
    /// A manual consolidation cycle was cancelled by its caller.
    CycleCancelled,
    /// Snapshots were evicted beyond the retention cap.
    SnapshotsEvicted,
    /// The consolidation cursor moved forward.
    CursorAdvanced,
    /// Persisted conversation state was loaded.
    StateLoaded,
    /// Conversation state was written to its backend.
    StateSaved,
    /// Unreadable conversation state was moved out of the way.
    StateSetAside,
    /// The snapshot store exceeded its cap after a commit.
    RetentionViolated,
}

impl MemoryEvent {
    /// Dotted identifier used in structured logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TurnAppended => "memory.log.turn_appended",
            Self::TurnRejected => "memory.log.turn_rejected",
            Self::NotificationsLagged => "memory.log.notifications_lagged",
            Self::TriggerSkipped => "memory.consolidation.trigger_skipped",
            Self::CycleStarted => "memory.consolidation.cycle_started",
            Self::CycleCommitted => "memory.consolidation.cycle_committed",
            Self::CycleFailed => "memory.consolidation.cycle_failed",
            Self::CycleCancelled => "memory.consolidation.cycle_cancelled",
            Self::SnapshotsEvicted => "memory.snapshots.evicted",
            Self::CursorAdvanced => "memory.cursor.advanced",
            Self::StateLoaded => "memory.state.loaded",
            Self::StateSaved => "memory.state.saved",
            Self::StateSetAside => "memory.state.set_aside",
            Self::RetentionViolated => "memory.snapshots.retention_violated",
        }
    }
}
