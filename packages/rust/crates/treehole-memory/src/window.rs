//! Context window: the verbatim tail of the message log sent with each request.

use std::fmt::Display;

use chrono::{Local, TimeZone};

use crate::message_log::MessageLog;
use crate::turn::AnnotatedTurn;

/// Builds the bounded, chronologically ordered window of recent turns.
#[derive(Clone, Debug)]
pub struct ContextWindowBuilder {
    log: MessageLog,
}

impl ContextWindowBuilder {
    /// Builder over `log`.
    #[must_use]
    pub fn new(log: MessageLog) -> Self {
        Self { log }
    }

    /// Last `max_turns` turns (all when fewer exist), oldest first, labelled in local time.
    #[must_use]
    pub fn build(&self, max_turns: usize) -> Vec<AnnotatedTurn> {
        self.build_in(max_turns, &Local)
    }

    /// Same as [`Self::build`] with labels rendered in `tz`.
    #[must_use]
    pub fn build_in<Tz>(&self, max_turns: usize, tz: &Tz) -> Vec<AnnotatedTurn>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        self.log
            .recent(max_turns)
            .iter()
            .map(|turn| turn.annotate_in(tz))
            .collect()
    }
}
