use std::time::{Duration, Instant};

use crate::operator::OperatorAction;

/// Per-action cooldown: a held or repeated trigger maps to at most one
/// attempt per window. Each action has its own window.
#[derive(Debug)]
pub struct ActionDebounce {
    last: [Option<Instant>; OperatorAction::COUNT],
    min_interval: Duration,
}

impl ActionDebounce {
    pub fn new(min_interval: Duration) -> Self {
        Self { last: [None; OperatorAction::COUNT], min_interval }
    }

    pub fn allow(&mut self, action: OperatorAction, now: Instant) -> bool {
        let slot = &mut self.last[action.index()];
        if let Some(t) = *slot {
            if now.saturating_duration_since(t) < self.min_interval { return false; }
        }
        *slot = Some(now);
        true
    }
}
