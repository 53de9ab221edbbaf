use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use guard_proto::telemetry::TelemetryRecord;

#[derive(Debug, Default)]
struct Slot {
    record: Option<TelemetryRecord>,
    fresh: bool,
    closed: bool,
    published: u64,
}

/// Single-slot handoff between the link reader and the control loop.
/// The reader overwrites, the loop takes; neither side ever waits on the network.
#[derive(Debug, Clone, Default)]
pub struct LatestRecord {
    inner: Arc<Mutex<Slot>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSnapshot {
    /// Record published since the previous `take`, if any.
    pub fresh: Option<TelemetryRecord>,
    pub closed: bool,
}

impl LatestRecord {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        // a panicking writer cannot leave a half-written Copy record behind
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, rec: TelemetryRecord) {
        let mut s = self.slot();
        s.record = Some(rec);
        s.fresh = true;
        s.published += 1;
    }

    pub fn mark_closed(&self) {
        self.slot().closed = true;
    }

    pub fn take(&self) -> CellSnapshot {
        let mut s = self.slot();
        let fresh = if s.fresh { s.record } else { None };
        s.fresh = false;
        CellSnapshot { fresh, closed: s.closed }
    }

    pub fn is_closed(&self) -> bool {
        self.slot().closed
    }

    pub fn published(&self) -> u64 {
        self.slot().published
    }
}
