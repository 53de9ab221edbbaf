use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Transition,
    CallFailed,
    RecordRejected,
    LinkClosed,
    Shutdown,
}

/// Post-flight audit record: one decision of the controller together with the
/// state and distances it was taken under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts_unix_ms: i64,
    pub kind: AuditKind,
    pub phase: String,
    pub authority: String,
    pub bottom_cm: Option<f64>,
    pub front_cm: Option<f64>,
    pub msg: String,
}

impl AuditEvent {
    pub fn now(kind: AuditKind, phase: String, authority: String, msg: String) -> Self {
        Self {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            kind,
            phase,
            authority,
            bottom_cm: None,
            front_cm: None,
            msg,
        }
    }

    pub fn with_distances(mut self, distances: Option<(f64, f64)>) -> Self {
        if let Some((bottom, front)) = distances {
            self.bottom_cm = Some(bottom);
            self.front_cm = Some(front);
        }
        self
    }
}
