use std::fmt;
use std::time::Duration;

use guard_proto::telemetry::TelemetryRecord;
use serde::Deserialize;

/// Four-axis stick output, computed fresh every tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AvoidanceCommand {
    pub yaw: f64,
    pub ascent: f64,
    pub roll: f64,
    pub pitch: f64,
}

impl AvoidanceCommand {
    pub const NEUTRAL: Self = Self { yaw: 0.0, ascent: 0.0, roll: 0.0, pitch: 0.0 };

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}

impl fmt::Display for AvoidanceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "yaw={:+.3} ascent={:+.3} roll={:+.3} pitch={:+.3}",
            self.yaw, self.ascent, self.roll, self.pitch
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvoidConfig {
    #[serde(default = "default_safe_distance")]
    pub safe_distance_cm: f64,
    #[serde(default = "default_move_value")]
    pub move_value: f64,
    #[serde(default = "default_rotate_value")]
    pub rotate_value: f64,
    #[serde(default = "default_stabilization")]
    pub stabilization_s: f64,
    #[serde(default)]
    pub min_range_cm: f64,
    #[serde(default = "default_max_range")]
    pub max_range_cm: f64,
    #[serde(default = "default_stale_after")]
    pub stale_after_ms: u64,
}

fn default_safe_distance() -> f64 { 30.0 }
fn default_move_value() -> f64 { 0.02 }
fn default_rotate_value() -> f64 { 0.15 }
fn default_stabilization() -> f64 { 5.0 }
fn default_max_range() -> f64 { 60.0 }
fn default_stale_after() -> u64 { 1000 }

impl Default for AvoidConfig {
    fn default() -> Self {
        Self {
            safe_distance_cm: default_safe_distance(),
            move_value: default_move_value(),
            rotate_value: default_rotate_value(),
            stabilization_s: default_stabilization(),
            min_range_cm: 0.0,
            max_range_cm: default_max_range(),
            stale_after_ms: default_stale_after(),
        }
    }
}

/// Single-threshold reactive avoidance on the vertical and forward axes.
#[derive(Debug, Clone, PartialEq)]
pub struct AvoidancePolicy {
    pub safe_distance_cm: f64,
    pub move_value: f64,
    pub rotate_value: f64,
    pub stabilization: Duration,
    pub min_range_cm: f64,
    pub max_range_cm: f64,
    pub stale_after: Duration,
}

impl Default for AvoidancePolicy {
    fn default() -> Self {
        AvoidancePolicy::from(&AvoidConfig::default())
    }
}

impl From<&AvoidConfig> for AvoidancePolicy {
    fn from(c: &AvoidConfig) -> Self {
        Self {
            safe_distance_cm: c.safe_distance_cm,
            move_value: c.move_value,
            rotate_value: c.rotate_value,
            stabilization: Duration::try_from_secs_f64(c.stabilization_s.max(0.0)).unwrap_or(Duration::MAX),
            min_range_cm: c.min_range_cm,
            max_range_cm: c.max_range_cm,
            stale_after: Duration::from_millis(c.stale_after_ms),
        }
    }
}

impl AvoidancePolicy {
    /// Plausible sensor range is `(min_range_cm, max_range_cm]` on both axes.
    pub fn plausible(&self, rec: &TelemetryRecord) -> bool {
        rec.within_range(self.min_range_cm, self.max_range_cm)
    }

    pub fn correction(&self, rec: &TelemetryRecord) -> AvoidanceCommand {
        let mut cmd = AvoidanceCommand::NEUTRAL;
        if rec.bottom_distance_cm < self.safe_distance_cm {
            cmd.ascent = self.move_value;
        }
        if rec.front_distance_cm < self.safe_distance_cm {
            cmd.pitch = -self.move_value;
        }
        self.bounded(cmd)
    }

    /// Clamp every axis to the gentle-motion envelope.
    pub fn bounded(&self, cmd: AvoidanceCommand) -> AvoidanceCommand {
        let m = self.move_value.abs();
        let r = self.rotate_value.abs();
        AvoidanceCommand {
            yaw: cmd.yaw.clamp(-r, r),
            ascent: cmd.ascent.clamp(-m, m),
            roll: cmd.roll.clamp(-m, m),
            pitch: cmd.pitch.clamp(-m, m),
        }
    }
}
