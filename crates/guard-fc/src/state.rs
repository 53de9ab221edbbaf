use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlightPhase {
    #[default]
    Grounded,
    Airborne { takeoff_at: Instant },
    /// Land call in flight; reverts to `Airborne` if the call fails.
    Landing { takeoff_at: Instant },
}

impl FlightPhase {
    pub fn is_airborne(&self) -> bool {
        matches!(self, FlightPhase::Airborne { .. })
    }

    pub fn airborne_for(&self, now: Instant) -> Option<Duration> {
        match self {
            FlightPhase::Airborne { takeoff_at } => Some(now.saturating_duration_since(*takeoff_at)),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FlightPhase::Grounded => "grounded",
            FlightPhase::Airborne { .. } => "airborne",
            FlightPhase::Landing { .. } => "landing",
        }
    }
}

impl fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What we last told the vehicle about stick authority. The vehicle may
/// still ignore us; this tracks intent only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlAuthority {
    #[default]
    Disabled,
    Enabled,
}

impl fmt::Display for ControlAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControlAuthority::Disabled => "disabled",
            ControlAuthority::Enabled => "enabled",
        })
    }
}
