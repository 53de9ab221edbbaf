use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::avoid::AvoidanceCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuatorCall {
    Takeoff,
    Land,
    EnableControl,
    DisableControl,
    Move,
}

impl fmt::Display for ActuatorCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActuatorCall::Takeoff => "takeoff",
            ActuatorCall::Land => "land",
            ActuatorCall::EnableControl => "enable_control",
            ActuatorCall::DisableControl => "disable_control",
            ActuatorCall::Move => "move",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActuatorError {
    #[error("{call} failed: {reason}")]
    CallFailed { call: ActuatorCall, reason: String },
    #[error("{call} timed out after {after:?}")]
    TimedOut { call: ActuatorCall, after: Duration },
}

impl ActuatorError {
    pub fn failed(call: ActuatorCall, reason: impl Into<String>) -> Self {
        Self::CallFailed { call, reason: reason.into() }
    }
}

/// The vehicle-side interface. Calls have side effects and are not safe to
/// repeat blindly; the controller decides when each one is issued.
#[async_trait]
pub trait FlightActuator: Send {
    async fn takeoff(&mut self) -> Result<(), ActuatorError>;
    async fn land(&mut self) -> Result<(), ActuatorError>;
    async fn enable_control(&mut self) -> Result<(), ActuatorError>;
    async fn disable_control(&mut self) -> Result<(), ActuatorError>;
    /// Stick command: yaw, ascent, roll, pitch in normalized units.
    async fn move_sticks(&mut self, cmd: AvoidanceCommand) -> Result<(), ActuatorError>;
}

#[async_trait]
impl<A: FlightActuator + ?Sized> FlightActuator for Box<A> {
    async fn takeoff(&mut self) -> Result<(), ActuatorError> {
        (**self).takeoff().await
    }
    async fn land(&mut self) -> Result<(), ActuatorError> {
        (**self).land().await
    }
    async fn enable_control(&mut self) -> Result<(), ActuatorError> {
        (**self).enable_control().await
    }
    async fn disable_control(&mut self) -> Result<(), ActuatorError> {
        (**self).disable_control().await
    }
    async fn move_sticks(&mut self, cmd: AvoidanceCommand) -> Result<(), ActuatorError> {
        (**self).move_sticks(cmd).await
    }
}

/// Bench backend: accepts every call and logs it.
#[derive(Debug, Default)]
pub struct DryRunActuator;

impl DryRunActuator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FlightActuator for DryRunActuator {
    async fn takeoff(&mut self) -> Result<(), ActuatorError> {
        info!("dry-run: takeoff");
        Ok(())
    }

    async fn land(&mut self) -> Result<(), ActuatorError> {
        info!("dry-run: land");
        Ok(())
    }

    async fn enable_control(&mut self) -> Result<(), ActuatorError> {
        info!("dry-run: enable control");
        Ok(())
    }

    async fn disable_control(&mut self) -> Result<(), ActuatorError> {
        info!("dry-run: disable control");
        Ok(())
    }

    async fn move_sticks(&mut self, cmd: AvoidanceCommand) -> Result<(), ActuatorError> {
        if !cmd.is_neutral() {
            info!("dry-run: move {}", cmd);
        }
        Ok(())
    }
}
