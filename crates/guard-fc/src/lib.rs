pub mod actuator;
pub mod avoid;
pub mod controller;
pub mod driver;
pub mod mav;
pub mod operator;
pub mod safety;
pub mod state;

use serde::Deserialize;

pub use actuator::{ActuatorCall, ActuatorError, DryRunActuator, FlightActuator};
pub use avoid::{AvoidanceCommand, AvoidancePolicy};
pub use controller::AvoidanceController;
pub use driver::{ControlLoop, LoopReport, StopReason};
pub use operator::{OperatorAction, OperatorInput};
pub use state::{ControlAuthority, FlightPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FcBackend {
    Mavlink,
    DryRun,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    pub backend: FcBackend,

    /// MAVLink connection string, e.g. "udpout:192.168.1.35:14550" or
    /// "serial:/dev/ttyUSB0:57600". Required for the mavlink backend.
    pub url: Option<String>,

    /// MAVLink ids we use (companion side)
    #[serde(default = "default_sys_id")]
    pub sys_id: u8,
    #[serde(default = "default_comp_id")]
    pub comp_id: u8,

    /// target system/component (FC side). 1/1 is common for ArduPilot.
    #[serde(default = "default_target")]
    pub target_sys: u8,
    #[serde(default = "default_target")]
    pub target_comp: u8,

    /// Altitude handed to NAV_TAKEOFF.
    #[serde(default = "default_takeoff_alt")]
    pub takeoff_alt_m: f32,

    /// Upper bound on any single actuator call. Default 2000.
    pub call_timeout_ms: Option<u64>,

    /// Heartbeat wait for `fc probe`. Default 1500.
    pub heartbeat_timeout_ms: Option<u64>,

    /// Companion heartbeat rate. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,
}

fn default_sys_id() -> u8 { 255 }
fn default_comp_id() -> u8 { 190 }
fn default_target() -> u8 { 1 }
fn default_takeoff_alt() -> f32 { 1.5 }

impl FcConfig {
    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.call_timeout_ms.unwrap_or(2000))
    }

    pub fn heartbeat_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_timeout_ms.unwrap_or(1500))
    }
}
