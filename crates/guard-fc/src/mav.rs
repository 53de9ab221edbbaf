use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavState, MavType, COMMAND_LONG_DATA,
        HEARTBEAT_DATA, MANUAL_CONTROL_DATA,
    },
    MavConnection, MavHeader,
};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::actuator::{ActuatorCall, ActuatorError, FlightActuator};
use crate::avoid::AvoidanceCommand;
use crate::FcConfig;

struct Wire {
    conn: Box<dyn MavConnection<MavMessage> + Send>,
    hdr: MavHeader,
}

impl Wire {
    fn send(&mut self, msg: &MavMessage) -> Result<()> {
        self.hdr.sequence = self.hdr.sequence.wrapping_add(1);
        self.conn.send(&self.hdr, msg).context("mavlink send")?;
        Ok(())
    }
}

/// Flight actuator over MAVLink. A call succeeds once its message is on the
/// wire; blocking I/O is moved off the runtime with `spawn_blocking`.
pub struct MavActuator {
    wire: Arc<Mutex<Wire>>,
    target_sys: u8,
    target_comp: u8,
    takeoff_alt_m: f32,
}

fn connect(cfg: &FcConfig) -> Result<(String, Box<dyn MavConnection<MavMessage> + Send>)> {
    let url = cfg.url.clone().context("fc.url missing (backend=mavlink)")?;

    // quick validate device
    if let Some(rest) = url.strip_prefix("serial:") {
        let (dev, baud) = rest.rsplit_once(':').context("serial url must be serial:<dev>:<baud>")?;
        let baud: u32 = baud.parse().with_context(|| format!("bad baud in {}", url))?;
        let _ = tokio_serial::new(dev, baud)
            .open_native_async()
            .with_context(|| format!("open fc serial device {}", dev))?;
    }

    let conn: Box<dyn MavConnection<MavMessage> + Send> =
        mavlink::connect::<MavMessage>(&url).with_context(|| format!("mavlink connect {}", url))?;
    Ok((url, conn))
}

impl MavActuator {
    pub fn open(cfg: &FcConfig) -> Result<Self> {
        let (url, conn) = connect(cfg)?;
        info!("fc: mavlink link open on {}", url);
        Ok(Self {
            wire: Arc::new(Mutex::new(Wire {
                conn,
                hdr: MavHeader { system_id: cfg.sys_id, component_id: cfg.comp_id, sequence: 0 },
            })),
            target_sys: cfg.target_sys,
            target_comp: cfg.target_comp,
            takeoff_alt_m: cfg.takeoff_alt_m,
        })
    }

    /// Companion heartbeat so the FC keeps treating us as a live GCS.
    pub fn spawn_heartbeat(&self, hz: f32) -> JoinHandle<()> {
        let wire = self.wire.clone();
        let interval = heartbeat_period(hz);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let wire = wire.clone();
                let sent = tokio::task::spawn_blocking(move || {
                    wire.lock().unwrap_or_else(PoisonError::into_inner).send(&heartbeat())
                })
                .await;
                match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("fc: heartbeat send failed: {:#}", e),
                    Err(e) => warn!("fc: heartbeat task failed: {}", e),
                }
            }
        })
    }

    fn command(&self, command: MavCmd, param1: f32, param7: f32) -> MavMessage {
        MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            command,
            confirmation: 0,
            param1,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7,
        })
    }

    async fn dispatch(&self, call: ActuatorCall, msg: MavMessage) -> Result<(), ActuatorError> {
        let wire = self.wire.clone();
        let res = tokio::task::spawn_blocking(move || {
            wire.lock().unwrap_or_else(PoisonError::into_inner).send(&msg)
        })
        .await;
        match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ActuatorError::failed(call, format!("{:#}", e))),
            Err(e) => Err(ActuatorError::failed(call, e.to_string())),
        }
    }
}

#[async_trait]
impl FlightActuator for MavActuator {
    async fn takeoff(&mut self) -> Result<(), ActuatorError> {
        info!("FC: sending NAV_TAKEOFF to {}m", self.takeoff_alt_m);
        let msg = self.command(MavCmd::MAV_CMD_NAV_TAKEOFF, 0.0, self.takeoff_alt_m);
        self.dispatch(ActuatorCall::Takeoff, msg).await
    }

    async fn land(&mut self) -> Result<(), ActuatorError> {
        info!("FC: sending NAV_LAND");
        let msg = self.command(MavCmd::MAV_CMD_NAV_LAND, 0.0, 0.0);
        self.dispatch(ActuatorCall::Land, msg).await
    }

    async fn enable_control(&mut self) -> Result<(), ActuatorError> {
        info!("FC: sending NAV_GUIDED_ENABLE on");
        let msg = self.command(MavCmd::MAV_CMD_NAV_GUIDED_ENABLE, 1.0, 0.0);
        self.dispatch(ActuatorCall::EnableControl, msg).await
    }

    async fn disable_control(&mut self) -> Result<(), ActuatorError> {
        info!("FC: sending NAV_GUIDED_ENABLE off");
        let msg = self.command(MavCmd::MAV_CMD_NAV_GUIDED_ENABLE, 0.0, 0.0);
        self.dispatch(ActuatorCall::DisableControl, msg).await
    }

    async fn move_sticks(&mut self, cmd: AvoidanceCommand) -> Result<(), ActuatorError> {
        let msg = MavMessage::MANUAL_CONTROL(manual_control(self.target_sys, cmd));
        self.dispatch(ActuatorCall::Move, msg).await
    }
}

/// Normalized stick to MANUAL_CONTROL's -1000..1000 axis.
fn stick(v: f64) -> i16 {
    (v.clamp(-1.0, 1.0) * 1000.0).round() as i16
}

/// Ascent maps onto the 0..1000 throttle axis with 500 as hold-altitude.
fn throttle(v: f64) -> i16 {
    (500.0 + v.clamp(-1.0, 1.0) * 500.0).round() as i16
}

fn manual_control(target: u8, cmd: AvoidanceCommand) -> MANUAL_CONTROL_DATA {
    MANUAL_CONTROL_DATA {
        target,
        x: stick(cmd.pitch),
        y: stick(cmd.roll),
        z: throttle(cmd.ascent),
        r: stick(cmd.yaw),
        buttons: 0,
        ..Default::default()
    }
}

/// Heartbeat rate is held to 0.2..=50 Hz; anything non-finite falls back to 1 Hz.
fn heartbeat_period(hz: f32) -> Duration {
    let hz = if hz.is_finite() { hz.clamp(0.2, 50.0) } else { 1.0 };
    Duration::try_from_secs_f32(1.0 / hz).unwrap_or(Duration::from_secs(1))
}

fn heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub url: String,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

/// Open the configured link and wait for one FC HEARTBEAT.
pub async fn probe(cfg: &FcConfig) -> Result<ProbeResult> {
    let timeout = cfg.heartbeat_timeout();
    let (url, conn) = connect(cfg)?;
    let start = Instant::now();

    // recv blocks; the thread is abandoned if the deadline passes first
    let wait = tokio::task::spawn_blocking(move || loop {
        match conn.recv() {
            Ok((hdr, MavMessage::HEARTBEAT(_))) => return Ok(hdr.system_id),
            Ok((_, msg)) => debug!("fc probe: skipping {:?}", msg),
            Err(e) => return Err(format!("recv failed: {}", e)),
        }
    });

    let (hb_seen, note) = match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(Ok(sys))) => (true, format!("heartbeat from system {}", sys)),
        Ok(Ok(Err(e))) => (false, e),
        Ok(Err(e)) => (false, format!("probe task failed: {}", e)),
        Err(_) => (false, "no heartbeat".into()),
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    if hb_seen {
        info!("fc probe: OK {} ({}ms)", url, elapsed_ms);
    } else {
        warn!("fc probe: {} on {}", note, url);
    }
    Ok(ProbeResult { url, hb_seen, elapsed_ms, note })
}
