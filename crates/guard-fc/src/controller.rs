use std::time::{Duration, Instant};

use guard_link::CellSnapshot;
use guard_proto::audit::{AuditEvent, AuditKind};
use guard_proto::telemetry::TelemetryRecord;
use tracing::{debug, info, warn};

use crate::actuator::{ActuatorCall, ActuatorError, FlightActuator};
use crate::avoid::{AvoidanceCommand, AvoidancePolicy};
use crate::operator::OperatorAction;
use crate::safety::ActionDebounce;
use crate::state::{ControlAuthority, FlightPhase};

enum Request {
    Takeoff,
    Land,
    Enable,
    Disable,
    Move(AvoidanceCommand),
}

impl Request {
    fn call(&self) -> ActuatorCall {
        match self {
            Request::Takeoff => ActuatorCall::Takeoff,
            Request::Land => ActuatorCall::Land,
            Request::Enable => ActuatorCall::EnableControl,
            Request::Disable => ActuatorCall::DisableControl,
            Request::Move(_) => ActuatorCall::Move,
        }
    }
}

/// Owns flight phase, stick authority and the last valid telemetry record,
/// and turns operator triggers plus telemetry into at most one move per tick.
///
/// Tracked state only ever reflects calls the actuator reported as successful.
pub struct AvoidanceController<A> {
    actuator: A,
    policy: AvoidancePolicy,
    call_timeout: Duration,
    debounce: ActionDebounce,

    phase: FlightPhase,
    authority: ControlAuthority,
    latest: Option<TelemetryRecord>,
    link_closed: bool,
    audit: Vec<AuditEvent>,
}

impl<A: FlightActuator> AvoidanceController<A> {
    pub fn new(actuator: A, policy: AvoidancePolicy, call_timeout: Duration, debounce: Duration) -> Self {
        Self {
            actuator,
            policy,
            call_timeout,
            debounce: ActionDebounce::new(debounce),
            phase: FlightPhase::Grounded,
            authority: ControlAuthority::Disabled,
            latest: None,
            link_closed: false,
            audit: Vec::new(),
        }
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn authority(&self) -> ControlAuthority {
        self.authority
    }

    /// Last record that passed the plausibility check.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.latest.as_ref()
    }

    pub fn take_audit(&mut self) -> Vec<AuditEvent> {
        std::mem::take(&mut self.audit)
    }

    /// One control step. Operator actions are applied before the avoidance
    /// command is computed. Returns the move command issued this tick, if any.
    pub async fn tick(
        &mut self,
        now: Instant,
        requests: &[OperatorAction],
        telemetry: CellSnapshot,
    ) -> Option<AvoidanceCommand> {
        for &action in requests {
            self.handle_action(action, now).await;
        }

        self.ingest(telemetry, now);

        let cmd = self.command_for(now)?;
        if let Err(e) = self.invoke(Request::Move(cmd)).await {
            self.note(AuditKind::CallFailed, format!("{}", e));
        }
        Some(cmd)
    }

    /// Termination path: one best-effort land call if airborne, no retry.
    /// Returns true when the vehicle is believed to be on the ground afterwards.
    pub async fn shutdown(&mut self) -> bool {
        self.note(AuditKind::Shutdown, "shutdown requested".into());
        // a land call that never returned (unwound tick) did not ground the vehicle
        if let FlightPhase::Landing { takeoff_at } = self.phase {
            self.phase = FlightPhase::Airborne { takeoff_at };
        }
        if self.phase.is_airborne() {
            warn!("controller: emergency stop while airborne, landing");
            self.land().await
        } else {
            matches!(self.phase, FlightPhase::Grounded)
        }
    }

    async fn handle_action(&mut self, action: OperatorAction, now: Instant) {
        let pending = match action {
            OperatorAction::Enable => self.authority != ControlAuthority::Enabled,
            OperatorAction::Disable => self.authority != ControlAuthority::Disabled,
            OperatorAction::Takeoff => self.phase == FlightPhase::Grounded,
            OperatorAction::Land => self.phase.is_airborne(),
            // owned by the loop driver
            OperatorAction::Shutdown => false,
        };
        if !pending {
            debug!("controller: {} ignored (phase={} authority={})", action, self.phase, self.authority);
            return;
        }
        if !self.debounce.allow(action, now) {
            debug!("controller: {} debounced", action);
            return;
        }

        match action {
            OperatorAction::Enable => {
                info!("controller: enabling control");
                match self.invoke(Request::Enable).await {
                    Ok(()) => self.set_authority(ControlAuthority::Enabled),
                    Err(e) => self.note(AuditKind::CallFailed, format!("{}", e)),
                }
            }
            OperatorAction::Disable => {
                info!("controller: disabling control");
                match self.invoke(Request::Disable).await {
                    Ok(()) => self.set_authority(ControlAuthority::Disabled),
                    Err(e) => self.note(AuditKind::CallFailed, format!("{}", e)),
                }
            }
            OperatorAction::Takeoff => {
                info!("controller: takeoff");
                match self.invoke(Request::Takeoff).await {
                    Ok(()) => self.set_phase(FlightPhase::Airborne { takeoff_at: now }),
                    Err(e) => self.note(AuditKind::CallFailed, format!("{}", e)),
                }
            }
            OperatorAction::Land => {
                self.land().await;
            }
            OperatorAction::Shutdown => {}
        }
    }

    async fn land(&mut self) -> bool {
        let FlightPhase::Airborne { takeoff_at } = self.phase else {
            return false;
        };
        info!("controller: landing");
        self.set_phase(FlightPhase::Landing { takeoff_at });
        match self.invoke(Request::Land).await {
            Ok(()) => {
                self.set_phase(FlightPhase::Grounded);
                true
            }
            Err(e) => {
                self.phase = FlightPhase::Airborne { takeoff_at };
                self.note(AuditKind::CallFailed, format!("{}; still airborne", e));
                false
            }
        }
    }

    fn ingest(&mut self, telemetry: CellSnapshot, now: Instant) {
        if let Some(rec) = telemetry.fresh {
            if self.policy.plausible(&rec) {
                self.latest = Some(rec);
            } else {
                self.note(
                    AuditKind::RecordRejected,
                    format!(
                        "implausible reading bottom={:.2}cm front={:.2}cm outside ({}, {}]; keeping last valid",
                        rec.bottom_distance_cm, rec.front_distance_cm, self.policy.min_range_cm, self.policy.max_range_cm
                    ),
                );
            }
        }
        if telemetry.closed && !self.link_closed {
            self.link_closed = true;
            self.note(AuditKind::LinkClosed, "telemetry link closed; avoidance falls back to neutral".into());
        }
        if let Some(rec) = &self.latest {
            if self.phase.is_airborne() && rec.age_at(now) > self.policy.stale_after {
                debug!("controller: telemetry stale ({:?} old)", rec.age_at(now));
            }
        }
    }

    fn usable_record(&self, now: Instant) -> Option<&TelemetryRecord> {
        if self.link_closed {
            return None;
        }
        self.latest.as_ref().filter(|r| r.age_at(now) <= self.policy.stale_after)
    }

    /// `None` means no move call this tick. Airborne always yields a command:
    /// neutral while stabilizing or without usable telemetry.
    fn command_for(&self, now: Instant) -> Option<AvoidanceCommand> {
        let airborne_for = self.phase.airborne_for(now)?;
        if airborne_for < self.policy.stabilization {
            return Some(AvoidanceCommand::NEUTRAL);
        }
        let Some(rec) = self.usable_record(now) else {
            return Some(AvoidanceCommand::NEUTRAL);
        };
        let cmd = self.policy.correction(rec);
        if cmd.ascent > 0.0 {
            debug!("controller: obstacle below ({:.1}cm), moving up", rec.bottom_distance_cm);
        }
        if cmd.pitch < 0.0 {
            debug!("controller: obstacle ahead ({:.1}cm), moving back", rec.front_distance_cm);
        }
        Some(cmd)
    }

    async fn invoke(&mut self, req: Request) -> Result<(), ActuatorError> {
        let call = req.call();
        let fut = match req {
            Request::Takeoff => self.actuator.takeoff(),
            Request::Land => self.actuator.land(),
            Request::Enable => self.actuator.enable_control(),
            Request::Disable => self.actuator.disable_control(),
            Request::Move(cmd) => self.actuator.move_sticks(cmd),
        };
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(ActuatorError::TimedOut { call, after: self.call_timeout }),
        }
    }

    fn set_phase(&mut self, next: FlightPhase) {
        if next != self.phase {
            let from = self.phase;
            self.phase = next;
            self.note(AuditKind::Transition, format!("phase {} -> {}", from, next));
        }
    }

    fn set_authority(&mut self, next: ControlAuthority) {
        if next != self.authority {
            let from = self.authority;
            self.authority = next;
            self.note(AuditKind::Transition, format!("authority {} -> {}", from, next));
        }
    }

    fn note(&mut self, kind: AuditKind, msg: String) {
        let distances = self.latest.map(|r| (r.bottom_distance_cm, r.front_distance_cm));
        match kind {
            AuditKind::Transition | AuditKind::Shutdown => info!(
                "controller: {} (phase={} authority={} distances={:?})",
                msg, self.phase, self.authority, distances
            ),
            _ => warn!(
                "controller: {} (phase={} authority={} distances={:?})",
                msg, self.phase, self.authority, distances
            ),
        }
        self.audit.push(
            AuditEvent::now(kind, self.phase.label().to_string(), self.authority.to_string(), msg)
                .with_distances(distances),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::testing::RecordingActuator;

    const TIMEOUT: Duration = Duration::from_secs(2);
    const DEBOUNCE: Duration = Duration::from_secs(1);

    fn controller() -> (AvoidanceController<RecordingActuator>, RecordingActuator) {
        let act = RecordingActuator::new();
        let ctrl = AvoidanceController::new(act.clone(), AvoidancePolicy::default(), TIMEOUT, DEBOUNCE);
        (ctrl, act)
    }

    fn reading(bottom: f64, front: f64, at: Instant) -> CellSnapshot {
        CellSnapshot {
            fresh: Some(TelemetryRecord { bottom_distance_cm: bottom, front_distance_cm: front, received_at: at }),
            closed: false,
        }
    }

    fn quiet() -> CellSnapshot {
        CellSnapshot { fresh: None, closed: false }
    }

    async fn airborne(ctrl: &mut AvoidanceController<RecordingActuator>, t0: Instant) {
        ctrl.tick(t0, &[OperatorAction::Takeoff], quiet()).await;
        assert!(ctrl.phase().is_airborne());
    }

    #[tokio::test]
    async fn grounded_never_moves() {
        let (mut ctrl, act) = controller();
        let t0 = Instant::now();
        for i in 0..5 {
            let t = t0 + Duration::from_secs(i);
            assert_eq!(ctrl.tick(t, &[], reading(5.0, 5.0, t)).await, None);
        }
        assert_eq!(act.count(ActuatorCall::Move), 0);
        assert_eq!(ctrl.phase(), FlightPhase::Grounded);
    }

    #[tokio::test]
    async fn stabilization_window_sends_neutral() {
        let (mut ctrl, act) = controller();
        let t0 = Instant::now();
        airborne(&mut ctrl, t0).await;

        let t = t0 + Duration::from_millis(4900);
        let cmd = ctrl.tick(t, &[], reading(5.0, 5.0, t)).await;
        assert_eq!(cmd, Some(AvoidanceCommand::NEUTRAL));
        assert_eq!(act.last_move(), Some(AvoidanceCommand::NEUTRAL));
        // takeoff tick itself also sends a neutral move
        assert_eq!(act.count(ActuatorCall::Move), 2);
    }

    #[tokio::test]
    async fn obstacle_below_after_stabilization() {
        let (mut ctrl, act) = controller();
        let t0 = Instant::now();
        airborne(&mut ctrl, t0).await;

        let t = t0 + Duration::from_secs(6);
        let cmd = ctrl.tick(t, &[], reading(20.0, 50.0, t)).await.unwrap();
        assert_eq!(cmd.ascent, 0.02);
        assert_eq!(cmd.pitch, 0.0);
        assert_eq!(act.last_move(), Some(cmd));
    }

    #[tokio::test]
    async fn both_obstacles_correct_both_axes() {
        let (mut ctrl, _act) = controller();
        let t0 = Instant::now();
        airborne(&mut ctrl, t0).await;

        let t = t0 + Duration::from_secs(6);
        let cmd = ctrl.tick(t, &[], reading(10.0, 10.0, t)).await.unwrap();
        assert_eq!(cmd.ascent, 0.02);
        assert_eq!(cmd.pitch, -0.02);
        assert_eq!(cmd.yaw, 0.0);
        assert_eq!(cmd.roll, 0.0);
    }

    #[tokio::test]
    async fn implausible_record_keeps_last_valid() {
        let (mut ctrl, _act) = controller();
        let t0 = Instant::now();
        airborne(&mut ctrl, t0).await;

        let t1 = t0 + Duration::from_secs(6);
        ctrl.tick(t1, &[], reading(45.0, 45.0, t1)).await;

        let t2 = t1 + Duration::from_millis(100);
        for (b, f) in [(-1.0, 10.0), (10.0, 0.0), (10.0, 75.0)] {
            let cmd = ctrl.tick(t2, &[], reading(b, f, t2)).await.unwrap();
            assert!(cmd.is_neutral(), "rejected ({b}, {f}) triggered avoidance");
            assert_eq!(ctrl.latest().unwrap().bottom_distance_cm, 45.0);
        }
        let rejected = ctrl.take_audit().into_iter().filter(|e| e.kind == AuditKind::RecordRejected).count();
        assert_eq!(rejected, 3);
    }

    #[tokio::test]
    async fn land_only_after_success() {
        let (mut ctrl, act) = controller();
        let t0 = Instant::now();
        airborne(&mut ctrl, t0).await;

        act.fail(ActuatorCall::Land, true);
        let t1 = t0 + Duration::from_secs(2);
        ctrl.tick(t1, &[OperatorAction::Land], quiet()).await;
        assert!(ctrl.phase().is_airborne());

        act.fail(ActuatorCall::Land, false);
        let t2 = t1 + Duration::from_secs(2);
        let cmd = ctrl.tick(t2, &[OperatorAction::Land], quiet()).await;
        assert_eq!(ctrl.phase(), FlightPhase::Grounded);
        // land is handled before the move step, so no move in the same tick
        assert_eq!(cmd, None);
        assert_eq!(act.count(ActuatorCall::Land), 2);
    }

    #[tokio::test]
    async fn failed_takeoff_stays_grounded() {
        let (mut ctrl, act) = controller();
        act.fail(ActuatorCall::Takeoff, true);
        let t0 = Instant::now();
        assert_eq!(ctrl.tick(t0, &[OperatorAction::Takeoff], quiet()).await, None);
        assert_eq!(ctrl.phase(), FlightPhase::Grounded);
        assert_eq!(act.count(ActuatorCall::Move), 0);
    }

    #[tokio::test]
    async fn held_trigger_is_debounced() {
        let (mut ctrl, act) = controller();
        act.fail(ActuatorCall::Takeoff, true);
        let t0 = Instant::now();
        for i in 0..5 {
            ctrl.tick(t0 + Duration::from_millis(100 * i), &[OperatorAction::Takeoff], quiet()).await;
        }
        assert_eq!(act.count(ActuatorCall::Takeoff), 1);

        ctrl.tick(t0 + Duration::from_millis(1100), &[OperatorAction::Takeoff], quiet()).await;
        assert_eq!(act.count(ActuatorCall::Takeoff), 2);
    }

    #[tokio::test]
    async fn redundant_triggers_issue_no_calls() {
        let (mut ctrl, act) = controller();
        let t0 = Instant::now();
        ctrl.tick(t0, &[OperatorAction::Disable, OperatorAction::Land], quiet()).await;
        assert!(act.calls().is_empty());

        airborne(&mut ctrl, t0 + Duration::from_secs(2)).await;
        ctrl.tick(t0 + Duration::from_secs(4), &[OperatorAction::Takeoff], quiet()).await;
        assert_eq!(act.count(ActuatorCall::Takeoff), 1);
    }

    #[tokio::test]
    async fn authority_is_independent_of_phase() {
        let (mut ctrl, act) = controller();
        let t0 = Instant::now();
        ctrl.tick(t0, &[OperatorAction::Enable], quiet()).await;
        assert_eq!(ctrl.authority(), ControlAuthority::Enabled);
        assert_eq!(ctrl.phase(), FlightPhase::Grounded);

        act.fail(ActuatorCall::DisableControl, true);
        airborne(&mut ctrl, t0 + Duration::from_secs(2)).await;
        ctrl.tick(t0 + Duration::from_secs(3), &[OperatorAction::Disable], quiet()).await;
        assert_eq!(ctrl.authority(), ControlAuthority::Enabled);
        assert!(ctrl.phase().is_airborne());
    }

    #[tokio::test]
    async fn closed_or_stale_link_falls_back_to_neutral() {
        let (mut ctrl, _act) = controller();
        let t0 = Instant::now();
        airborne(&mut ctrl, t0).await;

        let t1 = t0 + Duration::from_secs(6);
        assert!(!ctrl.tick(t1, &[], reading(10.0, 10.0, t1)).await.unwrap().is_neutral());

        let stale = t1 + Duration::from_secs(2);
        assert!(ctrl.tick(stale, &[], quiet()).await.unwrap().is_neutral());

        let t2 = stale + Duration::from_millis(100);
        let closed = CellSnapshot { closed: true, ..reading(10.0, 10.0, t2) };
        assert!(ctrl.tick(t2, &[], closed).await.unwrap().is_neutral());
        // still lands with the link gone
        ctrl.tick(t2, &[OperatorAction::Land], CellSnapshot { fresh: None, closed: true }).await;
        assert_eq!(ctrl.phase(), FlightPhase::Grounded);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out_as_failure() {
        let (mut ctrl, act) = controller();
        act.hang(ActuatorCall::Takeoff);
        ctrl.tick(Instant::now(), &[OperatorAction::Takeoff], quiet()).await;
        assert_eq!(ctrl.phase(), FlightPhase::Grounded);
        let audit = ctrl.take_audit();
        assert!(audit.iter().any(|e| e.kind == AuditKind::CallFailed && e.msg.contains("timed out")));
    }

    #[tokio::test]
    async fn shutdown_lands_once_when_airborne() {
        let (mut ctrl, act) = controller();
        let t0 = Instant::now();
        assert!(ctrl.shutdown().await);
        assert_eq!(act.count(ActuatorCall::Land), 0);

        airborne(&mut ctrl, t0).await;
        act.fail(ActuatorCall::Land, true);
        assert!(!ctrl.shutdown().await);
        assert_eq!(act.count(ActuatorCall::Land), 1);
    }

    #[tokio::test]
    async fn land_interrupted_by_panic_is_retried_on_shutdown() {
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        let (mut ctrl, act) = controller();
        let t0 = Instant::now();
        airborne(&mut ctrl, t0).await;

        act.panic_once(ActuatorCall::Land);
        let t1 = t0 + Duration::from_secs(2);
        let step = AssertUnwindSafe(ctrl.tick(t1, &[OperatorAction::Land], quiet())).catch_unwind();
        assert!(step.await.is_err());
        assert!(matches!(ctrl.phase(), FlightPhase::Landing { .. }));

        assert!(ctrl.shutdown().await);
        assert_eq!(ctrl.phase(), FlightPhase::Grounded);
        assert_eq!(act.count(ActuatorCall::Land), 2);
    }
}
