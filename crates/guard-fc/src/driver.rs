use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use guard_link::LatestRecord;
use guard_proto::audit::AuditEvent;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::actuator::FlightActuator;
use crate::controller::AvoidanceController;
use crate::operator::{OperatorAction, OperatorInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Operator asserted the shutdown action.
    Operator,
    /// External trigger (process signal).
    Signal,
    /// A tick panicked; the loop stopped and escalated to landing.
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub reason: StopReason,
    pub ticks: u64,
    /// Vehicle believed grounded after the termination path ran.
    pub grounded: bool,
}

/// Fixed-interval shell around the controller. All actuation goes through
/// this one loop; telemetry arrives through the shared single-slot cell.
pub struct ControlLoop<A, O> {
    controller: AvoidanceController<A>,
    operator: O,
    telemetry: LatestRecord,
    tick: Duration,
    audit_tx: Option<mpsc::Sender<AuditEvent>>,
}

impl<A, O> ControlLoop<A, O>
where
    A: FlightActuator,
    O: OperatorInput,
{
    pub fn new(controller: AvoidanceController<A>, operator: O, telemetry: LatestRecord, tick: Duration) -> Self {
        Self { controller, operator, telemetry, tick, audit_tx: None }
    }

    pub fn with_audit(mut self, tx: mpsc::Sender<AuditEvent>) -> Self {
        self.audit_tx = Some(tx);
        self
    }

    /// Runs until the operator asks for shutdown, `shutdown` resolves, or a
    /// tick faults. Whatever the reason, an airborne vehicle gets exactly one
    /// land call on the way out.
    pub async fn run<F>(mut self, shutdown: F) -> LoopReport
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("loop: running every {:?}", self.tick);
        let mut ticks = 0u64;
        let reason = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break StopReason::Signal,
                _ = interval.tick() => {}
            }

            let requests = self.operator.poll();
            if requests.contains(&OperatorAction::Shutdown) {
                break StopReason::Operator;
            }

            let now = Instant::now().into_std();
            let snapshot = self.telemetry.take();
            let step = AssertUnwindSafe(self.controller.tick(now, &requests, snapshot)).catch_unwind();
            if step.await.is_err() {
                error!("loop: tick panicked (phase={})", self.controller.phase());
                break StopReason::Fault;
            }
            ticks += 1;
            self.forward_audit();
        };

        info!("loop: stopping ({:?}) after {} ticks, phase={}", reason, ticks, self.controller.phase());
        let grounded = self.controller.shutdown().await;
        self.forward_audit();

        LoopReport { reason, ticks, grounded }
    }

    fn forward_audit(&mut self) {
        let events = self.controller.take_audit();
        let Some(tx) = &self.audit_tx else { return };
        for ev in events {
            // never stall the cadence on a slow audit writer
            if let Err(e) = tx.try_send(ev) {
                warn!("loop: audit event dropped: {}", e);
            }
        }
    }
}
