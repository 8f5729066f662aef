//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Per-device task: scheduled ticks, command handling and fan-out."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use fabsim_common::{JitterHistogram, SimClock};
use fabsim_logging::{fab_debug, fab_info, fab_warn, DeviceLogContext};
use fabsim_metrics::SimulatorMetrics;
use fabsim_msg::{OutboundBatch, OutboundRecord, PublisherHandle, TopicScheme};
use fabsim_rt::{TickPlan, TickSchedule};
use fabsim_sim::{
    AnomalyKind, AnomalyState, DeviceSimulator, DeviceSnapshot, MachineSpec, SimError,
    TickOutcome,
};

use crate::manager::DeviceUpdate;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Work handed to a device task. Every variant except `Shutdown` answers on
/// its reply channel once the device has applied it.
#[derive(Debug)]
pub(crate) enum DeviceCommand {
    Start {
        reply: Reply<DeviceSnapshot>,
    },
    Stop {
        reply: Reply<Result<DeviceSnapshot, SimError>>,
    },
    Inject {
        kind: AnomalyKind,
        magnitude: f64,
        duration: Duration,
        reply: Reply<Result<AnomalyState, SimError>>,
    },
    ClearAnomaly {
        reply: Reply<Option<AnomalyState>>,
    },
    /// Merged against the spec the device runs when the command is handled.
    Configure {
        update: DeviceUpdate,
        reply: Reply<Result<DeviceSnapshot, SimError>>,
    },
    Shutdown,
    #[cfg(test)]
    Crash,
}

/// Shared plumbing every device task receives.
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub clock: SimClock,
    pub topics: TopicScheme,
    pub outbound: PublisherHandle,
    pub metrics: Option<SimulatorMetrics>,
    pub lateness: Arc<JitterHistogram>,
}

pub(crate) struct DeviceTask {
    sim: DeviceSimulator,
    archetype: String,
    schedule: TickSchedule,
    commands: mpsc::Receiver<DeviceCommand>,
    snapshots: watch::Sender<DeviceSnapshot>,
    specs: watch::Sender<MachineSpec>,
    ctx: TaskContext,
}

impl DeviceTask {
    pub(crate) fn new(
        sim: DeviceSimulator,
        commands: mpsc::Receiver<DeviceCommand>,
        snapshots: watch::Sender<DeviceSnapshot>,
        specs: watch::Sender<MachineSpec>,
        ctx: TaskContext,
    ) -> Self {
        let interval = ctx.clock.real_interval(sim.interval());
        Self {
            archetype: sim.archetype().to_string(),
            schedule: TickSchedule::starting_now(interval),
            sim,
            commands,
            snapshots,
            specs,
            ctx,
        }
    }

    pub(crate) async fn run(mut self) {
        fab_debug!(context = self.log_context(), "device task started");
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(DeviceCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                () = self.schedule.wait() => {
                    self.on_deadline();
                }
            }
        }
        if let Some(metrics) = &self.ctx.metrics {
            metrics.set_device_state(self.sim.id(), &self.archetype, false, 0.0);
        }
        fab_debug!(context = self.log_context(), "device task exiting");
    }

    fn log_context(&self) -> DeviceLogContext<'_> {
        DeviceLogContext::for_machine(self.sim.id(), &self.archetype)
            .with_tick(self.sim.state().ticks)
    }

    fn handle(&mut self, command: DeviceCommand) {
        match command {
            DeviceCommand::Start { reply } => {
                self.sim.start();
                let _ = reply.send(self.publish_snapshot());
            }
            DeviceCommand::Stop { reply } => {
                let result = self.sim.stop().map(|()| self.publish_snapshot());
                let _ = reply.send(result);
            }
            DeviceCommand::Inject {
                kind,
                magnitude,
                duration,
                reply,
            } => {
                let now = self.ctx.clock.now();
                let previous = self.sim.state().anomaly.as_ref().map(|active| active.kind);
                let result = self.sim.inject(kind, magnitude, duration, now);
                if let Ok(anomaly) = &result {
                    fab_info!(
                        context = self.log_context(),
                        "anomaly {} injected (magnitude {}, {}s)",
                        anomaly.kind,
                        anomaly.magnitude,
                        anomaly.duration.as_secs_f64()
                    );
                    if let Some(previous) = previous.filter(|kind| *kind != anomaly.kind) {
                        self.set_anomaly_gauge(previous, false);
                    }
                    self.set_anomaly_gauge(anomaly.kind, true);
                    self.publish_snapshot();
                }
                let _ = reply.send(result);
            }
            DeviceCommand::ClearAnomaly { reply } => {
                let cleared = self.sim.clear_anomaly();
                if let Some(anomaly) = &cleared {
                    self.set_anomaly_gauge(anomaly.kind, false);
                    fab_info!(context = self.log_context(), "anomaly {} cleared", anomaly.kind);
                }
                self.publish_snapshot();
                let _ = reply.send(cleared);
            }
            DeviceCommand::Configure { update, reply } => {
                let spec = update.apply(self.sim.spec().clone());
                let result = self.sim.reconfigure(spec).map(|()| {
                    self.specs.send_replace(self.sim.spec().clone());
                    let interval = self.ctx.clock.real_interval(self.sim.interval());
                    if interval != self.schedule.interval() {
                        self.schedule.set_interval(interval, Instant::now());
                    }
                    fab_info!(context = self.log_context(), "device reconfigured");
                    self.publish_snapshot()
                });
                let _ = reply.send(result);
            }
            DeviceCommand::Shutdown => {}
            #[cfg(test)]
            DeviceCommand::Crash => panic!("device task crashed on request"),
        }
    }

    fn on_deadline(&mut self) {
        let fired = Instant::now();
        let plan = self.schedule.on_fire(fired);
        match self.sim.tick(self.ctx.clock.at(fired)) {
            Ok(outcome) => self.emit(outcome, &plan),
            Err(err) => {
                fab_warn!(context = self.log_context(), "tick failed: {err}");
            }
        }

        self.ctx.lateness.record(plan.lateness);
        if plan.skipped > 0 {
            fab_warn!(
                context = self.log_context(),
                "device fell behind; {} tick(s) coalesced",
                plan.skipped
            );
        }
        if let Some(excess) = self.schedule.overrun(fired, Instant::now()) {
            fab_warn!(
                context = self.log_context(),
                "tick overran interval by {}ms",
                excess.as_millis()
            );
            if let Some(metrics) = &self.ctx.metrics {
                metrics.record_overrun(self.sim.id());
            }
        }
    }

    fn emit(&mut self, outcome: TickOutcome, plan: &TickPlan) {
        if let Some(expired) = &outcome.expired {
            self.set_anomaly_gauge(expired.kind, false);
            fab_info!(context = self.log_context(), "anomaly {} expired", expired.kind);
        }
        if let Some(triggered) = &outcome.triggered {
            self.set_anomaly_gauge(triggered.kind, true);
            fab_info!(
                context = self.log_context(),
                "daily anomaly {} triggered for {}s",
                triggered.kind,
                triggered.duration.as_secs_f64()
            );
        }

        let machine_id = outcome.batch.machine_id().to_owned();
        match outcome.batch.to_json_records() {
            Ok(records) => {
                let records = records
                    .into_iter()
                    .map(|(kind, payload)| {
                        OutboundRecord::new(
                            self.ctx.topics.topic(&machine_id, kind.as_str()),
                            kind.as_str(),
                            payload,
                        )
                    })
                    .collect();
                // Drops are counted by the publisher's observer.
                self.ctx
                    .outbound
                    .try_enqueue(OutboundBatch::new(machine_id.as_str(), records));
            }
            Err(err) => {
                fab_warn!(context = self.log_context(), "failed to serialize readings: {err}");
            }
        }

        let snapshot = self.publish_snapshot();
        if let Some(metrics) = &self.ctx.metrics {
            metrics.record_tick(&machine_id, plan.lateness.as_secs_f64(), plan.skipped);
            metrics.set_device_state(
                &machine_id,
                &self.archetype,
                snapshot.running,
                snapshot.power_kw,
            );
        }
    }

    fn set_anomaly_gauge(&self, kind: AnomalyKind, active: bool) {
        if let Some(metrics) = &self.ctx.metrics {
            metrics.set_anomaly(self.sim.id(), &kind.to_string(), active);
        }
    }

    fn publish_snapshot(&self) -> DeviceSnapshot {
        let snapshot = self.sim.snapshot();
        self.snapshots.send_replace(snapshot.clone());
        snapshot
    }
}
