//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Fleet registry and command routing to device tasks."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fabsim_common::{AppConfig, JitterHistogram, JitterSummary, SimClock};
use fabsim_logging::{log_lifecycle_event, DeviceLogContext, LifecycleOutcome};
use fabsim_metrics::SimulatorMetrics;
use fabsim_msg::{PublisherHandle, TopicScheme};
use fabsim_sim::{
    AnomalyKind, AnomalyState, Archetype, DeviceSettings, DeviceSimulator, DeviceSnapshot,
    MachineModel, MachineSpec, OperatingMode,
};
use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};

use crate::device_task::{DeviceCommand, DeviceTask, TaskContext};
use crate::error::{FleetError, Result};

const COMMAND_CAPACITY: usize = 32;

/// Settings shared by every device the manager runs.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub settings: DeviceSettings,
    pub topics: TopicScheme,
    pub clock: SimClock,
    pub shutdown_grace: Duration,
}

impl ManagerConfig {
    /// Derive manager settings from a loaded configuration. The simulated
    /// clock starts now, at `simulation.start_time` when one is configured.
    pub fn from_app(config: &AppConfig) -> Self {
        let simulation = &config.simulation;
        let origin = simulation.start_time.unwrap_or_else(chrono::Utc::now);
        Self {
            settings: simulation.device_settings(),
            topics: TopicScheme::new(&config.transport.topic_prefix),
            clock: SimClock::new(origin, simulation.time_scale),
            shutdown_grace: simulation.shutdown_grace,
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            settings: DeviceSettings::default(),
            topics: TopicScheme::default(),
            clock: SimClock::realtime(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Partial device reconfiguration; unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub interval: Option<Duration>,
    pub rated_power_kw: Option<f64>,
    /// Replacement archetype parameters. Must keep the device's archetype.
    pub model: Option<MachineModel>,
}

impl DeviceUpdate {
    pub(crate) fn apply(self, mut spec: MachineSpec) -> MachineSpec {
        if let Some(name) = self.name {
            spec.name = Some(name);
        }
        if let Some(interval) = self.interval {
            spec.interval = interval;
        }
        if let Some(rated) = self.rated_power_kw {
            spec.rated_power_kw = rated;
        }
        if let Some(model) = self.model {
            spec.model = model;
        }
        spec
    }
}

/// Outcome of [`SimulationManager::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Device tasks that exited on their own.
    pub stopped: usize,
    /// Device tasks aborted after the grace period or found dead.
    pub aborted: usize,
}

struct DeviceHandle {
    archetype: Archetype,
    commands: mpsc::Sender<DeviceCommand>,
    snapshots: watch::Receiver<DeviceSnapshot>,
    specs: watch::Receiver<MachineSpec>,
    task: JoinHandle<()>,
    abort: AbortHandle,
}

/// Owns the fleet and routes commands to the device tasks.
///
/// Device state is never touched from here: mutations travel as commands to
/// the owning task and reads come from the snapshot each task publishes.
pub struct SimulationManager {
    devices: RwLock<IndexMap<String, DeviceHandle>>,
    config: ManagerConfig,
    ctx: TaskContext,
    shutting_down: AtomicBool,
}

impl SimulationManager {
    pub fn new(
        config: ManagerConfig,
        outbound: PublisherHandle,
        metrics: Option<SimulatorMetrics>,
    ) -> Self {
        let ctx = TaskContext {
            clock: config.clock,
            topics: config.topics.clone(),
            outbound,
            metrics,
            lateness: Arc::new(JitterHistogram::default()),
        };
        Self {
            devices: RwLock::new(IndexMap::new()),
            config,
            ctx,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn clock(&self) -> &SimClock {
        &self.config.clock
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.config.topics
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }

    /// Validate `spec`, spawn its device task and return the initial
    /// snapshot. The device starts stopped.
    pub fn register(&self, spec: MachineSpec) -> Result<DeviceSnapshot> {
        self.ensure_running()?;
        let id = spec.id.clone();
        if self.devices.read().contains_key(&id) {
            return Err(FleetError::DuplicateId(id));
        }
        let sim = DeviceSimulator::new(spec.clone(), self.config.settings.clone())
            .map_err(|err| FleetError::from_sim(&id, err))?;
        let snapshot = sim.snapshot();

        let mut devices = self.devices.write();
        if devices.contains_key(&id) {
            return Err(FleetError::DuplicateId(id));
        }
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(snapshot.clone());
        let (spec_tx, spec_rx) = watch::channel(spec.clone());
        let device = DeviceTask::new(
            sim,
            command_rx,
            snapshot_tx.clone(),
            spec_tx,
            self.ctx.clone(),
        );
        let inner = tokio::spawn(device.run());
        let abort = inner.abort_handle();
        let task = tokio::spawn(supervise(
            id.clone(),
            spec.archetype().to_string(),
            inner,
            snapshot_tx,
            self.ctx.metrics.clone(),
        ));
        devices.insert(
            id.clone(),
            DeviceHandle {
                archetype: spec.archetype(),
                commands: command_tx,
                snapshots: snapshot_rx,
                specs: spec_rx,
                task,
                abort,
            },
        );
        if let Some(metrics) = &self.ctx.metrics {
            metrics.set_device_count(devices.len());
        }
        drop(devices);

        let archetype = snapshot.archetype.to_string();
        log_lifecycle_event(
            Some(&DeviceLogContext::for_machine(&id, &archetype)),
            "device.registered",
            "device registered",
            LifecycleOutcome::Success,
        );
        Ok(snapshot)
    }

    /// Remove a device, letting its task finish the tick in progress.
    pub async fn unregister(&self, id: &str) -> Result<DeviceSnapshot> {
        let handle = {
            let mut devices = self.devices.write();
            let handle = devices
                .shift_remove(id)
                .ok_or_else(|| FleetError::DeviceNotFound(id.to_owned()))?;
            if let Some(metrics) = &self.ctx.metrics {
                metrics.set_device_count(devices.len());
            }
            handle
        };
        let snapshot = handle.snapshots.borrow().clone();
        let archetype = handle.archetype.to_string();
        let clean = stop_task(id, handle, self.config.shutdown_grace).await;
        if let Some(metrics) = &self.ctx.metrics {
            metrics.forget_device(id, &archetype);
        }
        log_lifecycle_event(
            Some(&DeviceLogContext::for_machine(id, &archetype)),
            "device.unregistered",
            "device unregistered",
            if clean {
                LifecycleOutcome::Success
            } else {
                LifecycleOutcome::Fault
            },
        );
        Ok(snapshot)
    }

    pub async fn start(&self, id: &str) -> Result<DeviceSnapshot> {
        self.ensure_running()?;
        let snapshot = self
            .request(id, |reply| DeviceCommand::Start { reply })
            .await?;
        info!(machine = id, "device started");
        Ok(snapshot)
    }

    pub async fn stop(&self, id: &str) -> Result<DeviceSnapshot> {
        let snapshot = self
            .request(id, |reply| DeviceCommand::Stop { reply })
            .await?
            .map_err(|err| FleetError::from_sim(id, err))?;
        info!(machine = id, "device stopped");
        Ok(snapshot)
    }

    /// Start every device; devices that fail to answer are logged and skipped.
    pub async fn start_all(&self) -> Vec<DeviceSnapshot> {
        let ids = self.ids();
        let results = join_all(ids.iter().map(|id| self.start(id))).await;
        collect_fleet(ids, results, "start")
    }

    pub async fn stop_all(&self) -> Vec<DeviceSnapshot> {
        let ids = self.ids();
        let results = join_all(ids.iter().map(|id| self.stop(id))).await;
        collect_fleet(ids, results, "stop")
    }

    /// Latest snapshot of every device, in registration order.
    pub fn status(&self) -> Vec<DeviceSnapshot> {
        self.devices
            .read()
            .values()
            .map(|handle| handle.snapshots.borrow().clone())
            .collect()
    }

    pub fn device_status(&self, id: &str) -> Result<DeviceSnapshot> {
        self.devices
            .read()
            .get(id)
            .map(|handle| handle.snapshots.borrow().clone())
            .ok_or_else(|| FleetError::DeviceNotFound(id.to_owned()))
    }

    /// Configuration the device task is currently running.
    pub fn device_spec(&self, id: &str) -> Result<MachineSpec> {
        self.devices
            .read()
            .get(id)
            .map(|handle| handle.specs.borrow().clone())
            .ok_or_else(|| FleetError::DeviceNotFound(id.to_owned()))
    }

    fn archetype(&self, id: &str) -> Result<Archetype> {
        self.devices
            .read()
            .get(id)
            .map(|handle| handle.archetype)
            .ok_or_else(|| FleetError::DeviceNotFound(id.to_owned()))
    }

    /// Inject `kind` (snake_case name, e.g. `leak`) into a device. The kind
    /// is checked against the archetype before the device sees the command.
    pub async fn inject_anomaly(
        &self,
        id: &str,
        kind: &str,
        magnitude: f64,
        duration: Duration,
    ) -> Result<AnomalyState> {
        self.ensure_running()?;
        let archetype = self.archetype(id)?;
        let parsed = AnomalyKind::from_str(kind)
            .ok()
            .filter(|parsed| archetype.supports(*parsed))
            .ok_or_else(|| FleetError::InvalidAnomalyType {
                machine: id.to_owned(),
                archetype,
                kind: kind.to_owned(),
            })?;
        self.request(id, |reply| DeviceCommand::Inject {
            kind: parsed,
            magnitude,
            duration,
            reply,
        })
        .await?
        .map_err(|err| FleetError::from_sim(id, err))
    }

    pub async fn clear_anomaly(&self, id: &str) -> Result<Option<AnomalyState>> {
        self.request(id, |reply| DeviceCommand::ClearAnomaly { reply })
            .await
    }

    /// Apply a partial update between ticks. The device task merges it into
    /// the spec it is running and validates the result, so concurrent
    /// updates to different fields all take effect.
    pub async fn configure(&self, id: &str, update: DeviceUpdate) -> Result<DeviceSnapshot> {
        self.ensure_running()?;
        let archetype = self.archetype(id)?;
        if let Some(requested) = update.model.as_ref().map(MachineModel::archetype) {
            if requested != archetype {
                return Err(FleetError::Configuration(format!(
                    "machine '{id}': cannot change archetype from {archetype} to {requested}"
                )));
            }
        }
        self.request(id, |reply| DeviceCommand::Configure { update, reply })
            .await?
            .map_err(|err| FleetError::from_sim(id, err))
    }

    /// Scheduler lateness across the fleet.
    pub fn lateness_summary(&self) -> Option<JitterSummary> {
        self.ctx.lateness.summary()
    }

    /// Stop every device task. Tasks finish their current tick and exit;
    /// those still running after the grace period are aborted. Further
    /// commands are rejected with [`FleetError::ShuttingDown`].
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutting_down.store(true, Ordering::SeqCst);
        let handles: Vec<(String, DeviceHandle)> = self.devices.write().drain(..).collect();
        if let Some(metrics) = &self.ctx.metrics {
            metrics.set_device_count(0);
        }
        let grace = self.config.shutdown_grace;
        let outcomes = join_all(
            handles
                .into_iter()
                .map(|(id, handle)| async move { stop_task(&id, handle, grace).await }),
        )
        .await;
        let stopped = outcomes.iter().filter(|clean| **clean).count();
        let report = ShutdownReport {
            stopped,
            aborted: outcomes.len() - stopped,
        };
        log_lifecycle_event(
            None,
            "fleet.shutdown",
            &format!(
                "fleet shut down ({} stopped, {} aborted)",
                report.stopped, report.aborted
            ),
            if report.aborted == 0 {
                LifecycleOutcome::Success
            } else {
                LifecycleOutcome::Fault
            },
        );
        report
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            Err(FleetError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn sender(&self, id: &str) -> Result<mpsc::Sender<DeviceCommand>> {
        self.devices
            .read()
            .get(id)
            .map(|handle| handle.commands.clone())
            .ok_or_else(|| FleetError::DeviceNotFound(id.to_owned()))
    }

    async fn request<T>(
        &self,
        id: &str,
        command: impl FnOnce(oneshot::Sender<T>) -> DeviceCommand,
    ) -> Result<T> {
        let sender = self.sender(id)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(command(reply_tx))
            .await
            .map_err(|_| FleetError::DeviceUnavailable(id.to_owned()))?;
        reply_rx
            .await
            .map_err(|_| FleetError::DeviceUnavailable(id.to_owned()))
    }
}

impl Drop for SimulationManager {
    fn drop(&mut self) {
        for handle in self.devices.get_mut().values() {
            handle.abort.abort();
        }
    }
}

/// Wait for the device task and log how it ended. A panic stays contained
/// in its own task; the device's last snapshot is marked offline and its
/// gauges zeroed.
async fn supervise(
    machine: String,
    archetype: String,
    task: JoinHandle<()>,
    snapshots: watch::Sender<DeviceSnapshot>,
    metrics: Option<SimulatorMetrics>,
) {
    match task.await {
        Ok(()) => {}
        Err(err) if err.is_panic() => {
            error!(machine = %machine, archetype = %archetype, "device task panicked");
            snapshots.send_modify(|snapshot| {
                snapshot.running = false;
                snapshot.power_kw = 0.0;
                snapshot.operating_mode = OperatingMode::Offline;
            });
            if let Some(metrics) = metrics {
                metrics.set_device_state(&machine, &archetype, false, 0.0);
            }
        }
        Err(_) => {
            warn!(machine = %machine, "device task cancelled");
        }
    }
}

/// Ask the task to exit and wait up to `grace`. Returns `false` when the task
/// had to be aborted or was already dead.
async fn stop_task(id: &str, handle: DeviceHandle, grace: Duration) -> bool {
    let DeviceHandle {
        commands,
        task,
        abort,
        ..
    } = handle;
    // A full queue still belongs to a live task, which sees the closed
    // channel once it drains.
    let delivered = match commands.try_send(DeviceCommand::Shutdown) {
        Ok(()) | Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Closed(_)) => false,
    };
    drop(commands);
    match tokio::time::timeout(grace, task).await {
        Ok(_) if delivered => true,
        Ok(_) => false,
        Err(_) => {
            warn!(machine = id, "device task did not stop within grace period; aborting");
            abort.abort();
            false
        }
    }
}

fn collect_fleet(
    ids: Vec<String>,
    results: Vec<Result<DeviceSnapshot>>,
    action: &str,
) -> Vec<DeviceSnapshot> {
    ids.into_iter()
        .zip(results)
        .filter_map(|(id, result)| match result {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(machine = %id, action, error = %err, "fleet command skipped device");
                None
            }
        })
        .collect()
}
