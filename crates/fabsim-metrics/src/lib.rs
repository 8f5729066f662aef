//! ---
//! fab_section: "03-observability"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Metrics collection and export utilities."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the simulator.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    std_listener
        .set_nonblocking(true)
        .context("failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .context("failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .context("failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address the listener is bound to, with the real port when 0 was requested.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "fabsimd_starts_total",
            "Total number of times the simulator daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "fabsimd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "fabsimd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

/// Fleet-level counters and per-device gauges.
#[derive(Clone, Debug)]
pub struct SimulatorMetrics {
    registry: SharedRegistry,
    devices: IntGauge,
    ticks: IntCounterVec,
    skipped_ticks: IntCounterVec,
    overruns: IntCounterVec,
    readings_published: IntCounterVec,
    publish_retries: IntCounter,
    publish_failures: IntCounter,
    queue_drops: IntCounterVec,
    running: IntGaugeVec,
    power_kw: GaugeVec,
    anomaly_active: IntGaugeVec,
    tick_lateness: Histogram,
}

impl SimulatorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let devices = IntGauge::with_opts(Opts::new(
            "fabsim_devices",
            "Number of devices registered with the simulation manager",
        ))?;
        registry.register(Box::new(devices.clone()))?;

        let ticks = IntCounterVec::new(
            Opts::new("fabsim_ticks_total", "Device ticks executed"),
            &["machine"],
        )?;
        registry.register(Box::new(ticks.clone()))?;

        let skipped_ticks = IntCounterVec::new(
            Opts::new(
                "fabsim_skipped_ticks_total",
                "Ticks folded into a catch-up tick because the device fell behind",
            ),
            &["machine"],
        )?;
        registry.register(Box::new(skipped_ticks.clone()))?;

        let overruns = IntCounterVec::new(
            Opts::new(
                "fabsim_tick_overruns_total",
                "Ticks whose work took longer than the device interval",
            ),
            &["machine"],
        )?;
        registry.register(Box::new(overruns.clone()))?;

        let readings_published = IntCounterVec::new(
            Opts::new(
                "fabsim_readings_published_total",
                "Readings delivered to the transport by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(readings_published.clone()))?;

        let publish_retries = IntCounter::with_opts(Opts::new(
            "fabsim_publish_retries_total",
            "Publish attempts retried after a transport error",
        ))?;
        registry.register(Box::new(publish_retries.clone()))?;

        let publish_failures = IntCounter::with_opts(Opts::new(
            "fabsim_publish_failures_total",
            "Readings dropped after exhausting publish retries",
        ))?;
        registry.register(Box::new(publish_failures.clone()))?;

        let queue_drops = IntCounterVec::new(
            Opts::new(
                "fabsim_queue_drops_total",
                "Tick batches dropped because the outbound queue was full",
            ),
            &["machine"],
        )?;
        registry.register(Box::new(queue_drops.clone()))?;

        let running = IntGaugeVec::new(
            Opts::new("fabsim_device_running", "Indicator (0/1) whether a device is running"),
            &["machine", "archetype"],
        )?;
        registry.register(Box::new(running.clone()))?;

        let power_kw = GaugeVec::new(
            Opts::new("fabsim_device_power_kw", "Last reported active power per device"),
            &["machine", "archetype"],
        )?;
        registry.register(Box::new(power_kw.clone()))?;

        let anomaly_active = IntGaugeVec::new(
            Opts::new(
                "fabsim_device_anomaly_active",
                "Indicator (0/1) whether an anomaly of the given kind is active",
            ),
            &["machine", "kind"],
        )?;
        registry.register(Box::new(anomaly_active.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let tick_lateness = Histogram::with_opts(
            HistogramOpts::new(
                "fabsim_tick_lateness_seconds",
                "Delay between a tick's intended deadline and its execution",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(tick_lateness.clone()))?;

        Ok(Self {
            registry,
            devices,
            ticks,
            skipped_ticks,
            overruns,
            readings_published,
            publish_retries,
            publish_failures,
            queue_drops,
            running,
            power_kw,
            anomaly_active,
            tick_lateness,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_device_count(&self, count: usize) {
        self.devices.set(count as i64);
    }

    pub fn record_tick(&self, machine: &str, lateness_seconds: f64, skipped: u64) {
        self.ticks.with_label_values(&[machine]).inc();
        self.tick_lateness.observe(lateness_seconds);
        if skipped > 0 {
            self.skipped_ticks.with_label_values(&[machine]).inc_by(skipped);
        }
    }

    pub fn record_overrun(&self, machine: &str) {
        self.overruns.with_label_values(&[machine]).inc();
    }

    pub fn record_published(&self, kind: &str) {
        self.readings_published.with_label_values(&[kind]).inc();
    }

    pub fn record_retry(&self) {
        self.publish_retries.inc();
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.inc();
    }

    pub fn record_queue_drop(&self, machine: &str) {
        self.queue_drops.with_label_values(&[machine]).inc();
    }

    pub fn set_device_state(&self, machine: &str, archetype: &str, running: bool, power_kw: f64) {
        self.running
            .with_label_values(&[machine, archetype])
            .set(i64::from(running));
        self.power_kw
            .with_label_values(&[machine, archetype])
            .set(power_kw);
    }

    /// Raise the gauge for `kind`, or lower it when `active` is false.
    pub fn set_anomaly(&self, machine: &str, kind: &str, active: bool) {
        self.anomaly_active
            .with_label_values(&[machine, kind])
            .set(i64::from(active));
    }

    /// Drop every per-device series for a machine that left the fleet.
    pub fn forget_device(&self, machine: &str, archetype: &str) {
        let _ = self.running.remove_label_values(&[machine, archetype]);
        let _ = self.power_kw.remove_label_values(&[machine, archetype]);
        let _ = self.ticks.remove_label_values(&[machine]);
        let _ = self.skipped_ticks.remove_label_values(&[machine]);
        let _ = self.overruns.remove_label_values(&[machine]);
        let _ = self.queue_drops.remove_label_values(&[machine]);
    }
}

pub use prometheus;
