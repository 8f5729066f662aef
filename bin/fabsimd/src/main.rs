//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "binary"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Binary entrypoint for the FabSim daemon."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use fabsim_common::config::AppConfig;
use fabsim_common::logging::init_tracing;
use fabsim_core::{
    build_transport, publisher_config, ManagerConfig, MetricsObserver, SimulationManager,
};
use fabsim_metrics::{new_registry, spawn_http_server, DaemonMetrics, SimulatorMetrics};
use fabsim_msg::{Publisher, TopicScheme};
use fabsim_rt::RateLimiter;
use fabsim_sim::ReadingKind;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

const BUILD_TARGET: &str = env!("VERGEN_CARGO_TARGET_TRIPLE");
const BUILD_DEBUG: &str = env!("VERGEN_CARGO_DEBUG");
const BUILD_TIMESTAMP: &str = env!("VERGEN_BUILD_TIMESTAMP");

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "FabSim factory device simulator daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the simulated fleet until interrupted")]
    Run,
    #[command(about = "Validate the configuration and print the fleet")]
    Check,
    #[command(about = "Print the topic each machine publishes to")]
    Topics,
}

fn build_profile() -> &'static str {
    if BUILD_DEBUG == "true" {
        "debug"
    } else {
        "release"
    }
}

fn version_line() -> String {
    format!(
        "FabSim {} ({}, {}, built {})",
        env!("CARGO_PKG_VERSION"),
        BUILD_TARGET,
        build_profile(),
        BUILD_TIMESTAMP
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", version_line());
        return Ok(());
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/fabsim.toml"));
    candidates.push(PathBuf::from("configs/example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let load_duration = load_started.elapsed();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), build_profile());

            init_tracing("fabsimd", &loaded.config.logging)?;
            info!(
                config_path = %loaded.source.display(),
                machines = loaded.config.machines.len(),
                version = %version_line(),
                "configuration loaded"
            );
            run_daemon(loaded.config, SimulatorMetrics::new(registry)?).await?
        }
        Commands::Check => print_fleet(&loaded.config, &loaded.source),
        Commands::Topics => print_topics(&loaded.config)?,
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, metrics: SimulatorMetrics) -> Result<()> {
    let metrics_server = if config.metrics.enabled {
        let server = spawn_http_server(metrics.registry(), config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let transport = build_transport(&config.transport).await?;
    info!(transport = transport.name(), "transport ready");
    let publisher = Publisher::spawn_with_observer(
        transport,
        publisher_config(&config.transport),
        Arc::new(MetricsObserver::new(metrics.clone())),
    );

    let manager = Arc::new(SimulationManager::new(
        ManagerConfig::from_app(&config),
        publisher.handle(),
        Some(metrics),
    ));
    for spec in config.fleet() {
        manager
            .register(spec.clone())
            .with_context(|| format!("failed to register machine '{}'", spec.id))?;
    }
    if config.simulation.autostart {
        let started = manager.start_all().await;
        info!(started = started.len(), "fleet started");
    } else {
        info!("autostart disabled; devices registered in stopped state");
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let reporter = tokio::spawn(report_status(
        Arc::clone(&manager),
        config.simulation.status_log_interval,
        stop_rx,
    ));

    info!(
        devices = manager.len(),
        time_scale = manager.clock().time_scale(),
        "daemon running; waiting for termination signal"
    );
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    let _ = stop_tx.send(true);
    if let Err(err) = reporter.await {
        warn!(error = %err, "status reporter ended abnormally");
    }

    let report = manager.shutdown().await;
    info!(
        stopped = report.stopped,
        aborted = report.aborted,
        "device tasks stopped"
    );
    // The publisher drains only after every outbound handle is gone.
    drop(manager);
    let stats = publisher.shutdown(config.simulation.shutdown_grace).await;
    info!(
        published = stats.published,
        retries = stats.retries,
        failures = stats.failures,
        dropped = stats.dropped,
        "publisher drained"
    );

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

async fn report_status(
    manager: Arc<SimulationManager>,
    every: std::time::Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut limiter = RateLimiter::new(every);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = limiter.tick() => {}
        }
        let status = manager.status();
        let running = status.iter().filter(|device| device.running).count();
        let anomalies = status
            .iter()
            .filter(|device| device.active_anomaly.is_some())
            .count();
        let total_kw: f64 = status.iter().map(|device| device.power_kw).sum();
        match manager.lateness_summary() {
            Some(lateness) => info!(
                devices = status.len(),
                running,
                anomalies,
                total_kw,
                lateness_p50_us = lateness.p50_us,
                lateness_p99_us = lateness.p99_us,
                lateness_max_us = lateness.max_us,
                "fleet status"
            ),
            None => info!(
                devices = status.len(),
                running,
                anomalies,
                total_kw,
                "fleet status"
            ),
        }
    }
}

fn print_fleet(config: &AppConfig, source: &std::path::Path) {
    println!("Configuration: {}", source.display());
    println!(
        "Simulation: seed={} time_scale={} noise={} autostart={}",
        config.simulation.seed,
        config.simulation.time_scale,
        config.simulation.noise_pct,
        config.simulation.autostart
    );
    println!(
        "Transport: {:?} prefix={} queue={} workers={}",
        config.transport.kind,
        config.transport.topic_prefix,
        config.transport.queue_capacity,
        config.transport.workers
    );
    println!("Machines ({}):", config.machines.len());
    for spec in config.fleet() {
        println!(
            "  {:<20} {:<18} {:>8.1} kW  every {:>6} ms  {}",
            spec.id,
            spec.archetype(),
            spec.rated_power_kw,
            spec.interval.as_millis(),
            spec.display_name()
        );
    }
}

fn print_topics(config: &AppConfig) -> Result<()> {
    let scheme = TopicScheme::new(&config.transport.topic_prefix);
    let map: serde_json::Map<String, serde_json::Value> = config
        .fleet()
        .map(|spec| {
            let topics = ReadingKind::ALL
                .iter()
                .map(|kind| serde_json::Value::String(scheme.topic(&spec.id, kind.as_str())))
                .collect();
            (spec.id.clone(), serde_json::Value::Array(topics))
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&map)?);
    Ok(())
}
