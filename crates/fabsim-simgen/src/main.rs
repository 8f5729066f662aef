//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "01-bootstrap"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Offline generator for deterministic reading series."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! Runs a single device on a simulated clock, without any scheduler or
//! transport, and writes the readings it produces.
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use fabsim_common::AppConfig;
use fabsim_sim::{
    AnomalyKind, AnomalyPolicy, Archetype, DeviceSettings, DeviceSimulator, MachineModel,
    MachineSpec, ReadingBatch,
};
use serde::Serialize;
use serde_json::{Map, Value};

const DEFAULT_SEED: u64 = 0xFAB5_1A7E;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Generate deterministic FabSim reading series",
    long_about = None
)]
struct Cli {
    /// Machine archetype to simulate
    #[arg(long, default_value = "compressor")]
    archetype: Archetype,

    /// Machine identifier embedded in readings (defaults to '<archetype>-1')
    #[arg(long)]
    machine_id: Option<String>,

    /// Nameplate power in kW
    #[arg(long, default_value_t = 50.0)]
    rated_power_kw: f64,

    /// Take machine and simulation settings from a daemon config file
    #[arg(long, value_name = "FILE", requires = "machine")]
    config: Option<PathBuf>,

    /// Machine id to look up in --config
    #[arg(long)]
    machine: Option<String>,

    /// Output file path. Use '-' for stdout.
    #[arg(long, default_value = "readings.csv")]
    output: PathBuf,

    /// Explicit output format when extension is ambiguous
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Simulated span in seconds (ignored when --samples supplied)
    #[arg(long, default_value_t = 3600)]
    duration_secs: u64,

    /// Tick interval in milliseconds (1000 unless the config file sets one)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Explicit number of ticks to generate
    #[arg(long)]
    samples: Option<u64>,

    /// Simulated start time (RFC 3339); defaults to midnight UTC today
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// Run seed
    #[arg(long)]
    seed: Option<u64>,

    /// Multiplicative noise fraction applied to every value
    #[arg(long)]
    noise_pct: Option<f64>,

    /// Probability of a random anomaly per simulated day
    #[arg(long)]
    daily_probability: Option<f64>,

    /// Anomaly to inject during the run
    #[arg(long)]
    anomaly: Option<AnomalyKind>,

    /// Offset from the start, in seconds, at which the anomaly is injected
    #[arg(long, default_value_t = 0, requires = "anomaly")]
    anomaly_at_secs: u64,

    /// How long the injected anomaly lasts
    #[arg(long, default_value_t = 60, requires = "anomaly")]
    anomaly_duration_secs: u64,

    /// Effect magnitude; defaults to the kind's standard magnitude
    #[arg(long, requires = "anomaly")]
    anomaly_magnitude: Option<f64>,
}

/// One generated tick plus the anomaly active while it was produced.
#[derive(Debug, Clone, Serialize)]
struct GeneratedTick {
    #[serde(flatten)]
    batch: ReadingBatch,
    anomaly: Option<AnomalyKind>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = determine_format(&cli.output, cli.format);
    let ticks = generate(&cli)?;

    match format {
        OutputFormat::Csv => write_csv(&cli.output, &ticks)?,
        OutputFormat::Json => write_json(&cli.output, &ticks)?,
    }

    if cli.output.as_os_str() != "-" {
        if let Some(first) = ticks.first() {
            eprintln!(
                "generated {} ticks for {} -> {}",
                ticks.len(),
                first.batch.machine_id(),
                cli.output.display()
            );
        }
    }
    Ok(())
}

fn compute_sample_count(cli: &Cli, interval: Duration) -> Result<u64> {
    let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    if interval_ms == 0 {
        bail!("interval must be at least one millisecond");
    }
    if let Some(samples) = cli.samples {
        return if samples == 0 {
            Err(anyhow!("samples must be greater than zero"))
        } else {
            Ok(samples)
        };
    }
    let ticks = cli.duration_secs.saturating_mul(1000) / interval_ms;
    Ok(ticks.max(1))
}

fn determine_format(path: &Path, override_format: Option<OutputFormat>) -> OutputFormat {
    if let Some(format) = override_format {
        return format;
    }
    if path.as_os_str() == "-" {
        return OutputFormat::Json;
    }
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => OutputFormat::Json,
        _ => OutputFormat::Csv,
    }
}

/// Resolve the machine and per-device settings from the CLI, optionally
/// seeded from a config file. Explicit flags win over file values.
fn build_device(cli: &Cli) -> Result<(MachineSpec, DeviceSettings)> {
    let (mut spec, mut settings) = match (&cli.config, &cli.machine) {
        (Some(path), Some(machine)) => {
            let config = AppConfig::from_path(path)?;
            let spec = config
                .machine(machine)
                .cloned()
                .with_context(|| format!("machine '{machine}' not found in {}", path.display()))?;
            (spec, config.simulation.device_settings())
        }
        _ => {
            let id = cli
                .machine_id
                .clone()
                .unwrap_or_else(|| format!("{}-1", cli.archetype));
            let spec = MachineSpec::new(
                id,
                cli.rated_power_kw,
                Duration::from_millis(cli.interval_ms.unwrap_or(1000)),
                MachineModel::default_for(cli.archetype),
            );
            let settings = DeviceSettings {
                seed: DEFAULT_SEED,
                anomalies: AnomalyPolicy::disabled(),
                ..DeviceSettings::default()
            };
            (spec, settings)
        }
    };

    if let Some(interval_ms) = cli.interval_ms {
        spec.interval = Duration::from_millis(interval_ms);
    }
    if let Some(seed) = cli.seed {
        settings.seed = seed;
    }
    if let Some(noise) = cli.noise_pct {
        settings.noise_pct = noise;
    }
    if let Some(probability) = cli.daily_probability {
        settings.anomalies.daily_probability = probability;
    }
    Ok((spec, settings))
}

fn start_time(cli: &Cli) -> DateTime<Utc> {
    cli.start.unwrap_or_else(|| {
        Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or_else(Utc::now)
    })
}

fn generate(cli: &Cli) -> Result<Vec<GeneratedTick>> {
    let (spec, settings) = build_device(cli)?;
    let samples = compute_sample_count(cli, spec.interval)?;
    let interval = chrono::Duration::from_std(spec.interval)?;
    let mut sim = DeviceSimulator::new(spec, settings)?;
    sim.start();

    let start = start_time(cli);
    let anomaly_at = start + chrono::Duration::seconds(i64::try_from(cli.anomaly_at_secs)?);
    let mut pending = cli.anomaly;

    let mut ticks = Vec::with_capacity(usize::try_from(samples).unwrap_or_default());
    let mut now = start;
    for _ in 0..samples {
        if let Some(kind) = pending.filter(|_| now >= anomaly_at) {
            let magnitude = cli
                .anomaly_magnitude
                .unwrap_or_else(|| kind.default_magnitude());
            sim.inject(
                kind,
                magnitude,
                Duration::from_secs(cli.anomaly_duration_secs),
                now,
            )?;
            pending = None;
        }
        let outcome = sim.tick(now)?;
        let anomaly = sim.active_anomaly(now).map(|active| active.kind);
        ticks.push(GeneratedTick {
            batch: outcome.batch,
            anomaly,
        });
        now += interval;
    }
    Ok(ticks)
}

const BASE_COLUMNS: [&str; 17] = [
    "time",
    "machine_id",
    "archetype",
    "power_kw",
    "energy_kwh",
    "voltage_v",
    "current_a",
    "power_factor",
    "frequency_hz",
    "production_count",
    "production_count_good",
    "production_count_bad",
    "throughput_units_per_hour",
    "operating_mode",
    "speed_percent",
    "anomaly",
    "tick",
];

fn environment_fields(batch: &ReadingBatch) -> Result<Map<String, Value>> {
    let mut fields = match serde_json::to_value(&batch.environmental.environment)? {
        Value::Object(map) => map,
        other => bail!("environment serialized to non-object {other}"),
    };
    fields.remove("archetype");
    Ok(fields)
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn output_writer(output: &Path) -> Result<Box<dyn Write>> {
    if output.as_os_str() == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        let file = File::create(output)
            .with_context(|| format!("failed to create output file {}", output.display()))?;
        Ok(Box::new(file))
    }
}

/// One flat row per tick; archetype-specific environment columns follow the
/// shared ones.
fn write_csv(output: &Path, ticks: &[GeneratedTick]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output_writer(output)?);
    let Some(first) = ticks.first() else {
        return Ok(());
    };
    let env_columns: Vec<String> = environment_fields(&first.batch)?.keys().cloned().collect();
    let mut header: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    header.extend(env_columns.iter().cloned());
    writer.write_record(&header)?;

    for (index, tick) in ticks.iter().enumerate() {
        let ReadingBatch {
            energy,
            production,
            environmental,
        } = &tick.batch;
        let mut row = vec![
            energy.time.to_rfc3339(),
            energy.machine_id.clone(),
            environmental.environment.archetype().to_string(),
            energy.power_kw.to_string(),
            energy.energy_kwh.to_string(),
            cell(energy.voltage_v),
            cell(energy.current_a),
            cell(energy.power_factor),
            cell(energy.frequency_hz),
            production.production_count.to_string(),
            production.production_count_good.to_string(),
            production.production_count_bad.to_string(),
            production.throughput_units_per_hour.to_string(),
            production.operating_mode.to_string(),
            production.speed_percent.to_string(),
            tick.anomaly.map(|kind| kind.to_string()).unwrap_or_default(),
            index.to_string(),
        ];
        let env = environment_fields(&tick.batch)?;
        row.extend(env_columns.iter().map(|column| match env.get(column) {
            Some(Value::Number(number)) => number.to_string(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json(output: &Path, ticks: &[GeneratedTick]) -> Result<()> {
    let mut writer = output_writer(output)?;
    serde_json::to_writer_pretty(&mut writer, ticks)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
