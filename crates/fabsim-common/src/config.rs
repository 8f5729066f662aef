//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Daemon configuration: fleet, simulation, transport and observability."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use fabsim_sim::{AnomalyPolicy, DeviceSettings, ElectricalProfile, MachineSpec, ShiftCalendar};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_true() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_seed() -> u64 {
    0xFAB5_1A7E
}

fn default_noise_pct() -> f64 {
    0.03
}

fn default_time_scale() -> f64 {
    1.0
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_status_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_topic_prefix() -> String {
    "factory".to_owned()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_workers() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(2)
}

/// Primary configuration object for the simulator daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Fleet keyed by machine id, in file order.
    #[serde(default)]
    pub machines: IndexMap<String, MachineSpec>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "FABSIM_CONFIG";

    /// Load configuration from disk, respecting the `FABSIM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        let found = candidates
            .iter()
            .map(|candidate| candidate.as_ref())
            .find(|candidate| candidate.exists());
        if let Some(path) = found {
            let config = Self::from_path(path)?;
            return Ok(LoadedAppConfig {
                config,
                source: path.to_path_buf(),
            });
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Copy each table key into its machine's `id`, rejecting conflicting ids.
    fn assign_machine_ids(&mut self) -> Result<()> {
        for (key, spec) in self.machines.iter_mut() {
            if spec.id.is_empty() {
                spec.id = key.clone();
            } else if &spec.id != key {
                bail!("machine '{}' declares conflicting id '{}'", key, spec.id);
            }
        }
        Ok(())
    }

    /// Machine specs in declaration order.
    pub fn fleet(&self) -> impl Iterator<Item = &MachineSpec> {
        self.machines.values()
    }

    pub fn machine(&self, id: &str) -> Option<&MachineSpec> {
        self.machines.get(id)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.machines.is_empty() {
            bail!("configuration must declare at least one machine");
        }
        for spec in self.machines.values() {
            spec.validate()?;
        }
        self.simulation.validate()?;
        self.transport.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let mut config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.assign_machine_ids()?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Write the rolling JSON log file next to stdout output.
    #[serde(default = "default_true")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Multiplicative noise band applied to every reported value.
    #[serde(default = "default_noise_pct")]
    pub noise_pct: f64,
    /// Simulated seconds per real second.
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
    /// Simulated wall-clock origin; defaults to the moment the daemon starts.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub autostart: bool,
    #[serde(default = "default_shutdown_grace", rename = "shutdown_grace_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub shutdown_grace: Duration,
    #[serde(default = "default_status_interval", rename = "status_log_interval_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub status_log_interval: Duration,
    #[serde(default)]
    pub anomalies: AnomalyPolicy,
    #[serde(default)]
    pub shifts: ShiftCalendar,
    #[serde(default)]
    pub electrical: ElectricalProfile,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            noise_pct: default_noise_pct(),
            time_scale: default_time_scale(),
            start_time: None,
            autostart: true,
            shutdown_grace: default_shutdown_grace(),
            status_log_interval: default_status_interval(),
            anomalies: AnomalyPolicy::default(),
            shifts: ShiftCalendar::default(),
            electrical: ElectricalProfile::default(),
        }
    }
}

impl SimulationConfig {
    /// Per-device knobs derived from the simulation section.
    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            seed: self.seed,
            noise_pct: self.noise_pct,
            calendar: self.shifts.clone(),
            anomalies: self.anomalies.clone(),
            electrical: self.electrical,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.time_scale.is_finite() || self.time_scale <= 0.0 || self.time_scale > 3600.0 {
            bail!(
                "simulation.time_scale must be within (0, 3600], got {}",
                self.time_scale
            );
        }
        if self.shutdown_grace.is_zero() {
            bail!("simulation.shutdown_grace_secs must be non-zero");
        }
        self.device_settings().validate()?;
        Ok(())
    }
}

/// Where readings are delivered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Kept in memory; useful for tests and dry runs.
    InMemory,
    /// Emitted as tracing events.
    #[default]
    Log,
    /// Appended as newline-delimited JSON to `transport.path`.
    Ndjson,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "in_memory" | "memory" => Ok(TransportKind::InMemory),
            "log" => Ok(TransportKind::Log),
            "ndjson" | "jsonl" => Ok(TransportKind::Ndjson),
            other => Err(format!("unknown transport kind: {}", other)),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff", rename = "initial_backoff_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff", rename = "max_backoff_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            path: None,
            topic_prefix: default_topic_prefix(),
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            retry: RetryConfig::default(),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        let prefix = self.topic_prefix.trim_matches('/');
        if prefix.is_empty() {
            bail!("transport.topic_prefix must not be empty");
        }
        if prefix.contains(&['#', '+', ' '][..]) {
            bail!(
                "transport.topic_prefix '{}' contains wildcard or whitespace characters",
                self.topic_prefix
            );
        }
        if self.queue_capacity == 0 {
            bail!("transport.queue_capacity must be at least 1");
        }
        if self.workers == 0 {
            bail!("transport.workers must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("transport.retry.max_attempts must be at least 1");
        }
        if self.retry.max_backoff < self.retry.initial_backoff {
            bail!("transport.retry.max_backoff_ms must not be below initial_backoff_ms");
        }
        if self.kind == TransportKind::Ndjson && self.path.is_none() {
            bail!("transport.path is required for the ndjson transport");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabsim_sim::{Archetype, MachineModel};

    const SAMPLE: &str = r#"
        [simulation]
        seed = 7
        time_scale = 10.0

        [simulation.anomalies]
        daily_probability = 0.25

        [transport]
        kind = "in_memory"
        topic_prefix = "plant-a"

        [machines.air-1]
        archetype = "compressor"
        rated_power_kw = 55.0
        interval_ms = 1000

        [machines.belt-1]
        name = "Packing conveyor"
        archetype = "motor"
        rated_power_kw = 7.5
        ramp_rate_pct_per_s = 10.0
    "#;

    #[test]
    fn parses_fleet_in_declaration_order() {
        let config: AppConfig = SAMPLE.parse().unwrap();
        let ids: Vec<&str> = config.fleet().map(|spec| spec.id.as_str()).collect();
        assert_eq!(ids, ["air-1", "belt-1"]);
        let belt = config.machine("belt-1").unwrap();
        assert_eq!(belt.archetype(), Archetype::Motor);
        assert_eq!(belt.display_name(), "Packing conveyor");
        assert_eq!(belt.interval, Duration::from_secs(5));
        match &belt.model {
            MachineModel::Motor(params) => assert_eq!(params.ramp_rate_pct_per_s, 10.0),
            other => panic!("unexpected model {other:?}"),
        }
        assert_eq!(config.simulation.anomalies.daily_probability, 0.25);
        assert_eq!(config.transport.kind, TransportKind::InMemory);
    }

    #[test]
    fn rejects_empty_fleet() {
        let err = "[simulation]\nseed = 1\n".parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("at least one machine"));
    }

    #[test]
    fn rejects_conflicting_machine_id() {
        let content = r#"
            [machines.pump-1]
            id = "pump-2"
            archetype = "pump"
            rated_power_kw = 11.0
        "#;
        assert!(content.parse::<AppConfig>().is_err());
    }

    #[test]
    fn rejects_invalid_archetype_parameters() {
        let content = r#"
            [machines.air-1]
            archetype = "compressor"
            rated_power_kw = 55.0
            load_pressure_bar = 7.9
        "#;
        let err = content.parse::<AppConfig>().unwrap_err();
        assert!(format!("{err:#}").contains("air-1"));
    }

    #[test]
    fn ndjson_transport_requires_path() {
        let transport = TransportConfig {
            kind: TransportKind::Ndjson,
            ..TransportConfig::default()
        };
        assert!(transport.validate().is_err());
        assert_eq!("jsonl".parse::<TransportKind>(), Ok(TransportKind::Ndjson));
    }

    #[test]
    fn device_settings_follow_simulation_section() {
        let config: AppConfig = SAMPLE.parse().unwrap();
        let settings = config.simulation.device_settings();
        assert_eq!(settings.seed, 7);
        assert_eq!(settings.noise_pct, 0.03);
        assert_eq!(settings.anomalies.daily_probability, 0.25);
    }

    #[test]
    fn load_with_source_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fabsim.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.machines.len(), 2);
    }

    #[test]
    fn shipped_example_config_is_valid() {
        let config: AppConfig = include_str!("../../../configs/example.toml")
            .parse()
            .unwrap();
        let archetypes: Vec<Archetype> = config.fleet().map(|spec| spec.archetype()).collect();
        assert_eq!(archetypes, Archetype::ALL);
        assert_eq!(config.transport.retry.max_backoff, Duration::from_secs(2));
        assert_eq!(config.simulation.shifts.utc_offset_hours, 1);
    }
}
