//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Machine specifications and archetype parameters."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use strum::{Display, EnumString};

use crate::error::{Result, SimError};
use crate::models::boiler::BoilerParams;
use crate::models::compressor::CompressorParams;
use crate::models::hvac::HvacParams;
use crate::models::injection_molder::InjectionMolderParams;
use crate::models::motor::MotorParams;
use crate::models::pump::PumpParams;

/// Shortest tick interval a device may be configured with.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);
/// Longest tick interval a device may be configured with.
pub const MAX_INTERVAL: Duration = Duration::from_secs(300);

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

/// Category of simulated machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Archetype {
    Compressor,
    Motor,
    Hvac,
    Pump,
    InjectionMolder,
    Boiler,
}

impl Archetype {
    pub const ALL: [Archetype; 6] = [
        Archetype::Compressor,
        Archetype::Motor,
        Archetype::Hvac,
        Archetype::Pump,
        Archetype::InjectionMolder,
        Archetype::Boiler,
    ];
}

/// Archetype tag plus the archetype's own tunable parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "archetype", rename_all = "snake_case")]
pub enum MachineModel {
    Compressor(CompressorParams),
    Motor(MotorParams),
    Hvac(HvacParams),
    Pump(PumpParams),
    InjectionMolder(InjectionMolderParams),
    Boiler(BoilerParams),
}

impl MachineModel {
    /// Model with default parameters for the archetype.
    pub fn default_for(archetype: Archetype) -> Self {
        match archetype {
            Archetype::Compressor => MachineModel::Compressor(CompressorParams::default()),
            Archetype::Motor => MachineModel::Motor(MotorParams::default()),
            Archetype::Hvac => MachineModel::Hvac(HvacParams::default()),
            Archetype::Pump => MachineModel::Pump(PumpParams::default()),
            Archetype::InjectionMolder => {
                MachineModel::InjectionMolder(InjectionMolderParams::default())
            }
            Archetype::Boiler => MachineModel::Boiler(BoilerParams::default()),
        }
    }

    pub fn archetype(&self) -> Archetype {
        match self {
            MachineModel::Compressor(_) => Archetype::Compressor,
            MachineModel::Motor(_) => Archetype::Motor,
            MachineModel::Hvac(_) => Archetype::Hvac,
            MachineModel::Pump(_) => Archetype::Pump,
            MachineModel::InjectionMolder(_) => Archetype::InjectionMolder,
            MachineModel::Boiler(_) => Archetype::Boiler,
        }
    }
}

/// Immutable description of one machine in the fleet.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    /// Filled from the table key when loaded from a fleet file.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub rated_power_kw: f64,
    #[serde(default = "default_interval", rename = "interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
    #[serde(flatten)]
    pub model: MachineModel,
}

impl MachineSpec {
    pub fn new(
        id: impl Into<String>,
        rated_power_kw: f64,
        interval: Duration,
        model: MachineModel,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            rated_power_kw,
            interval,
            model,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn archetype(&self) -> Archetype {
        self.model.archetype()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Upper bound on reported power, leaving headroom for anomalies and noise.
    pub fn power_ceiling_kw(&self) -> f64 {
        self.rated_power_kw * 1.1
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SimError::config("machine id must not be empty"));
        }
        if self
            .id
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(SimError::config(format!(
                "machine id '{}' may only contain ASCII letters, digits, '-' and '_'",
                self.id
            )));
        }
        if !self.rated_power_kw.is_finite() || self.rated_power_kw <= 0.0 {
            return Err(SimError::config(format!(
                "machine '{}' rated power must be positive, got {}",
                self.id, self.rated_power_kw
            )));
        }
        if self.interval < MIN_INTERVAL || self.interval > MAX_INTERVAL {
            return Err(SimError::config(format!(
                "machine '{}' interval {:?} outside [{:?}, {:?}]",
                self.id, self.interval, MIN_INTERVAL, MAX_INTERVAL
            )));
        }
        self.model
            .validate()
            .map_err(|err| SimError::config(format!("machine '{}': {}", self.id, err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flattened_archetype_parameters() {
        let spec: MachineSpec = toml::from_str(
            r#"
            id = "air-1"
            archetype = "compressor"
            rated_power_kw = 50.0
            interval_ms = 1000
            max_flow_m3h = 300.0
            "#,
        )
        .unwrap();
        assert_eq!(spec.archetype(), Archetype::Compressor);
        assert_eq!(spec.interval, Duration::from_secs(1));
        match &spec.model {
            MachineModel::Compressor(params) => {
                assert_eq!(params.max_flow_m3h, 300.0);
                assert_eq!(params.min_pressure_bar, 6.0);
            }
            other => panic!("unexpected model {other:?}"),
        }
        spec.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_archetype() {
        let parsed = toml::from_str::<MachineSpec>(
            r#"
            id = "x"
            archetype = "turbine"
            rated_power_kw = 10.0
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn validation_rejects_bad_interval_and_power() {
        let mut spec = MachineSpec::new(
            "belt-1",
            15.0,
            Duration::from_millis(10),
            MachineModel::default_for(Archetype::Motor),
        );
        assert!(spec.validate().is_err());
        spec.interval = Duration::from_secs(1);
        spec.rated_power_kw = -1.0;
        assert!(spec.validate().is_err());
        spec.rated_power_kw = 15.0;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn defaults_validate_for_every_archetype() {
        for archetype in Archetype::ALL {
            let spec = MachineSpec::new(
                format!("{archetype}-1"),
                20.0,
                Duration::from_secs(2),
                MachineModel::default_for(archetype),
            );
            spec.validate().unwrap();
            assert_eq!(spec.archetype(), archetype);
        }
    }
}
