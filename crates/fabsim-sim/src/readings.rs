//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Reading records emitted once per device tick."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::spec::Archetype;

/// Operating mode reported with every production reading.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Offline,
    Idle,
    Running,
    Degraded,
}

/// The three reading flavours, used for topic naming.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReadingKind {
    Energy,
    Production,
    Environmental,
}

impl ReadingKind {
    pub const ALL: [ReadingKind; 3] = [
        ReadingKind::Energy,
        ReadingKind::Production,
        ReadingKind::Environmental,
    ];

    /// Topic segment; same text as `Display`.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyReading {
    pub time: DateTime<Utc>,
    pub machine_id: String,
    pub power_kw: f64,
    pub energy_kwh: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_v: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_hz: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionReading {
    pub time: DateTime<Utc>,
    pub machine_id: String,
    pub production_count: u64,
    pub production_count_good: u64,
    pub production_count_bad: u64,
    pub throughput_units_per_hour: f64,
    pub operating_mode: OperatingMode,
    pub speed_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorEnvironment {
    pub pressure_bar: f64,
    pub flow_rate_m3h: f64,
    pub vibration_mm_s: f64,
    pub discharge_temp_c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorEnvironment {
    pub machine_temp_c: f64,
    pub vibration_mm_s: f64,
    pub speed_rpm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HvacEnvironment {
    pub zone_temp_c: f64,
    pub outdoor_temp_c: f64,
    pub humidity_pct: f64,
    pub airflow_m3h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PumpEnvironment {
    pub flow_rate_m3h: f64,
    pub discharge_pressure_bar: f64,
    pub vibration_mm_s: f64,
    pub fluid_temp_c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InjectionMolderEnvironment {
    pub barrel_temp_c: f64,
    pub mold_temp_c: f64,
    pub hydraulic_pressure_bar: f64,
    pub cycle_time_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoilerEnvironment {
    pub steam_pressure_bar: f64,
    pub water_temp_c: f64,
    pub flue_gas_temp_c: f64,
    pub combustion_efficiency_pct: f64,
}

/// Archetype-specific environmental fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "archetype", rename_all = "snake_case")]
pub enum Environment {
    Compressor(CompressorEnvironment),
    Motor(MotorEnvironment),
    Hvac(HvacEnvironment),
    Pump(PumpEnvironment),
    InjectionMolder(InjectionMolderEnvironment),
    Boiler(BoilerEnvironment),
}

impl Environment {
    pub fn archetype(&self) -> Archetype {
        match self {
            Environment::Compressor(_) => Archetype::Compressor,
            Environment::Motor(_) => Archetype::Motor,
            Environment::Hvac(_) => Archetype::Hvac,
            Environment::Pump(_) => Archetype::Pump,
            Environment::InjectionMolder(_) => Archetype::InjectionMolder,
            Environment::Boiler(_) => Archetype::Boiler,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalReading {
    pub time: DateTime<Utc>,
    pub machine_id: String,
    #[serde(flatten)]
    pub environment: Environment,
}

/// The correlated reading triple produced by one tick. Batches are published
/// whole or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingBatch {
    pub energy: EnergyReading,
    pub production: ProductionReading,
    pub environmental: EnvironmentalReading,
}

impl ReadingBatch {
    pub fn machine_id(&self) -> &str {
        &self.energy.machine_id
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.energy.time
    }

    /// Serialize each reading to JSON, keyed by kind.
    pub fn to_json_records(&self) -> serde_json::Result<[(ReadingKind, Vec<u8>); 3]> {
        Ok([
            (ReadingKind::Energy, serde_json::to_vec(&self.energy)?),
            (ReadingKind::Production, serde_json::to_vec(&self.production)?),
            (
                ReadingKind::Environmental,
                serde_json::to_vec(&self.environmental)?,
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn environmental_reading_flattens_archetype_fields() {
        let reading = EnvironmentalReading {
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            machine_id: "air-1".into(),
            environment: Environment::Compressor(CompressorEnvironment {
                pressure_bar: 7.1,
                flow_rate_m3h: 120.0,
                vibration_mm_s: 2.5,
                discharge_temp_c: 70.0,
            }),
        };
        let value = serde_json::to_value(&reading).unwrap();
        assert_eq!(value["archetype"], json!("compressor"));
        assert_eq!(value["pressure_bar"], json!(7.1));
        assert_eq!(value["machine_id"], json!("air-1"));
    }

    #[test]
    fn energy_reading_omits_missing_electrical_fields() {
        let reading = EnergyReading {
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            machine_id: "belt-1".into(),
            power_kw: 0.0,
            energy_kwh: 3.2,
            voltage_v: Some(400.0),
            current_a: None,
            power_factor: None,
            frequency_hz: Some(50.0),
        };
        let value = serde_json::to_value(&reading).unwrap();
        assert!(value.get("current_a").is_none());
        assert_eq!(value["voltage_v"], json!(400.0));
    }

    #[test]
    fn operating_mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(OperatingMode::Offline).unwrap(),
            json!("offline")
        );
        assert_eq!(OperatingMode::Degraded.to_string(), "degraded");
    }

    #[test]
    fn reading_kind_topic_segment_matches_display() {
        let segments: Vec<&str> = ReadingKind::ALL.iter().map(|kind| kind.as_str()).collect();
        assert_eq!(segments, ["energy", "production", "environmental"]);
        for kind in ReadingKind::ALL {
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }
}
