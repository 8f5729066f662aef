//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "models"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Steam boiler with firing-rate control and pressure integration."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use super::{approach, ensure_positive, ModelOutput, PhysicalModel, StepInput};
use crate::anomaly::AnomalyKind;
use crate::error::{Result, SimError};
use crate::noise::NoiseSource;
use crate::readings::{BoilerEnvironment, Environment, OperatingMode};

const BURNER_FAULT_CAP_PCT: f64 = 50.0;
/// Firing percent added per bar of pressure below setpoint.
const PRESSURE_CORRECTION: f64 = 25.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoilerParams {
    pub setpoint_bar: f64,
    pub safety_pressure_bar: f64,
    pub firing_ramp_pct_per_s: f64,
    pub min_firing_pct: f64,
    /// Pressure change per second at full firing/demand imbalance.
    pub pressure_gain_bar_per_s: f64,
    pub nominal_steam_kg_h: f64,
    pub base_efficiency_pct: f64,
    pub feedwater_temp_c: f64,
}

impl Default for BoilerParams {
    fn default() -> Self {
        Self {
            setpoint_bar: 10.0,
            safety_pressure_bar: 12.0,
            firing_ramp_pct_per_s: 2.0,
            min_firing_pct: 20.0,
            pressure_gain_bar_per_s: 0.05,
            nominal_steam_kg_h: 2_000.0,
            base_efficiency_pct: 88.0,
            feedwater_temp_c: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoilerState {
    pub pressure_bar: f64,
    pub firing_pct: f64,
}

impl BoilerParams {
    fn water_temp(&self, pressure: f64) -> f64 {
        self.feedwater_temp_c + 100.0 * (pressure / self.safety_pressure_bar).clamp(0.0, 1.0)
    }

    fn efficiency(&self, firing_pct: f64, kind: Option<AnomalyKind>) -> f64 {
        let penalty = match kind {
            Some(AnomalyKind::Scaling) => 8.0,
            Some(AnomalyKind::FlueLeak) => 4.0,
            _ => 0.0,
        };
        // Part-load losses grow as the burner turns down.
        self.base_efficiency_pct - 3.0 * (1.0 - firing_pct / 100.0) - penalty
    }
}

impl PhysicalModel for BoilerParams {
    type State = BoilerState;

    fn validate(&self) -> Result<()> {
        ensure_positive("setpoint_bar", self.setpoint_bar)?;
        ensure_positive("firing_ramp_pct_per_s", self.firing_ramp_pct_per_s)?;
        ensure_positive("pressure_gain_bar_per_s", self.pressure_gain_bar_per_s)?;
        ensure_positive("nominal_steam_kg_h", self.nominal_steam_kg_h)?;
        if self.setpoint_bar >= self.safety_pressure_bar {
            return Err(SimError::config(
                "boiler setpoint must be below the safety pressure",
            ));
        }
        if !(0.0..=100.0).contains(&self.min_firing_pct) {
            return Err(SimError::config("min_firing_pct must be within [0, 100]"));
        }
        if !(0.0..=100.0).contains(&self.base_efficiency_pct) {
            return Err(SimError::config(
                "base_efficiency_pct must be within [0, 100]",
            ));
        }
        Ok(())
    }

    fn initial_state(&self) -> BoilerState {
        BoilerState {
            pressure_bar: self.setpoint_bar,
            firing_pct: self.min_firing_pct,
        }
    }

    fn at_rest(&self, state: &BoilerState) -> BoilerState {
        BoilerState {
            pressure_bar: state.pressure_bar,
            firing_pct: 0.0,
        }
    }

    fn advance(
        &self,
        state: &BoilerState,
        input: &StepInput<'_>,
        noise: &mut NoiseSource,
    ) -> (BoilerState, ModelOutput) {
        let dt = input.dt.max(0.0);
        let steam_demand = 0.2 + 0.8 * input.demand;
        let cap = if input.has_anomaly(AnomalyKind::BurnerFault) {
            BURNER_FAULT_CAP_PCT
        } else {
            100.0
        };
        let target = (steam_demand * 100.0
            + PRESSURE_CORRECTION * (self.setpoint_bar - state.pressure_bar))
            .clamp(self.min_firing_pct, 100.0)
            .min(cap);
        let firing = approach(state.firing_pct, target, self.firing_ramp_pct_per_s * dt)
            .clamp(0.0, cap);
        let pressure = (state.pressure_bar
            + self.pressure_gain_bar_per_s * (firing / 100.0 - steam_demand) * dt)
            .clamp(0.0, self.safety_pressure_bar);

        let base_power = input.rated_power_kw * (0.05 + 0.95 * firing / 100.0);
        let power_kw = input.jitter(noise, base_power * input.power_multiplier());

        let kind = input.anomaly_kind();
        let efficiency = self.efficiency(firing, kind);
        let flue = 140.0
            + 80.0 * firing / 100.0
            + if kind == Some(AnomalyKind::Scaling) {
                30.0
            } else {
                0.0
            };
        let steam = self.nominal_steam_kg_h * firing / 100.0 * efficiency / self.base_efficiency_pct;

        let environment = Environment::Boiler(BoilerEnvironment {
            steam_pressure_bar: input
                .jitter(noise, pressure)
                .clamp(0.0, self.safety_pressure_bar),
            water_temp_c: input.jitter(noise, self.water_temp(pressure)),
            flue_gas_temp_c: input.jitter(noise, flue),
            combustion_efficiency_pct: input.jitter(noise, efficiency).clamp(0.0, 100.0),
        });
        let output = ModelOutput {
            power_kw,
            produced_units: 0.0,
            scrap_ratio: 0.0,
            throughput_per_hour: input.jitter(noise, steam.max(0.0)),
            speed_percent: firing,
            mode: OperatingMode::Running,
            power_factor: 0.9,
            environment,
        };
        (
            BoilerState {
                pressure_bar: pressure,
                firing_pct: firing,
            },
            output,
        )
    }

    fn environment_at_rest(&self, state: &BoilerState) -> Environment {
        Environment::Boiler(BoilerEnvironment {
            steam_pressure_bar: state.pressure_bar,
            water_temp_c: self.water_temp(state.pressure_bar),
            flue_gas_temp_c: 25.0,
            combustion_efficiency_pct: 0.0,
        })
    }
}
