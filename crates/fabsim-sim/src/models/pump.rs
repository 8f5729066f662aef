//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "models"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Centrifugal pump following the affinity laws."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! Speed `s` approaches `min_speed + (100 − min_speed) · demand` (stopped
//! below 10 % demand). With `n = s / 100`: flow ∝ n, head ∝ n², and
//! `power = rated · (0.05 + 0.95 · n³)` while turning.
use serde::{Deserialize, Serialize};

use super::{approach, ensure_positive, relax, ModelOutput, PhysicalModel, StepInput};
use crate::anomaly::AnomalyKind;
use crate::error::{Result, SimError};
use crate::noise::NoiseSource;
use crate::readings::{Environment, OperatingMode, PumpEnvironment};

const STOP_DEMAND: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpParams {
    pub min_speed_pct: f64,
    pub ramp_rate_pct_per_s: f64,
    pub rated_flow_m3h: f64,
    pub rated_head_bar: f64,
    pub fluid_temp_c: f64,
}

impl Default for PumpParams {
    fn default() -> Self {
        Self {
            min_speed_pct: 30.0,
            ramp_rate_pct_per_s: 4.0,
            rated_flow_m3h: 120.0,
            rated_head_bar: 4.5,
            fluid_temp_c: 18.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpState {
    pub speed_pct: f64,
    pub fluid_temp_c: f64,
}

impl PhysicalModel for PumpParams {
    type State = PumpState;

    fn validate(&self) -> Result<()> {
        ensure_positive("ramp_rate_pct_per_s", self.ramp_rate_pct_per_s)?;
        ensure_positive("rated_flow_m3h", self.rated_flow_m3h)?;
        ensure_positive("rated_head_bar", self.rated_head_bar)?;
        if !(0.0..100.0).contains(&self.min_speed_pct) {
            return Err(SimError::config(format!(
                "min_speed_pct must be within [0, 100), got {}",
                self.min_speed_pct
            )));
        }
        Ok(())
    }

    fn initial_state(&self) -> PumpState {
        PumpState {
            speed_pct: 0.0,
            fluid_temp_c: self.fluid_temp_c,
        }
    }

    fn at_rest(&self, state: &PumpState) -> PumpState {
        PumpState {
            speed_pct: 0.0,
            fluid_temp_c: state.fluid_temp_c,
        }
    }

    fn advance(
        &self,
        state: &PumpState,
        input: &StepInput<'_>,
        noise: &mut NoiseSource,
    ) -> (PumpState, ModelOutput) {
        let dt = input.dt.max(0.0);
        let target = if input.demand < STOP_DEMAND {
            0.0
        } else {
            self.min_speed_pct + (100.0 - self.min_speed_pct) * input.demand
        };
        let speed = approach(state.speed_pct, target, self.ramp_rate_pct_per_s * dt)
            .clamp(0.0, 100.0);
        let n = speed / 100.0;
        let turning = speed > 0.0;

        let base_power = if turning {
            input.rated_power_kw * (0.05 + 0.95 * n.powi(3))
        } else {
            0.0
        };
        let power_kw = input.jitter(noise, base_power * input.power_multiplier());

        let flow_factor = match input.anomaly_kind() {
            Some(AnomalyKind::Cavitation) => 0.8,
            Some(AnomalyKind::Clogging) => 0.7,
            _ => 1.0,
        };
        let head_factor = if input.has_anomaly(AnomalyKind::ImpellerWear) {
            0.9
        } else {
            1.0
        };
        let vibration_factor = if input.has_anomaly(AnomalyKind::Cavitation) {
            3.0
        } else {
            1.0
        };
        let flow = self.rated_flow_m3h * n * flow_factor;
        let head = self.rated_head_bar * n * n * head_factor;
        let vibration = if turning {
            (1.0 + 2.5 * n) * vibration_factor
        } else {
            0.0
        };
        let fluid_temp = relax(
            state.fluid_temp_c,
            self.fluid_temp_c + 5.0 * n,
            dt,
            1800.0,
        );

        let environment = Environment::Pump(PumpEnvironment {
            flow_rate_m3h: input.jitter(noise, flow),
            discharge_pressure_bar: input.jitter(noise, head),
            vibration_mm_s: input.jitter(noise, vibration),
            fluid_temp_c: input.jitter(noise, fluid_temp),
        });
        let output = ModelOutput {
            power_kw,
            produced_units: 0.0,
            scrap_ratio: 0.0,
            throughput_per_hour: input.jitter(noise, flow),
            speed_percent: speed,
            mode: if speed > 1.0 {
                OperatingMode::Running
            } else {
                OperatingMode::Idle
            },
            power_factor: 0.80 + 0.08 * n,
            environment,
        };
        (
            PumpState {
                speed_pct: speed,
                fluid_temp_c: fluid_temp,
            },
            output,
        )
    }

    fn environment_at_rest(&self, state: &PumpState) -> Environment {
        Environment::Pump(PumpEnvironment {
            flow_rate_m3h: 0.0,
            discharge_pressure_bar: 0.0,
            vibration_mm_s: 0.0,
            fluid_temp_c: state.fluid_temp_c,
        })
    }
}
