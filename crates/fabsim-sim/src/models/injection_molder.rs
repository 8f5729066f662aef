//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "models"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Injection molding machine with barrel heating and cycle phases."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! The barrel heats toward `barrel_setpoint_c` at `heating_rate_c_per_s`.
//! The machine cycles while demand is at least 10 % and the barrel is within
//! 10 °C of setpoint; each completed cycle yields `cavities` parts.
//!
//! Power while producing is `rated · (0.30 + 0.60 · phase)` where `phase` is
//! the hydraulic share of the current cycle phase:
//!
//! | phase     | share of cycle | hydraulic load |
//! |-----------|----------------|----------------|
//! | injection | 0.15           | 1.0            |
//! | holding   | 0.25           | 0.6            |
//! | cooling   | 0.45           | 0.2            |
//! | ejection  | 0.15           | 0.4            |
//!
//! Steps at least one cycle long use the cycle-averaged load. Heating up
//! draws 45 % of rated, idling at temperature 20 %.
use serde::{Deserialize, Serialize};

use super::{approach, ensure_fraction, ensure_positive, ModelOutput, PhysicalModel, StepInput};
use crate::anomaly::AnomalyKind;
use crate::error::{Result, SimError};
use crate::noise::NoiseSource;
use crate::readings::{Environment, InjectionMolderEnvironment, OperatingMode};

const READY_BAND_C: f64 = 10.0;
const STOP_DEMAND: f64 = 0.1;

/// `(share of cycle, hydraulic load)` for injection, holding, cooling, ejection.
const PHASES: [(f64, f64); 4] = [(0.15, 1.0), (0.25, 0.6), (0.45, 0.2), (0.15, 0.4)];

fn phase_load(position: f64) -> f64 {
    let mut start = 0.0;
    for (share, load) in PHASES {
        if position < start + share {
            return load;
        }
        start += share;
    }
    PHASES[PHASES.len() - 1].1
}

fn mean_phase_load() -> f64 {
    PHASES.iter().map(|(share, load)| share * load).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionMolderParams {
    pub barrel_setpoint_c: f64,
    pub ambient_temp_c: f64,
    pub heating_rate_c_per_s: f64,
    pub cycle_time_s: f64,
    pub cavities: u32,
    pub base_scrap_rate: f64,
    pub mold_temp_c: f64,
    pub hydraulic_pressure_bar: f64,
}

impl Default for InjectionMolderParams {
    fn default() -> Self {
        Self {
            barrel_setpoint_c: 230.0,
            ambient_temp_c: 25.0,
            heating_rate_c_per_s: 0.8,
            cycle_time_s: 30.0,
            cavities: 4,
            base_scrap_rate: 0.02,
            mold_temp_c: 45.0,
            hydraulic_pressure_bar: 140.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionMolderState {
    pub barrel_temp_c: f64,
    /// Seconds into the current cycle.
    pub cycle_position_s: f64,
    pub cycles_completed: u64,
}

impl PhysicalModel for InjectionMolderParams {
    type State = InjectionMolderState;

    fn validate(&self) -> Result<()> {
        ensure_positive("barrel_setpoint_c", self.barrel_setpoint_c)?;
        ensure_positive("heating_rate_c_per_s", self.heating_rate_c_per_s)?;
        ensure_positive("cycle_time_s", self.cycle_time_s)?;
        ensure_positive("hydraulic_pressure_bar", self.hydraulic_pressure_bar)?;
        ensure_fraction("base_scrap_rate", self.base_scrap_rate)?;
        if self.cavities == 0 {
            return Err(SimError::config("cavities must be at least 1"));
        }
        if self.ambient_temp_c >= self.barrel_setpoint_c {
            return Err(SimError::config(
                "barrel setpoint must be above ambient temperature",
            ));
        }
        Ok(())
    }

    fn initial_state(&self) -> InjectionMolderState {
        InjectionMolderState {
            barrel_temp_c: self.ambient_temp_c,
            cycle_position_s: 0.0,
            cycles_completed: 0,
        }
    }

    fn at_rest(&self, state: &InjectionMolderState) -> InjectionMolderState {
        InjectionMolderState {
            barrel_temp_c: state.barrel_temp_c,
            cycle_position_s: 0.0,
            cycles_completed: state.cycles_completed,
        }
    }

    fn advance(
        &self,
        state: &InjectionMolderState,
        input: &StepInput<'_>,
        noise: &mut NoiseSource,
    ) -> (InjectionMolderState, ModelOutput) {
        let dt = input.dt.max(0.0);
        let heater_failure = input.has_anomaly(AnomalyKind::HeaterFailure);
        let (barrel_target, heating_rate) = if heater_failure {
            (self.barrel_setpoint_c - 8.0, self.heating_rate_c_per_s * 0.3)
        } else {
            (self.barrel_setpoint_c, self.heating_rate_c_per_s)
        };
        let barrel = approach(state.barrel_temp_c, barrel_target, heating_rate * dt);
        let ready = (self.barrel_setpoint_c - barrel).abs() <= READY_BAND_C;
        let producing = ready && input.demand >= STOP_DEMAND;

        let (position, completed, phase) = if producing {
            let advanced = state.cycle_position_s + dt;
            let completed = (advanced / self.cycle_time_s).floor();
            let position = advanced - completed * self.cycle_time_s;
            let phase = if dt >= self.cycle_time_s {
                mean_phase_load()
            } else {
                phase_load(position / self.cycle_time_s)
            };
            (position, completed as u64, phase)
        } else {
            (0.0, 0, 0.0)
        };

        let base_power = if producing {
            input.rated_power_kw * (0.30 + 0.60 * phase)
        } else if !ready {
            input.rated_power_kw * 0.45
        } else {
            input.rated_power_kw * 0.20
        };
        let power_kw = input.jitter(noise, base_power * input.power_multiplier());

        let mut scrap = self.base_scrap_rate;
        if heater_failure {
            scrap *= 5.0;
        }
        if let Some(magnitude) = input.magnitude_of(AnomalyKind::MoldWear) {
            scrap *= magnitude;
        }

        let hydraulic_factor = if input.has_anomaly(AnomalyKind::HydraulicLeak) {
            0.85
        } else {
            1.0
        };
        let throughput = if producing {
            f64::from(self.cavities) * 3600.0 / self.cycle_time_s
        } else {
            0.0
        };
        let mold = if producing {
            self.mold_temp_c
        } else {
            self.ambient_temp_c + 0.5 * (self.mold_temp_c - self.ambient_temp_c)
        };
        let environment = Environment::InjectionMolder(InjectionMolderEnvironment {
            barrel_temp_c: input.jitter(noise, barrel),
            mold_temp_c: input.jitter(noise, mold),
            hydraulic_pressure_bar: input.jitter(
                noise,
                self.hydraulic_pressure_bar * phase * hydraulic_factor,
            ),
            cycle_time_s: if producing { self.cycle_time_s } else { 0.0 },
        });
        let output = ModelOutput {
            power_kw,
            produced_units: completed as f64 * f64::from(self.cavities),
            scrap_ratio: scrap.clamp(0.0, 1.0),
            throughput_per_hour: input.jitter(noise, throughput),
            speed_percent: if producing { 100.0 } else { 0.0 },
            mode: if producing {
                OperatingMode::Running
            } else {
                OperatingMode::Idle
            },
            power_factor: if producing { 0.86 } else { 0.95 },
            environment,
        };
        (
            InjectionMolderState {
                barrel_temp_c: barrel,
                cycle_position_s: position,
                cycles_completed: state.cycles_completed + completed,
            },
            output,
        )
    }

    fn environment_at_rest(&self, state: &InjectionMolderState) -> Environment {
        Environment::InjectionMolder(InjectionMolderEnvironment {
            barrel_temp_c: state.barrel_temp_c,
            mold_temp_c: self.ambient_temp_c,
            hydraulic_pressure_bar: 0.0,
            cycle_time_s: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{anomaly, run, step};

    fn hot_state() -> InjectionMolderState {
        InjectionMolderState {
            barrel_temp_c: 230.0,
            cycle_position_s: 0.0,
            cycles_completed: 0,
        }
    }

    #[test]
    fn heats_up_before_producing() {
        let params = InjectionMolderParams::default();
        let (state, output) = run(&params, &step(1.0, None), 60);
        assert!(state.barrel_temp_c < 220.0);
        assert_eq!(output.mode, OperatingMode::Idle);
        assert!((output.power_kw - 45.0).abs() < 1e-9);
        assert_eq!(state.cycles_completed, 0);
    }

    #[test]
    fn completes_cycles_once_at_temperature() {
        let params = InjectionMolderParams::default();
        let mut noise = NoiseSource::seeded(1);
        let input = step(1.0, None);
        let mut state = hot_state();
        let mut produced = 0.0;
        for _ in 0..300 {
            let (next, output) = params.advance(&state, &input, &mut noise);
            produced += output.produced_units;
            assert_eq!(output.mode, OperatingMode::Running);
            state = next;
        }
        assert_eq!(state.cycles_completed, 10);
        assert_eq!(produced, 40.0);
    }

    #[test]
    fn phase_profile_drives_power() {
        assert_eq!(phase_load(0.0), 1.0);
        assert_eq!(phase_load(0.2), 0.6);
        assert_eq!(phase_load(0.5), 0.2);
        assert_eq!(phase_load(0.95), 0.4);
        assert!((mean_phase_load() - 0.45).abs() < 1e-12);
    }

    #[test]
    fn long_steps_use_cycle_average() {
        let params = InjectionMolderParams::default();
        let mut noise = NoiseSource::seeded(1);
        let mut input = step(1.0, None);
        input.dt = 60.0;
        let (next, output) = params.advance(&hot_state(), &input, &mut noise);
        assert_eq!(next.cycles_completed, 2);
        assert!((output.power_kw - 100.0 * (0.30 + 0.60 * 0.45)).abs() < 1e-9);
    }

    #[test]
    fn heater_failure_slows_heating_and_raises_scrap() {
        let params = InjectionMolderParams::default();
        let failure = anomaly(AnomalyKind::HeaterFailure, 1.0);
        let (healthy, _) = run(&params, &step(1.0, None), 100);
        let (failing, output) = run(&params, &step(1.0, Some(&failure)), 100);
        assert!(failing.barrel_temp_c < healthy.barrel_temp_c);
        assert!((output.scrap_ratio - 0.10).abs() < 1e-12);
    }

    #[test]
    fn mold_wear_scales_scrap_by_magnitude() {
        let params = InjectionMolderParams::default();
        let wear = anomaly(AnomalyKind::MoldWear, 3.0);
        let mut noise = NoiseSource::seeded(1);
        let (_, output) = params.advance(&hot_state(), &step(1.0, Some(&wear)), &mut noise);
        assert!((output.scrap_ratio - 0.06).abs() < 1e-12);
    }

    #[test]
    fn idles_at_temperature_without_demand() {
        let params = InjectionMolderParams::default();
        let mut noise = NoiseSource::seeded(1);
        let (_, output) = params.advance(&hot_state(), &step(0.05, None), &mut noise);
        assert_eq!(output.mode, OperatingMode::Idle);
        assert!((output.power_kw - 20.0).abs() < 1e-9);
    }
}
