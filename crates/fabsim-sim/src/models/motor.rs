//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "models"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Conveyor drive motor with ramped speed and load-dependent efficiency."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! Speed ramps toward `demand · 100 %` (zero below 10 % demand) at
//! `ramp_rate_pct_per_s`. Belt load relaxes toward
//! `min_load + (max_load − min_load) · demand` with `load_tau_s`.
//!
//! ```text
//! power = rated · (speed/100)^2.5 · (load/100) / η(load) + standby
//! η = 0.85 (< 40 % load), 0.92 (40–70 %), 0.95 (≥ 70 %)
//! ```
//!
//! Winding temperature relaxes toward `ambient + temp_rise · power/rated`
//! with `thermal_tau_s`; bearing wear adds 8 °C and multiplies vibration by
//! 2.5, belt slip cuts throughput to 85 %.
use serde::{Deserialize, Serialize};

use super::{approach, ensure_fraction, ensure_positive, relax, ModelOutput, PhysicalModel, StepInput};
use crate::anomaly::AnomalyKind;
use crate::error::{Result, SimError};
use crate::noise::NoiseSource;
use crate::readings::{Environment, MotorEnvironment, OperatingMode};

const STANDBY_FRACTION: f64 = 0.01;
const STOP_DEMAND: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorParams {
    pub max_speed_rpm: f64,
    pub ramp_rate_pct_per_s: f64,
    pub min_load_pct: f64,
    pub max_load_pct: f64,
    pub load_tau_s: f64,
    pub ambient_temp_c: f64,
    pub temp_rise_c: f64,
    pub thermal_tau_s: f64,
    pub units_per_hour: f64,
    pub scrap_rate: f64,
}

impl Default for MotorParams {
    fn default() -> Self {
        Self {
            max_speed_rpm: 1450.0,
            ramp_rate_pct_per_s: 5.0,
            min_load_pct: 20.0,
            max_load_pct: 90.0,
            load_tau_s: 30.0,
            ambient_temp_c: 25.0,
            temp_rise_c: 45.0,
            thermal_tau_s: 600.0,
            units_per_hour: 1200.0,
            scrap_rate: 0.005,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorState {
    pub speed_pct: f64,
    pub load_pct: f64,
    pub temp_c: f64,
}

/// Motor efficiency as a function of load percent.
pub fn efficiency(load_pct: f64) -> f64 {
    if load_pct < 40.0 {
        0.85
    } else if load_pct < 70.0 {
        0.92
    } else {
        0.95
    }
}

impl PhysicalModel for MotorParams {
    type State = MotorState;

    fn validate(&self) -> Result<()> {
        ensure_positive("max_speed_rpm", self.max_speed_rpm)?;
        ensure_positive("ramp_rate_pct_per_s", self.ramp_rate_pct_per_s)?;
        ensure_positive("load_tau_s", self.load_tau_s)?;
        ensure_positive("thermal_tau_s", self.thermal_tau_s)?;
        ensure_fraction("scrap_rate", self.scrap_rate)?;
        if self.units_per_hour < 0.0 {
            return Err(SimError::config("units_per_hour must not be negative"));
        }
        if !(0.0 <= self.min_load_pct
            && self.min_load_pct <= self.max_load_pct
            && self.max_load_pct <= 100.0)
        {
            return Err(SimError::config(
                "motor load range must satisfy 0 <= min_load_pct <= max_load_pct <= 100",
            ));
        }
        Ok(())
    }

    fn initial_state(&self) -> MotorState {
        MotorState {
            speed_pct: 0.0,
            load_pct: 0.0,
            temp_c: self.ambient_temp_c,
        }
    }

    fn at_rest(&self, state: &MotorState) -> MotorState {
        MotorState {
            speed_pct: 0.0,
            load_pct: 0.0,
            temp_c: state.temp_c,
        }
    }

    fn advance(
        &self,
        state: &MotorState,
        input: &StepInput<'_>,
        noise: &mut NoiseSource,
    ) -> (MotorState, ModelOutput) {
        let dt = input.dt.max(0.0);
        let target_speed = if input.demand < STOP_DEMAND {
            0.0
        } else {
            input.demand * 100.0
        };
        let speed = approach(state.speed_pct, target_speed, self.ramp_rate_pct_per_s * dt)
            .clamp(0.0, 100.0);
        let target_load = if target_speed == 0.0 {
            0.0
        } else {
            self.min_load_pct + (self.max_load_pct - self.min_load_pct) * input.demand
        };
        let load = relax(state.load_pct, target_load, dt, self.load_tau_s).clamp(0.0, 100.0);

        let speed_frac = speed / 100.0;
        let shaft = speed_frac.powf(2.5) * (load / 100.0) / efficiency(load);
        let base_power = input.rated_power_kw * (shaft + STANDBY_FRACTION);
        let power_kw = input.jitter(noise, base_power * input.power_multiplier());

        let bearing = input.has_anomaly(AnomalyKind::BearingWear);
        let temp_target = self.ambient_temp_c
            + self.temp_rise_c * (power_kw / input.rated_power_kw).min(1.2)
            + if bearing { 8.0 } else { 0.0 };
        let temp = relax(state.temp_c, temp_target, dt, self.thermal_tau_s);

        let vibration = (0.5 + 2.0 * speed_frac) * if bearing { 2.5 } else { 1.0 };
        let slip = if input.has_anomaly(AnomalyKind::BeltSlip) {
            0.85
        } else {
            1.0
        };
        let throughput = self.units_per_hour * speed_frac * slip;
        let mode = if speed > 1.0 {
            OperatingMode::Running
        } else {
            OperatingMode::Idle
        };

        let environment = Environment::Motor(MotorEnvironment {
            machine_temp_c: input.jitter(noise, temp),
            vibration_mm_s: input.jitter(noise, vibration),
            speed_rpm: input.jitter(noise, self.max_speed_rpm * speed_frac),
        });
        let output = ModelOutput {
            power_kw,
            produced_units: throughput * dt / 3600.0,
            scrap_ratio: self.scrap_rate,
            throughput_per_hour: input.jitter(noise, throughput),
            speed_percent: speed,
            mode,
            power_factor: 0.75 + 0.13 * load / 100.0,
            environment,
        };
        (
            MotorState {
                speed_pct: speed,
                load_pct: load,
                temp_c: temp,
            },
            output,
        )
    }

    fn environment_at_rest(&self, state: &MotorState) -> Environment {
        Environment::Motor(MotorEnvironment {
            machine_temp_c: state.temp_c,
            vibration_mm_s: 0.0,
            speed_rpm: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{anomaly, run, step};

    #[test]
    fn efficiency_bands() {
        assert_eq!(efficiency(10.0), 0.85);
        assert_eq!(efficiency(40.0), 0.92);
        assert_eq!(efficiency(69.9), 0.92);
        assert_eq!(efficiency(70.0), 0.95);
    }

    #[test]
    fn speed_ramps_at_bounded_rate() {
        let params = MotorParams::default();
        let (state, output) = run(&params, &step(1.0, None), 4);
        assert!((state.speed_pct - 20.0).abs() < 1e-9);
        assert_eq!(output.mode, OperatingMode::Running);
        let (state, _) = run(&params, &step(1.0, None), 40);
        assert_eq!(state.speed_pct, 100.0);
    }

    #[test]
    fn low_demand_stops_the_belt() {
        let params = MotorParams::default();
        let (state, output) = run(&params, &step(0.05, None), 100);
        assert_eq!(state.speed_pct, 0.0);
        assert_eq!(output.mode, OperatingMode::Idle);
        assert!((output.power_kw - 1.0).abs() < 1e-9, "standby only");
    }

    #[test]
    fn bearing_wear_raises_power_and_vibration() {
        let params = MotorParams::default();
        let wear = anomaly(AnomalyKind::BearingWear, 1.0);
        let (_, healthy) = run(&params, &step(1.0, None), 200);
        let (_, worn) = run(&params, &step(1.0, Some(&wear)), 200);
        assert!((worn.power_kw / healthy.power_kw - 1.2).abs() < 1e-9);
        let vib = |env: &Environment| match env {
            Environment::Motor(motor) => motor.vibration_mm_s,
            other => panic!("unexpected {other:?}"),
        };
        assert!((vib(&worn.environment) / vib(&healthy.environment) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn belt_slip_cuts_throughput() {
        let params = MotorParams::default();
        let slip = anomaly(AnomalyKind::BeltSlip, 1.0);
        let (_, healthy) = run(&params, &step(1.0, None), 200);
        let (_, slipping) = run(&params, &step(1.0, Some(&slip)), 200);
        assert!((slipping.throughput_per_hour / healthy.throughput_per_hour - 0.85).abs() < 1e-9);
    }

    #[test]
    fn overload_scales_power_by_magnitude() {
        let params = MotorParams::default();
        let overload = anomaly(AnomalyKind::Overload, 1.4);
        let (_, healthy) = run(&params, &step(0.6, None), 200);
        let (_, loaded) = run(&params, &step(0.6, Some(&overload)), 200);
        assert!((loaded.power_kw / healthy.power_kw - 1.4).abs() < 1e-9);
    }
}
