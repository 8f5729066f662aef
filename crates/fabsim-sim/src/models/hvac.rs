//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "models"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "HVAC unit driven by outdoor temperature and occupancy."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! Outdoor temperature follows a diurnal sine peaking at 15:00 UTC. The
//! thermal load fraction blends outdoor temperature (60 %) and occupancy
//! demand (40 %):
//!
//! ```text
//! outdoor   = mean + swing · sin(2π (hour − 9) / 24)
//! load      = clamp(0.6 · ((outdoor − setpoint)/design_delta + 0.5) + 0.4 · demand, 0.05, 1)
//! power     = rated · (0.15 + 0.85 · capacity^1.5)
//! ```
//!
//! Capacity chases `load / effectiveness` at `capacity_ramp_per_s`; a
//! refrigerant leak drops effectiveness to 0.8 so the unit works harder for
//! the same cooling. Zone temperature relaxes toward `setpoint + 6 · deficit`.
use std::f64::consts::PI;

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use super::{approach, ensure_positive, relax, ModelOutput, PhysicalModel, StepInput};
use crate::anomaly::AnomalyKind;
use crate::error::Result;
use crate::noise::NoiseSource;
use crate::readings::{Environment, HvacEnvironment, OperatingMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HvacParams {
    pub setpoint_c: f64,
    pub outdoor_mean_c: f64,
    pub outdoor_swing_c: f64,
    pub design_delta_c: f64,
    pub capacity_ramp_per_s: f64,
    pub zone_tau_s: f64,
    pub nominal_airflow_m3h: f64,
    pub base_humidity_pct: f64,
}

impl Default for HvacParams {
    fn default() -> Self {
        Self {
            setpoint_c: 22.0,
            outdoor_mean_c: 18.0,
            outdoor_swing_c: 8.0,
            design_delta_c: 15.0,
            capacity_ramp_per_s: 0.01,
            zone_tau_s: 900.0,
            nominal_airflow_m3h: 12_000.0,
            base_humidity_pct: 45.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HvacState {
    /// Compressor capacity fraction in `[0, 1]`.
    pub capacity: f64,
    pub zone_temp_c: f64,
}

impl HvacParams {
    pub fn outdoor_temp(&self, hour: f64) -> f64 {
        self.outdoor_mean_c + self.outdoor_swing_c * (2.0 * PI * (hour - 9.0) / 24.0).sin()
    }

    pub fn load_fraction(&self, outdoor: f64, demand: f64) -> f64 {
        let weather = (outdoor - self.setpoint_c) / self.design_delta_c + 0.5;
        (0.6 * weather + 0.4 * demand).clamp(0.05, 1.0)
    }
}

impl PhysicalModel for HvacParams {
    type State = HvacState;

    fn validate(&self) -> Result<()> {
        ensure_positive("design_delta_c", self.design_delta_c)?;
        ensure_positive("capacity_ramp_per_s", self.capacity_ramp_per_s)?;
        ensure_positive("zone_tau_s", self.zone_tau_s)?;
        ensure_positive("nominal_airflow_m3h", self.nominal_airflow_m3h)?;
        Ok(())
    }

    fn initial_state(&self) -> HvacState {
        HvacState {
            capacity: 0.0,
            zone_temp_c: self.setpoint_c,
        }
    }

    fn at_rest(&self, state: &HvacState) -> HvacState {
        HvacState {
            capacity: 0.0,
            zone_temp_c: state.zone_temp_c,
        }
    }

    fn advance(
        &self,
        state: &HvacState,
        input: &StepInput<'_>,
        noise: &mut NoiseSource,
    ) -> (HvacState, ModelOutput) {
        let dt = input.dt.max(0.0);
        let now = input.now;
        let hour = f64::from(now.hour()) + f64::from(now.minute()) / 60.0;
        let outdoor = self.outdoor_temp(hour);
        let load = self.load_fraction(outdoor, input.demand);

        let effectiveness = if input.has_anomaly(AnomalyKind::RefrigerantLeak) {
            0.8
        } else {
            1.0
        };
        let target = (load / effectiveness).min(1.0);
        let capacity = approach(state.capacity, target, self.capacity_ramp_per_s * dt)
            .clamp(0.0, 1.0);
        let deficit = (load - capacity * effectiveness).max(0.0);
        let zone = relax(
            state.zone_temp_c,
            self.setpoint_c + 6.0 * deficit,
            dt,
            self.zone_tau_s,
        );

        let base_power = input.rated_power_kw * (0.15 + 0.85 * capacity.powf(1.5));
        let power_kw = input.jitter(noise, base_power * input.power_multiplier());

        let clog = if input.has_anomaly(AnomalyKind::FilterClog) {
            0.7
        } else {
            1.0
        };
        let airflow = self.nominal_airflow_m3h * (0.4 + 0.6 * capacity) * clog;
        let humidity = (self.base_humidity_pct + 10.0 * (1.0 - capacity)).clamp(0.0, 100.0);

        let environment = Environment::Hvac(HvacEnvironment {
            zone_temp_c: input.jitter(noise, zone),
            outdoor_temp_c: input.jitter(noise, outdoor),
            humidity_pct: input.jitter(noise, humidity).clamp(0.0, 100.0),
            airflow_m3h: input.jitter(noise, airflow),
        });
        let output = ModelOutput {
            power_kw,
            produced_units: 0.0,
            scrap_ratio: 0.0,
            throughput_per_hour: 0.0,
            speed_percent: capacity * 100.0,
            mode: OperatingMode::Running,
            power_factor: 0.85 + 0.1 * capacity,
            environment,
        };
        (
            HvacState {
                capacity,
                zone_temp_c: zone,
            },
            output,
        )
    }

    fn environment_at_rest(&self, state: &HvacState) -> Environment {
        Environment::Hvac(HvacEnvironment {
            zone_temp_c: state.zone_temp_c,
            outdoor_temp_c: self.outdoor_mean_c,
            humidity_pct: self.base_humidity_pct,
            airflow_m3h: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{anomaly, run, step};

    #[test]
    fn outdoor_temperature_peaks_mid_afternoon() {
        let params = HvacParams::default();
        assert!((params.outdoor_temp(15.0) - 26.0).abs() < 1e-9);
        assert!((params.outdoor_temp(3.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn load_fraction_is_bounded() {
        let params = HvacParams::default();
        assert_eq!(params.load_fraction(-40.0, 0.0), 0.05);
        assert_eq!(params.load_fraction(60.0, 1.0), 1.0);
    }

    #[test]
    fn capacity_ramps_toward_load() {
        let params = HvacParams::default();
        let (state, output) = run(&params, &step(1.0, None), 10);
        assert!((state.capacity - 0.1).abs() < 1e-9);
        let expected = 100.0 * (0.15 + 0.85 * 0.1_f64.powf(1.5));
        assert!((output.power_kw - expected).abs() < 1e-9);
    }

    #[test]
    fn refrigerant_leak_demands_more_capacity() {
        let params = HvacParams::default();
        let leak = anomaly(AnomalyKind::RefrigerantLeak, 1.0);
        let (healthy, _) = run(&params, &step(0.5, None), 600);
        let (leaking, _) = run(&params, &step(0.5, Some(&leak)), 600);
        assert!(leaking.capacity > healthy.capacity);
    }

    #[test]
    fn filter_clog_reduces_airflow() {
        let params = HvacParams::default();
        let clog = anomaly(AnomalyKind::FilterClog, 1.0);
        let (_, healthy) = run(&params, &step(0.5, None), 100);
        let (_, clogged) = run(&params, &step(0.5, Some(&clog)), 100);
        let airflow = |env: &Environment| match env {
            Environment::Hvac(hvac) => hvac.airflow_m3h,
            other => panic!("unexpected {other:?}"),
        };
        assert!((airflow(&clogged.environment) / airflow(&healthy.environment) - 0.7).abs() < 1e-9);
        assert!((clogged.power_kw / healthy.power_kw - 1.1).abs() < 1e-9);
    }
}
