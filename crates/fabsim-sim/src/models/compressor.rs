//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "models"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Air compressor with load/unload hysteresis control."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! Receiver pressure is built while the compressor is loaded and drawn down by
//! plant air demand at all times:
//!
//! ```text
//! dp/dt = build_rate · [loaded] − consumption_rate · flow / max_flow
//! ```
//!
//! The controller unloads once pressure rises above `unload_pressure_bar` and
//! loads again once it falls below `load_pressure_bar`. Pressure is clamped to
//! `[min_pressure_bar, max_pressure_bar]`.
//!
//! Demanded flow approaches `max_flow · (base + (1 − base) · demand)` at
//! `flow_response_per_s` of max flow per second.
//!
//! Power: loaded `rated · (0.70 + 0.25 · flow/max_flow)`, unloaded
//! `rated · U(0.20, 0.30)`. A `leak` lowers the *reported* pressure by 10 %
//! (still clamped); the controller keeps acting on receiver pressure.
use serde::{Deserialize, Serialize};

use super::{approach, ensure_fraction, ensure_positive, ModelOutput, PhysicalModel, StepInput};
use crate::anomaly::AnomalyKind;
use crate::error::{Result, SimError};
use crate::noise::NoiseSource;
use crate::readings::{CompressorEnvironment, Environment, OperatingMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorParams {
    pub max_flow_m3h: f64,
    pub min_pressure_bar: f64,
    pub max_pressure_bar: f64,
    pub load_pressure_bar: f64,
    pub unload_pressure_bar: f64,
    pub build_rate_bar_per_s: f64,
    /// Pressure drop per second at maximum flow.
    pub consumption_rate_bar_per_s: f64,
    pub flow_response_per_s: f64,
    pub base_flow_fraction: f64,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            max_flow_m3h: 400.0,
            min_pressure_bar: 6.0,
            max_pressure_bar: 8.0,
            load_pressure_bar: 6.5,
            unload_pressure_bar: 7.5,
            build_rate_bar_per_s: 0.06,
            consumption_rate_bar_per_s: 0.04,
            flow_response_per_s: 0.05,
            base_flow_fraction: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressorState {
    pub pressure_bar: f64,
    pub loaded: bool,
    pub flow_m3h: f64,
}

impl CompressorParams {
    fn clamp_pressure(&self, pressure: f64) -> f64 {
        pressure.clamp(self.min_pressure_bar, self.max_pressure_bar)
    }

    fn environment(&self, pressure: f64, flow: f64, vibration: f64, discharge: f64) -> Environment {
        Environment::Compressor(CompressorEnvironment {
            pressure_bar: self.clamp_pressure(pressure),
            flow_rate_m3h: flow.max(0.0),
            vibration_mm_s: vibration.max(0.0),
            discharge_temp_c: discharge,
        })
    }
}

impl PhysicalModel for CompressorParams {
    type State = CompressorState;

    fn validate(&self) -> Result<()> {
        ensure_positive("max_flow_m3h", self.max_flow_m3h)?;
        ensure_positive("build_rate_bar_per_s", self.build_rate_bar_per_s)?;
        ensure_positive("consumption_rate_bar_per_s", self.consumption_rate_bar_per_s)?;
        ensure_positive("flow_response_per_s", self.flow_response_per_s)?;
        ensure_fraction("base_flow_fraction", self.base_flow_fraction)?;
        let ordered = self.min_pressure_bar >= 0.0
            && self.min_pressure_bar < self.load_pressure_bar
            && self.load_pressure_bar < self.unload_pressure_bar
            && self.unload_pressure_bar < self.max_pressure_bar;
        if !ordered {
            return Err(SimError::config(
                "compressor pressures must satisfy min < load < unload < max",
            ));
        }
        if self.build_rate_bar_per_s <= self.consumption_rate_bar_per_s {
            return Err(SimError::config(
                "compressor build rate must exceed consumption at full flow",
            ));
        }
        Ok(())
    }

    fn initial_state(&self) -> CompressorState {
        CompressorState {
            pressure_bar: (self.load_pressure_bar + self.unload_pressure_bar) / 2.0,
            loaded: true,
            flow_m3h: self.max_flow_m3h * self.base_flow_fraction,
        }
    }

    fn at_rest(&self, state: &CompressorState) -> CompressorState {
        CompressorState {
            pressure_bar: state.pressure_bar,
            loaded: false,
            flow_m3h: 0.0,
        }
    }

    fn advance(
        &self,
        state: &CompressorState,
        input: &StepInput<'_>,
        noise: &mut NoiseSource,
    ) -> (CompressorState, ModelOutput) {
        let dt = input.dt.max(0.0);
        let target_flow = self.max_flow_m3h
            * (self.base_flow_fraction + (1.0 - self.base_flow_fraction) * input.demand);
        let flow = approach(
            state.flow_m3h,
            target_flow,
            self.flow_response_per_s * self.max_flow_m3h * dt,
        );
        let flow_fraction = (flow / self.max_flow_m3h).clamp(0.0, 1.0);

        let build = if state.loaded {
            self.build_rate_bar_per_s * dt
        } else {
            0.0
        };
        let consumption = self.consumption_rate_bar_per_s * flow_fraction * dt;
        let pressure = self.clamp_pressure(state.pressure_bar + build - consumption);

        let loaded = if state.loaded && pressure > self.unload_pressure_bar {
            false
        } else if !state.loaded && pressure < self.load_pressure_bar {
            true
        } else {
            state.loaded
        };

        // Power reflects the mode the machine spent the step in.
        let base_power = if state.loaded {
            input.rated_power_kw * (0.70 + 0.25 * flow_fraction)
        } else {
            input.rated_power_kw * noise.uniform(0.20, 0.30)
        };
        let power_kw = input.jitter(noise, base_power * input.power_multiplier());

        let leak_factor = if input.has_anomaly(AnomalyKind::Leak) {
            0.9
        } else {
            1.0
        };
        let reported_pressure = input.jitter(noise, pressure * leak_factor);
        let reported_flow = input.jitter(noise, flow);
        let vibration = input.jitter(noise, if state.loaded { 2.8 } else { 1.2 });
        let discharge = input.jitter(
            noise,
            if state.loaded {
                75.0 + 10.0 * flow_fraction
            } else {
                55.0
            },
        );

        let (mode, speed_percent, power_factor) = if state.loaded {
            (OperatingMode::Running, 100.0, 0.88)
        } else {
            (OperatingMode::Idle, 30.0, 0.70)
        };

        let next = CompressorState {
            pressure_bar: pressure,
            loaded,
            flow_m3h: flow,
        };
        let output = ModelOutput {
            power_kw,
            produced_units: 0.0,
            scrap_ratio: 0.0,
            throughput_per_hour: reported_flow,
            speed_percent,
            mode,
            power_factor,
            environment: self.environment(reported_pressure, reported_flow, vibration, discharge),
        };
        (next, output)
    }

    fn environment_at_rest(&self, state: &CompressorState) -> Environment {
        self.environment(state.pressure_bar, 0.0, 0.0, 25.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{anomaly, run, step};

    fn pressure_of(environment: &Environment) -> f64 {
        match environment {
            Environment::Compressor(env) => env.pressure_bar,
            other => panic!("unexpected environment {other:?}"),
        }
    }

    #[test]
    fn hysteresis_keeps_pressure_inside_band() {
        let params = CompressorParams::default();
        let mut noise = NoiseSource::seeded(5);
        let mut state = params.initial_state();
        let mut switched = 0;
        for tick in 0..5_000 {
            let demand = if (tick / 500) % 2 == 0 { 1.0 } else { 0.05 };
            let mut input = step(demand, None);
            input.noise_pct = 0.03;
            let (next, output) = params.advance(&state, &input, &mut noise);
            if next.loaded != state.loaded {
                switched += 1;
            }
            assert!((6.0..=8.0).contains(&next.pressure_bar));
            assert!((6.0..=8.0).contains(&pressure_of(&output.environment)));
            state = next;
        }
        assert!(switched > 10, "controller should cycle, switched {switched}");
    }

    #[test]
    fn unloads_above_threshold_and_reloads_below() {
        let params = CompressorParams::default();
        let mut noise = NoiseSource::seeded(2);
        let input = step(0.5, None);
        let (next, _) = params.advance(
            &CompressorState {
                pressure_bar: 7.49,
                loaded: true,
                flow_m3h: 200.0,
            },
            &input,
            &mut noise,
        );
        assert!(!next.loaded);

        let (next, _) = params.advance(
            &CompressorState {
                pressure_bar: 6.51,
                loaded: false,
                flow_m3h: 200.0,
            },
            &input,
            &mut noise,
        );
        assert!(next.loaded);
    }

    #[test]
    fn loaded_power_tracks_flow() {
        let params = CompressorParams::default();
        let mut noise = NoiseSource::seeded(3);
        let input = step(1.0, None);
        let (_, output) = params.advance(
            &CompressorState {
                pressure_bar: 7.0,
                loaded: true,
                flow_m3h: 400.0,
            },
            &input,
            &mut noise,
        );
        assert!((output.power_kw - 95.0).abs() < 1e-9);
        assert_eq!(output.mode, OperatingMode::Running);
    }

    #[test]
    fn unloaded_power_is_a_fraction_of_rated() {
        let params = CompressorParams::default();
        let input = step(0.05, None);
        let mut noise = NoiseSource::seeded(8);
        for _ in 0..100 {
            let (_, output) = params.advance(
                &CompressorState {
                    pressure_bar: 7.0,
                    loaded: false,
                    flow_m3h: 80.0,
                },
                &input,
                &mut noise,
            );
            assert!((20.0..=30.0).contains(&output.power_kw));
            assert_eq!(output.mode, OperatingMode::Idle);
        }
    }

    #[test]
    fn leak_raises_power_and_lowers_reported_pressure() {
        let params = CompressorParams::default();
        let leak = anomaly(AnomalyKind::Leak, 1.0);
        let state = CompressorState {
            pressure_bar: 7.2,
            loaded: true,
            flow_m3h: 400.0,
        };
        let mut noise = NoiseSource::seeded(1);
        let (_, healthy) = params.advance(&state, &step(1.0, None), &mut noise);
        let (_, leaking) = params.advance(&state, &step(1.0, Some(&leak)), &mut noise);
        assert!((leaking.power_kw / healthy.power_kw - 1.3).abs() < 1e-9);
        assert!(pressure_of(&leaking.environment) < pressure_of(&healthy.environment));
        assert!(pressure_of(&leaking.environment) >= params.min_pressure_bar);
    }

    #[test]
    fn flow_follows_demand_at_bounded_rate() {
        let params = CompressorParams::default();
        let (state, _) = run(&params, &step(1.0, None), 5);
        // 5 s at 20 m3/h per second from the 60 m3/h base.
        assert!((state.flow_m3h - 160.0).abs() < 1e-9);
    }

    #[test]
    fn validation_rejects_inverted_thresholds() {
        let params = CompressorParams {
            load_pressure_bar: 7.6,
            ..CompressorParams::default()
        };
        assert!(params.validate().is_err());
        assert!(CompressorParams::default().validate().is_ok());
    }
}
