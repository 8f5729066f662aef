//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "models"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Physical model contract and archetype dispatch."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! Each archetype is a parameter struct implementing [`PhysicalModel`] with
//! its own continuous state type. Models are pure: the caller passes the
//! previous state in and receives the next state back, and all randomness is
//! drawn from the supplied [`NoiseSource`].

pub mod boiler;
pub mod compressor;
pub mod hvac;
pub mod injection_molder;
pub mod motor;
pub mod pump;

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::{AnomalyKind, AnomalyState};
use crate::error::{Result, SimError};
use crate::noise::NoiseSource;
use crate::readings::{Environment, OperatingMode};
use crate::spec::{Archetype, MachineModel};

use self::boiler::BoilerState;
use self::compressor::CompressorState;
use self::hvac::HvacState;
use self::injection_molder::InjectionMolderState;
use self::motor::MotorState;
use self::pump::PumpState;

/// Inputs for one model step.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub now: DateTime<Utc>,
    /// Elapsed simulated seconds since the previous step.
    pub dt: f64,
    /// Shift demand factor in `[0, 1]`.
    pub demand: f64,
    pub anomaly: Option<&'a AnomalyState>,
    pub rated_power_kw: f64,
    pub noise_pct: f64,
}

impl StepInput<'_> {
    /// Kind of the anomaly currently affecting the step, if any.
    pub fn anomaly_kind(&self) -> Option<AnomalyKind> {
        self.anomaly.map(|anomaly| anomaly.kind)
    }

    pub fn has_anomaly(&self, kind: AnomalyKind) -> bool {
        self.anomaly_kind() == Some(kind)
    }

    /// Magnitude of the active anomaly when it is of `kind`.
    pub fn magnitude_of(&self, kind: AnomalyKind) -> Option<f64> {
        self.anomaly
            .filter(|anomaly| anomaly.kind == kind)
            .map(|anomaly| anomaly.magnitude)
    }

    pub fn power_multiplier(&self) -> f64 {
        self.anomaly.map_or(1.0, AnomalyState::power_multiplier)
    }

    pub fn jitter(&self, noise: &mut NoiseSource, value: f64) -> f64 {
        noise.jitter(value, self.noise_pct)
    }
}

/// What one step produced, before device-level clamping and bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub power_kw: f64,
    /// Units completed during the step; fractional values are carried.
    pub produced_units: f64,
    /// Probability that a produced unit is scrap.
    pub scrap_ratio: f64,
    pub throughput_per_hour: f64,
    pub speed_percent: f64,
    pub mode: OperatingMode,
    pub power_factor: f64,
    pub environment: Environment,
}

/// Contract implemented by every machine archetype.
pub trait PhysicalModel {
    type State: Clone + Debug + PartialEq;

    fn validate(&self) -> Result<()>;

    fn initial_state(&self) -> Self::State;

    /// State after the machine is switched off.
    fn at_rest(&self, state: &Self::State) -> Self::State;

    fn advance(
        &self,
        state: &Self::State,
        input: &StepInput<'_>,
        noise: &mut NoiseSource,
    ) -> (Self::State, ModelOutput);

    /// Environmental fields reported while the machine is offline.
    fn environment_at_rest(&self, state: &Self::State) -> Environment;
}

/// Continuous state of any archetype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "archetype", rename_all = "snake_case")]
pub enum ModelState {
    Compressor(CompressorState),
    Motor(MotorState),
    Hvac(HvacState),
    Pump(PumpState),
    InjectionMolder(InjectionMolderState),
    Boiler(BoilerState),
}

impl ModelState {
    pub fn archetype(&self) -> Archetype {
        match self {
            ModelState::Compressor(_) => Archetype::Compressor,
            ModelState::Motor(_) => Archetype::Motor,
            ModelState::Hvac(_) => Archetype::Hvac,
            ModelState::Pump(_) => Archetype::Pump,
            ModelState::InjectionMolder(_) => Archetype::InjectionMolder,
            ModelState::Boiler(_) => Archetype::Boiler,
        }
    }
}

/// Expands `$body` once per archetype with `$params` and `$state` bound to
/// the matching parameter and state values.
macro_rules! with_matching_state {
    ($model:expr, $state:expr, |$params:ident, $st:ident, $wrap:ident| $body:expr) => {
        match ($model, $state) {
            (MachineModel::Compressor($params), ModelState::Compressor($st)) => {
                let $wrap = ModelState::Compressor;
                Ok($body)
            }
            (MachineModel::Motor($params), ModelState::Motor($st)) => {
                let $wrap = ModelState::Motor;
                Ok($body)
            }
            (MachineModel::Hvac($params), ModelState::Hvac($st)) => {
                let $wrap = ModelState::Hvac;
                Ok($body)
            }
            (MachineModel::Pump($params), ModelState::Pump($st)) => {
                let $wrap = ModelState::Pump;
                Ok($body)
            }
            (MachineModel::InjectionMolder($params), ModelState::InjectionMolder($st)) => {
                let $wrap = ModelState::InjectionMolder;
                Ok($body)
            }
            (MachineModel::Boiler($params), ModelState::Boiler($st)) => {
                let $wrap = ModelState::Boiler;
                Ok($body)
            }
            (model, state) => Err(SimError::ArchetypeMismatch {
                expected: model.archetype(),
                found: state.archetype(),
            }),
        }
    };
}

impl MachineModel {
    pub fn validate(&self) -> Result<()> {
        match self {
            MachineModel::Compressor(params) => params.validate(),
            MachineModel::Motor(params) => params.validate(),
            MachineModel::Hvac(params) => params.validate(),
            MachineModel::Pump(params) => params.validate(),
            MachineModel::InjectionMolder(params) => params.validate(),
            MachineModel::Boiler(params) => params.validate(),
        }
    }

    pub fn initial_state(&self) -> ModelState {
        match self {
            MachineModel::Compressor(params) => ModelState::Compressor(params.initial_state()),
            MachineModel::Motor(params) => ModelState::Motor(params.initial_state()),
            MachineModel::Hvac(params) => ModelState::Hvac(params.initial_state()),
            MachineModel::Pump(params) => ModelState::Pump(params.initial_state()),
            MachineModel::InjectionMolder(params) => {
                ModelState::InjectionMolder(params.initial_state())
            }
            MachineModel::Boiler(params) => ModelState::Boiler(params.initial_state()),
        }
    }

    pub fn at_rest(&self, state: &ModelState) -> Result<ModelState> {
        with_matching_state!(self, state, |params, st, wrap| wrap(params.at_rest(st)))
    }

    pub fn advance(
        &self,
        state: &ModelState,
        input: &StepInput<'_>,
        noise: &mut NoiseSource,
    ) -> Result<(ModelState, ModelOutput)> {
        with_matching_state!(self, state, |params, st, wrap| {
            let (next, output) = params.advance(st, input, noise);
            (wrap(next), output)
        })
    }

    pub fn environment_at_rest(&self, state: &ModelState) -> Result<Environment> {
        with_matching_state!(self, state, |params, st, _wrap| params
            .environment_at_rest(st))
    }
}

/// Move `current` toward `target` by at most `max_step`.
pub(crate) fn approach(current: f64, target: f64, max_step: f64) -> f64 {
    let step = max_step.max(0.0);
    if (target - current).abs() <= step {
        target
    } else if target > current {
        current + step
    } else {
        current - step
    }
}

/// First-order lag toward `target` with time constant `tau` seconds.
pub(crate) fn relax(current: f64, target: f64, dt: f64, tau: f64) -> f64 {
    if tau <= 0.0 {
        return target;
    }
    current + (target - current) * (1.0 - (-dt.max(0.0) / tau).exp())
}

pub(crate) fn ensure_positive(label: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimError::config(format!("{label} must be positive, got {value}")))
    }
}

pub(crate) fn ensure_fraction(label: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimError::config(format!(
            "{label} must be within [0, 1], got {value}"
        )))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::TimeZone;

    use super::*;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap()
    }

    pub fn step(demand: f64, anomaly: Option<&AnomalyState>) -> StepInput<'_> {
        StepInput {
            now: t0(),
            dt: 1.0,
            demand,
            anomaly,
            rated_power_kw: 100.0,
            noise_pct: 0.0,
        }
    }

    pub fn anomaly(kind: AnomalyKind, magnitude: f64) -> AnomalyState {
        AnomalyState {
            kind,
            magnitude,
            activated_at: t0(),
            duration: std::time::Duration::from_secs(3600),
            origin: crate::anomaly::AnomalyOrigin::Injected,
        }
    }

    /// Advance `steps` times with the same input, returning the final state and
    /// the last output.
    pub fn run<M: PhysicalModel>(
        model: &M,
        input: &StepInput<'_>,
        steps: usize,
    ) -> (M::State, ModelOutput) {
        let mut noise = NoiseSource::seeded(1);
        let mut state = model.initial_state();
        let mut last = None;
        for _ in 0..steps {
            let (next, output) = model.advance(&state, input, &mut noise);
            state = next;
            last = Some(output);
        }
        (state, last.expect("at least one step"))
    }
}
