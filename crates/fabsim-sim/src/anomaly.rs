//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Typed, time-bounded anomaly injection for devices."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! Anomalies are attached to a device's state and read by its physical
//! model. The injector never touches readings itself.
//!
//! Documented effects (power multiplier first, secondary effects after):
//!
//! | archetype        | kind               | power          | secondary                         |
//! |------------------|--------------------|----------------|-----------------------------------|
//! | compressor       | `leak`             | ×1.30          | reported pressure ×0.90           |
//! | compressor       | `efficiency_loss`  | × magnitude    |                                   |
//! | motor            | `bearing_wear`     | ×1.20          | vibration ×2.5, +8 °C             |
//! | motor            | `belt_slip`        | ×1.15          | throughput ×0.85                  |
//! | motor            | `overload`         | × magnitude    |                                   |
//! | hvac             | `refrigerant_leak` | ×1.25          | effective capacity ×0.80          |
//! | hvac             | `filter_clog`      | ×1.10          | airflow ×0.70                     |
//! | hvac             | `compressor_fault` | × magnitude    |                                   |
//! | pump             | `cavitation`       | ×1.15          | flow ×0.80, vibration ×3.0        |
//! | pump             | `impeller_wear`    | ×1.10          | head ×0.90                        |
//! | pump             | `clogging`         | × magnitude    | flow ×0.70                        |
//! | injection_molder | `heater_failure`   | ×0.85          | heating ×0.30, scrap ×5           |
//! | injection_molder | `hydraulic_leak`   | ×1.20          |                                   |
//! | injection_molder | `mold_wear`        | ×1.00          | scrap × magnitude                 |
//! | boiler           | `scaling`          | ×1.15          | efficiency −8 pp, flue +30 °C     |
//! | boiler           | `burner_fault`     | ×0.90          | firing capped at 50 %             |
//! | boiler           | `flue_leak`        | × magnitude    | efficiency −4 pp                  |
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use strum::{Display, EnumString};

use crate::error::{Result, SimError};
use crate::noise::NoiseSource;
use crate::spec::Archetype;

/// Every fault condition known to the simulator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnomalyKind {
    Leak,
    EfficiencyLoss,
    BearingWear,
    BeltSlip,
    Overload,
    RefrigerantLeak,
    FilterClog,
    CompressorFault,
    Cavitation,
    ImpellerWear,
    Clogging,
    HeaterFailure,
    HydraulicLeak,
    MoldWear,
    Scaling,
    BurnerFault,
    FlueLeak,
}

impl AnomalyKind {
    /// Whether the injected magnitude drives the effect. Fixed-effect kinds
    /// record the magnitude but apply their documented constant.
    pub fn uses_magnitude(self) -> bool {
        matches!(
            self,
            AnomalyKind::EfficiencyLoss
                | AnomalyKind::Overload
                | AnomalyKind::CompressorFault
                | AnomalyKind::Clogging
                | AnomalyKind::MoldWear
                | AnomalyKind::FlueLeak
        )
    }

    /// Magnitude used by the daily trigger.
    pub fn default_magnitude(self) -> f64 {
        match self {
            AnomalyKind::EfficiencyLoss => 1.15,
            AnomalyKind::Overload => 1.25,
            AnomalyKind::CompressorFault => 1.2,
            AnomalyKind::Clogging => 1.2,
            AnomalyKind::MoldWear => 3.0,
            AnomalyKind::FlueLeak => 1.1,
            _ => 1.0,
        }
    }

    pub fn power_multiplier(self, magnitude: f64) -> f64 {
        match self {
            AnomalyKind::Leak => 1.3,
            AnomalyKind::BearingWear => 1.2,
            AnomalyKind::BeltSlip => 1.15,
            AnomalyKind::RefrigerantLeak => 1.25,
            AnomalyKind::FilterClog => 1.1,
            AnomalyKind::Cavitation => 1.15,
            AnomalyKind::ImpellerWear => 1.1,
            AnomalyKind::HeaterFailure => 0.85,
            AnomalyKind::HydraulicLeak => 1.2,
            AnomalyKind::MoldWear => 1.0,
            AnomalyKind::Scaling => 1.15,
            AnomalyKind::BurnerFault => 0.9,
            AnomalyKind::EfficiencyLoss
            | AnomalyKind::Overload
            | AnomalyKind::CompressorFault
            | AnomalyKind::Clogging
            | AnomalyKind::FlueLeak => magnitude,
        }
    }
}

impl Archetype {
    /// Anomaly kinds a machine of this archetype can exhibit.
    pub fn anomaly_kinds(self) -> &'static [AnomalyKind] {
        match self {
            Archetype::Compressor => &[AnomalyKind::Leak, AnomalyKind::EfficiencyLoss],
            Archetype::Motor => &[
                AnomalyKind::BearingWear,
                AnomalyKind::BeltSlip,
                AnomalyKind::Overload,
            ],
            Archetype::Hvac => &[
                AnomalyKind::RefrigerantLeak,
                AnomalyKind::FilterClog,
                AnomalyKind::CompressorFault,
            ],
            Archetype::Pump => &[
                AnomalyKind::Cavitation,
                AnomalyKind::ImpellerWear,
                AnomalyKind::Clogging,
            ],
            Archetype::InjectionMolder => &[
                AnomalyKind::HeaterFailure,
                AnomalyKind::HydraulicLeak,
                AnomalyKind::MoldWear,
            ],
            Archetype::Boiler => &[
                AnomalyKind::Scaling,
                AnomalyKind::BurnerFault,
                AnomalyKind::FlueLeak,
            ],
        }
    }

    pub fn supports(self, kind: AnomalyKind) -> bool {
        self.anomaly_kinds().contains(&kind)
    }
}

/// How an anomaly came to be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyOrigin {
    Injected,
    Daily,
}

/// Active perturbation attached to one device.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyState {
    pub kind: AnomalyKind,
    pub magnitude: f64,
    pub activated_at: DateTime<Utc>,
    #[serde_as(as = "DurationSeconds<f64>")]
    pub duration: Duration,
    pub origin: AnomalyOrigin,
}

impl AnomalyState {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let span = chrono::Duration::from_std(self.duration)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        self.activated_at
            .checked_add_signed(span)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Active on `[activated_at, activated_at + duration)`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now >= self.activated_at && now < self.expires_at()
    }

    pub fn power_multiplier(&self) -> f64 {
        self.kind.power_multiplier(self.magnitude)
    }
}

/// True when the slot holds an anomaly that is active at `now`.
pub fn is_active(slot: &Option<AnomalyState>, now: DateTime<Utc>) -> bool {
    slot.as_ref().is_some_and(|anomaly| anomaly.is_active(now))
}

/// Drop the anomaly once `now ≥ activated_at + duration`; returns the expired
/// anomaly so the caller can log it. Calling it again is a no-op.
pub fn clear_if_expired(slot: &mut Option<AnomalyState>, now: DateTime<Utc>) -> Option<AnomalyState> {
    if slot.as_ref().is_some_and(|anomaly| now >= anomaly.expires_at()) {
        return slot.take();
    }
    None
}

fn default_daily_probability() -> f64 {
    0.0
}

fn default_min_duration() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_duration() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Configuration of the probabilistic daily anomaly trigger.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyPolicy {
    /// Chance that a device develops an anomaly on a given simulated day.
    #[serde(default = "default_daily_probability")]
    pub daily_probability: f64,
    #[serde(default = "default_min_duration", rename = "min_duration_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub min_duration: Duration,
    #[serde(default = "default_max_duration", rename = "max_duration_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_duration: Duration,
}

impl Default for AnomalyPolicy {
    fn default() -> Self {
        Self {
            daily_probability: default_daily_probability(),
            min_duration: default_min_duration(),
            max_duration: default_max_duration(),
        }
    }
}

impl AnomalyPolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.daily_probability) {
            return Err(SimError::config(format!(
                "daily anomaly probability must be within [0, 1], got {}",
                self.daily_probability
            )));
        }
        if self.min_duration.is_zero() || self.max_duration < self.min_duration {
            return Err(SimError::config(
                "anomaly duration range must be non-empty and positive",
            ));
        }
        Ok(())
    }
}

/// Validates and activates anomalies on a device's anomaly slot.
#[derive(Debug, Clone, Default)]
pub struct AnomalyInjector {
    policy: AnomalyPolicy,
}

impl AnomalyInjector {
    pub fn new(policy: AnomalyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AnomalyPolicy {
        &self.policy
    }

    pub fn validate(
        archetype: Archetype,
        kind: AnomalyKind,
        magnitude: f64,
        duration: Duration,
    ) -> Result<()> {
        if !archetype.supports(kind) {
            return Err(SimError::InvalidAnomalyType { archetype, kind });
        }
        if !magnitude.is_finite() || magnitude <= 0.0 {
            return Err(SimError::config(format!(
                "anomaly magnitude must be a positive number, got {magnitude}"
            )));
        }
        if duration.is_zero() {
            return Err(SimError::config("anomaly duration must be non-zero"));
        }
        Ok(())
    }

    /// Activate an explicitly requested anomaly, replacing any active one.
    pub fn inject(
        &self,
        slot: &mut Option<AnomalyState>,
        archetype: Archetype,
        kind: AnomalyKind,
        magnitude: f64,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<AnomalyState> {
        Self::validate(archetype, kind, magnitude, duration)?;
        let anomaly = AnomalyState {
            kind,
            magnitude,
            activated_at: now,
            duration,
            origin: AnomalyOrigin::Injected,
        };
        *slot = Some(anomaly.clone());
        Ok(anomaly)
    }

    /// Roll the daily trigger at most once per plant-local day. `today` is
    /// the local calendar date of `now`.
    ///
    /// The roll is consumed even when an anomaly is already active; a new
    /// trigger never pre-empts an active one.
    pub fn maybe_trigger_daily(
        &self,
        slot: &mut Option<AnomalyState>,
        last_roll: &mut Option<NaiveDate>,
        archetype: Archetype,
        today: NaiveDate,
        now: DateTime<Utc>,
        noise: &mut NoiseSource,
    ) -> Option<AnomalyState> {
        if *last_roll == Some(today) {
            return None;
        }
        *last_roll = Some(today);
        if slot.is_some() || !noise.chance(self.policy.daily_probability) {
            return None;
        }
        let kind = *noise.pick(archetype.anomaly_kinds())?;
        let seconds = noise.uniform(
            self.policy.min_duration.as_secs_f64(),
            self.policy.max_duration.as_secs_f64(),
        );
        let anomaly = AnomalyState {
            kind,
            magnitude: kind.default_magnitude(),
            activated_at: now,
            duration: Duration::from_secs_f64(seconds.max(1.0)),
            origin: AnomalyOrigin::Daily,
        };
        *slot = Some(anomaly.clone());
        Some(anomaly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap()
    }

    #[test]
    fn inject_rejects_kind_from_other_archetype() {
        let injector = AnomalyInjector::default();
        let mut slot = None;
        let err = injector
            .inject(
                &mut slot,
                Archetype::Compressor,
                AnomalyKind::BeltSlip,
                1.0,
                Duration::from_secs(60),
                t0(),
            )
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidAnomalyType { .. }));
        assert!(slot.is_none());
    }

    #[test]
    fn inject_rejects_non_positive_magnitude() {
        let injector = AnomalyInjector::default();
        let mut slot = None;
        let err = injector
            .inject(
                &mut slot,
                Archetype::Motor,
                AnomalyKind::Overload,
                0.0,
                Duration::from_secs(60),
                t0(),
            )
            .unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn expiry_is_lazy_and_idempotent() {
        let injector = AnomalyInjector::default();
        let mut slot = None;
        injector
            .inject(
                &mut slot,
                Archetype::Compressor,
                AnomalyKind::Leak,
                1.0,
                Duration::from_secs(60),
                t0(),
            )
            .unwrap();
        let almost = t0() + chrono::Duration::seconds(59);
        assert!(is_active(&slot, almost));
        assert!(clear_if_expired(&mut slot, almost).is_none());

        let expired_at = t0() + chrono::Duration::seconds(60);
        assert!(!is_active(&slot, expired_at));
        let expired = clear_if_expired(&mut slot, expired_at).expect("expired anomaly");
        assert_eq!(expired.kind, AnomalyKind::Leak);
        assert!(slot.is_none());
        assert!(clear_if_expired(&mut slot, expired_at).is_none());
        assert!(slot.is_none());
    }

    #[test]
    fn daily_trigger_rolls_once_per_day() {
        let injector = AnomalyInjector::new(AnomalyPolicy {
            daily_probability: 1.0,
            ..AnomalyPolicy::default()
        });
        let mut noise = NoiseSource::seeded(9);
        let mut slot = None;
        let mut last_roll = None;
        let first = injector.maybe_trigger_daily(
            &mut slot,
            &mut last_roll,
            Archetype::Pump,
            t0().date_naive(),
            t0(),
            &mut noise,
        );
        let anomaly = first.expect("probability 1 always triggers");
        assert!(Archetype::Pump.supports(anomaly.kind));
        assert_eq!(anomaly.origin, AnomalyOrigin::Daily);

        slot = None;
        let again = injector.maybe_trigger_daily(
            &mut slot,
            &mut last_roll,
            Archetype::Pump,
            (t0() + chrono::Duration::hours(1)).date_naive(),
            t0() + chrono::Duration::hours(1),
            &mut noise,
        );
        assert!(again.is_none(), "second roll on the same day");
    }

    #[test]
    fn daily_trigger_never_preempts_active_anomaly() {
        let injector = AnomalyInjector::new(AnomalyPolicy {
            daily_probability: 1.0,
            ..AnomalyPolicy::default()
        });
        let mut noise = NoiseSource::seeded(11);
        let mut slot = None;
        let injected = injector
            .inject(
                &mut slot,
                Archetype::Boiler,
                AnomalyKind::Scaling,
                1.0,
                Duration::from_secs(7200),
                t0(),
            )
            .unwrap();
        let mut last_roll = None;
        let triggered = injector.maybe_trigger_daily(
            &mut slot,
            &mut last_roll,
            Archetype::Boiler,
            t0().date_naive(),
            t0(),
            &mut noise,
        );
        assert!(triggered.is_none());
        assert_eq!(slot, Some(injected));
    }

    #[test]
    fn every_archetype_has_two_or_more_kinds() {
        for archetype in Archetype::ALL {
            let kinds = archetype.anomaly_kinds();
            assert!(kinds.len() >= 2, "{archetype}");
        }
    }

    #[test]
    fn kinds_parse_from_snake_case() {
        let kind: AnomalyKind = "efficiency_loss".parse().unwrap();
        assert_eq!(kind, AnomalyKind::EfficiencyLoss);
        assert_eq!(AnomalyKind::BearingWear.to_string(), "bearing_wear");
    }
}
