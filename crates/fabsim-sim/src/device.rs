//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Per-machine simulator owning lifecycle, counters and anomalies."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::anomaly::{self, AnomalyInjector, AnomalyKind, AnomalyPolicy, AnomalyState};
use crate::demand::ShiftCalendar;
use crate::error::{Result, SimError};
use crate::models::{ModelState, StepInput};
use crate::noise::NoiseSource;
use crate::readings::{
    EnergyReading, EnvironmentalReading, OperatingMode, ProductionReading, ReadingBatch,
};
use crate::spec::{Archetype, MachineSpec};

fn default_voltage() -> f64 {
    400.0
}

fn default_frequency() -> f64 {
    50.0
}

/// Nominal three-phase supply used to derive current from power.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElectricalProfile {
    #[serde(default = "default_voltage")]
    pub voltage_v: f64,
    #[serde(default = "default_frequency")]
    pub frequency_hz: f64,
}

impl Default for ElectricalProfile {
    fn default() -> Self {
        Self {
            voltage_v: default_voltage(),
            frequency_hz: default_frequency(),
        }
    }
}

impl ElectricalProfile {
    /// Line current for a balanced three-phase load.
    pub fn current_a(&self, power_kw: f64, power_factor: f64) -> f64 {
        if power_kw <= 0.0 || power_factor <= 0.0 {
            return 0.0;
        }
        power_kw * 1000.0 / (3f64.sqrt() * self.voltage_v * power_factor)
    }
}

/// Fleet-wide knobs shared by every device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub seed: u64,
    pub noise_pct: f64,
    pub calendar: ShiftCalendar,
    pub anomalies: AnomalyPolicy,
    pub electrical: ElectricalProfile,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            noise_pct: 0.03,
            calendar: ShiftCalendar::default(),
            anomalies: AnomalyPolicy::default(),
            electrical: ElectricalProfile::default(),
        }
    }
}

impl DeviceSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=0.5).contains(&self.noise_pct) {
            return Err(SimError::config(format!(
                "noise_pct must be within [0, 0.5], got {}",
                self.noise_pct
            )));
        }
        self.calendar.validate()?;
        self.anomalies.validate()
    }
}

/// Mutable per-device state, owned by exactly one simulator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub running: bool,
    pub mode: OperatingMode,
    pub power_kw: f64,
    pub energy_kwh: f64,
    pub production_count: u64,
    pub production_good: u64,
    pub production_bad: u64,
    pub production_carry: f64,
    pub model: ModelState,
    pub anomaly: Option<AnomalyState>,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_emitted: Option<DateTime<Utc>>,
    pub last_daily_roll: Option<NaiveDate>,
    pub ticks: u64,
}

/// Read-only view handed to status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub machine_id: String,
    pub name: String,
    pub archetype: Archetype,
    pub rated_power_kw: f64,
    pub interval_ms: u64,
    pub running: bool,
    pub operating_mode: OperatingMode,
    pub power_kw: f64,
    pub energy_kwh: f64,
    pub production_count: u64,
    pub production_count_good: u64,
    pub production_count_bad: u64,
    pub active_anomaly: Option<AnomalyState>,
    pub last_reading_at: Option<DateTime<Utc>>,
    pub ticks: u64,
}

/// Result of one tick: the reading triple plus anomaly transitions observed.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub batch: ReadingBatch,
    pub expired: Option<AnomalyState>,
    pub triggered: Option<AnomalyState>,
}

/// One simulated machine.
#[derive(Debug, Clone)]
pub struct DeviceSimulator {
    spec: MachineSpec,
    settings: DeviceSettings,
    injector: AnomalyInjector,
    noise: NoiseSource,
    state: DeviceState,
}

impl DeviceSimulator {
    pub fn new(spec: MachineSpec, settings: DeviceSettings) -> Result<Self> {
        spec.validate()?;
        settings.validate()?;
        let noise = NoiseSource::for_machine(settings.seed, &spec.id);
        let state = DeviceState {
            running: false,
            mode: OperatingMode::Offline,
            power_kw: 0.0,
            energy_kwh: 0.0,
            production_count: 0,
            production_good: 0,
            production_bad: 0,
            production_carry: 0.0,
            model: spec.model.initial_state(),
            anomaly: None,
            last_tick: None,
            last_emitted: None,
            last_daily_roll: None,
            ticks: 0,
        };
        Ok(Self {
            injector: AnomalyInjector::new(settings.anomalies.clone()),
            spec,
            settings,
            noise,
            state,
        })
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &MachineSpec {
        &self.spec
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn archetype(&self) -> Archetype {
        self.spec.archetype()
    }

    pub fn interval(&self) -> Duration {
        self.spec.interval
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    /// Idempotent; the next tick measures elapsed time from itself.
    pub fn start(&mut self) {
        if self.state.running {
            return;
        }
        self.state.running = true;
        self.state.last_tick = None;
        self.state.mode = OperatingMode::Idle;
    }

    /// Idempotent; power drops to zero and accumulation halts.
    pub fn stop(&mut self) -> Result<()> {
        if !self.state.running {
            return Ok(());
        }
        self.state.model = self.spec.model.at_rest(&self.state.model)?;
        self.state.running = false;
        self.state.power_kw = 0.0;
        self.state.mode = OperatingMode::Offline;
        self.state.last_tick = None;
        Ok(())
    }

    pub fn inject(
        &mut self,
        kind: AnomalyKind,
        magnitude: f64,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<AnomalyState> {
        let archetype = self.archetype();
        self.injector.inject(
            &mut self.state.anomaly,
            archetype,
            kind,
            magnitude,
            duration,
            now,
        )
    }

    pub fn clear_anomaly(&mut self) -> Option<AnomalyState> {
        self.state.anomaly.take()
    }

    pub fn active_anomaly(&self, now: DateTime<Utc>) -> Option<&AnomalyState> {
        self.state
            .anomaly
            .as_ref()
            .filter(|anomaly| anomaly.is_active(now))
    }

    /// Replace interval, rated power and archetype parameters in place. The
    /// continuous state carries over, so the archetype must not change.
    pub fn reconfigure(&mut self, spec: MachineSpec) -> Result<()> {
        if spec.id != self.spec.id {
            return Err(SimError::config(format!(
                "cannot rename machine '{}' to '{}'",
                self.spec.id, spec.id
            )));
        }
        if spec.archetype() != self.archetype() {
            return Err(SimError::ArchetypeMismatch {
                expected: self.archetype(),
                found: spec.archetype(),
            });
        }
        spec.validate()?;
        self.spec = spec;
        self.state.power_kw = self.state.power_kw.min(self.spec.power_ceiling_kw());
        Ok(())
    }

    /// Produce the reading triple for `now`. Stopped devices still report,
    /// with zero power and frozen counters.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let now = match self.state.last_emitted {
            Some(last) if now < last => last,
            _ => now,
        };
        let expired = anomaly::clear_if_expired(&mut self.state.anomaly, now);
        if let Some(expired) = &expired {
            debug!(machine = %self.spec.id, kind = %expired.kind, "anomaly expired");
        }

        let outcome = if self.state.running {
            self.running_tick(now, expired)?
        } else {
            TickOutcome {
                batch: self.offline_batch(now)?,
                expired,
                triggered: None,
            }
        };
        self.state.last_emitted = Some(now);
        self.state.ticks += 1;
        Ok(outcome)
    }

    fn running_tick(
        &mut self,
        now: DateTime<Utc>,
        expired: Option<AnomalyState>,
    ) -> Result<TickOutcome> {
        let archetype = self.archetype();
        let today = self.settings.calendar.local_date(now);
        let triggered = self.injector.maybe_trigger_daily(
            &mut self.state.anomaly,
            &mut self.state.last_daily_roll,
            archetype,
            today,
            now,
            &mut self.noise,
        );
        if let Some(triggered) = &triggered {
            debug!(machine = %self.spec.id, kind = %triggered.kind, "daily anomaly triggered");
        }

        let dt = match self.state.last_tick {
            Some(last) => (now - last).to_std().unwrap_or_default().as_secs_f64(),
            None => self.spec.interval.as_secs_f64(),
        };
        let demand = self.settings.calendar.demand_factor(now);
        let active = self
            .state
            .anomaly
            .as_ref()
            .filter(|anomaly| anomaly.is_active(now));
        let input = StepInput {
            now,
            dt,
            demand,
            anomaly: active,
            rated_power_kw: self.spec.rated_power_kw,
            noise_pct: self.settings.noise_pct,
        };
        let anomalous = active.is_some();
        let (model, output) = self
            .spec
            .model
            .advance(&self.state.model, &input, &mut self.noise)?;

        let power_kw = if output.power_kw.is_finite() {
            output.power_kw.clamp(0.0, self.spec.power_ceiling_kw())
        } else {
            0.0
        };
        self.state.model = model;
        self.state.power_kw = power_kw;
        self.state.energy_kwh += power_kw * dt / 3600.0;
        self.state.last_tick = Some(now);

        let carry = self.state.production_carry + output.produced_units.max(0.0);
        let whole = carry.floor();
        self.state.production_carry = carry - whole;
        let whole = whole as u64;
        let bad = self.noise.binomial(whole, output.scrap_ratio);
        self.state.production_count += whole;
        self.state.production_bad += bad;
        self.state.production_good += whole - bad;

        let mode = if anomalous && output.mode == OperatingMode::Running {
            OperatingMode::Degraded
        } else {
            output.mode
        };
        self.state.mode = mode;

        let electrical = self.settings.electrical;
        let batch = ReadingBatch {
            energy: EnergyReading {
                time: now,
                machine_id: self.spec.id.clone(),
                power_kw,
                energy_kwh: self.state.energy_kwh,
                voltage_v: Some(self.noise.jitter(electrical.voltage_v, 0.01)),
                current_a: Some(electrical.current_a(power_kw, output.power_factor)),
                power_factor: Some(output.power_factor.clamp(0.0, 1.0)),
                frequency_hz: Some(self.noise.jitter(electrical.frequency_hz, 0.001)),
            },
            production: self.production_reading(
                now,
                output.throughput_per_hour.max(0.0),
                mode,
                output.speed_percent.clamp(0.0, 100.0),
            ),
            environmental: EnvironmentalReading {
                time: now,
                machine_id: self.spec.id.clone(),
                environment: output.environment,
            },
        };
        Ok(TickOutcome {
            batch,
            expired,
            triggered,
        })
    }

    fn offline_batch(&mut self, now: DateTime<Utc>) -> Result<ReadingBatch> {
        let electrical = self.settings.electrical;
        let environment = self.spec.model.environment_at_rest(&self.state.model)?;
        Ok(ReadingBatch {
            energy: EnergyReading {
                time: now,
                machine_id: self.spec.id.clone(),
                power_kw: 0.0,
                energy_kwh: self.state.energy_kwh,
                voltage_v: Some(electrical.voltage_v),
                current_a: Some(0.0),
                power_factor: None,
                frequency_hz: Some(electrical.frequency_hz),
            },
            production: self.production_reading(now, 0.0, OperatingMode::Offline, 0.0),
            environmental: EnvironmentalReading {
                time: now,
                machine_id: self.spec.id.clone(),
                environment,
            },
        })
    }

    fn production_reading(
        &self,
        now: DateTime<Utc>,
        throughput: f64,
        mode: OperatingMode,
        speed_percent: f64,
    ) -> ProductionReading {
        ProductionReading {
            time: now,
            machine_id: self.spec.id.clone(),
            production_count: self.state.production_count,
            production_count_good: self.state.production_good,
            production_count_bad: self.state.production_bad,
            throughput_units_per_hour: throughput,
            operating_mode: mode,
            speed_percent,
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            machine_id: self.spec.id.clone(),
            name: self.spec.display_name().to_string(),
            archetype: self.archetype(),
            rated_power_kw: self.spec.rated_power_kw,
            interval_ms: u64::try_from(self.spec.interval.as_millis()).unwrap_or(u64::MAX),
            running: self.state.running,
            operating_mode: self.state.mode,
            power_kw: self.state.power_kw,
            energy_kwh: self.state.energy_kwh,
            production_count: self.state.production_count,
            production_count_good: self.state.production_good,
            production_count_bad: self.state.production_bad,
            active_anomaly: self.state.anomaly.clone(),
            last_reading_at: self.state.last_emitted,
            ticks: self.state.ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::MachineModel;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        // Wednesday, inside the first default shift.
        Utc.with_ymd_and_hms(2024, 3, 6, 8, 0, 0).unwrap()
    }

    fn device(archetype: Archetype) -> DeviceSimulator {
        let spec = MachineSpec::new(
            format!("{archetype}-1"),
            40.0,
            Duration::from_secs(1),
            MachineModel::default_for(archetype),
        );
        DeviceSimulator::new(spec, DeviceSettings::default()).unwrap()
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::seconds(seconds)
    }

    #[test]
    fn new_device_is_stopped_and_reports_offline() {
        let mut sim = device(Archetype::Motor);
        let outcome = sim.tick(t0()).unwrap();
        assert_eq!(outcome.batch.energy.power_kw, 0.0);
        assert_eq!(
            outcome.batch.production.operating_mode,
            OperatingMode::Offline
        );
        assert_eq!(outcome.batch.energy.energy_kwh, 0.0);
    }

    #[test]
    fn power_stays_bounded_and_energy_grows() {
        for archetype in Archetype::ALL {
            let mut sim = device(archetype);
            sim.start();
            let ceiling = sim.spec().power_ceiling_kw();
            let mut energy = 0.0;
            for second in 0..600 {
                let batch = sim.tick(at(second)).unwrap().batch;
                assert!(batch.energy.power_kw >= 0.0 && batch.energy.power_kw <= ceiling);
                assert!(batch.energy.energy_kwh >= energy);
                energy = batch.energy.energy_kwh;
            }
            assert!(energy > 0.0, "{archetype} should draw energy");
        }
    }

    #[test]
    fn stopping_zeroes_power_and_freezes_counters() {
        let mut sim = device(Archetype::Pump);
        sim.start();
        for second in 0..120 {
            sim.tick(at(second)).unwrap();
        }
        let before = sim.snapshot();
        assert!(before.power_kw > 0.0);
        sim.stop().unwrap();
        for second in 120..180 {
            let batch = sim.tick(at(second)).unwrap().batch;
            assert_eq!(batch.energy.power_kw, 0.0);
            assert_eq!(batch.energy.energy_kwh, before.energy_kwh);
            assert_eq!(batch.production.operating_mode, OperatingMode::Offline);
            assert_eq!(batch.production.throughput_units_per_hour, 0.0);
        }
        assert_eq!(sim.snapshot().production_count, before.production_count);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let mut sim = device(Archetype::Hvac);
        sim.start();
        let first = sim.tick(at(10)).unwrap().batch.time();
        let second = sim.tick(at(5)).unwrap().batch.time();
        assert_eq!(first, second);
        let energy = sim.snapshot().energy_kwh;
        sim.tick(at(5)).unwrap();
        assert_eq!(sim.snapshot().energy_kwh, energy);
    }

    #[test]
    fn active_anomaly_marks_running_machine_degraded() {
        let mut sim = device(Archetype::Motor);
        sim.start();
        for second in 0..60 {
            sim.tick(at(second)).unwrap();
        }
        sim.inject(
            AnomalyKind::BearingWear,
            1.0,
            Duration::from_secs(30),
            at(60),
        )
        .unwrap();
        let outcome = sim.tick(at(60)).unwrap();
        assert_eq!(
            outcome.batch.production.operating_mode,
            OperatingMode::Degraded
        );
        let outcome = sim.tick(at(90)).unwrap();
        assert_eq!(outcome.expired.map(|a| a.kind), Some(AnomalyKind::BearingWear));
        assert_eq!(
            outcome.batch.production.operating_mode,
            OperatingMode::Running
        );
        assert!(sim.snapshot().active_anomaly.is_none());
    }

    #[test]
    fn invalid_anomaly_leaves_device_untouched() {
        let mut sim = device(Archetype::Boiler);
        let err = sim
            .inject(AnomalyKind::Leak, 1.0, Duration::from_secs(10), t0())
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidAnomalyType { .. }));
        assert!(sim.snapshot().active_anomaly.is_none());
    }

    #[test]
    fn molder_counts_good_and_bad_parts() {
        let mut sim = device(Archetype::InjectionMolder);
        sim.start();
        for second in 0..3_600 {
            sim.tick(at(second)).unwrap();
        }
        let snapshot = sim.snapshot();
        assert!(snapshot.production_count > 0);
        assert_eq!(
            snapshot.production_count,
            snapshot.production_count_good + snapshot.production_count_bad
        );
    }

    #[test]
    fn reconfigure_rejects_archetype_change_and_keeps_state() {
        let mut sim = device(Archetype::Compressor);
        sim.start();
        for second in 0..30 {
            sim.tick(at(second)).unwrap();
        }
        let energy = sim.snapshot().energy_kwh;

        let mut other = sim.spec().clone();
        other.model = MachineModel::default_for(Archetype::Pump);
        assert!(matches!(
            sim.reconfigure(other),
            Err(SimError::ArchetypeMismatch { .. })
        ));

        let mut faster = sim.spec().clone();
        faster.interval = Duration::from_millis(500);
        faster.rated_power_kw = 60.0;
        sim.reconfigure(faster).unwrap();
        assert_eq!(sim.interval(), Duration::from_millis(500));
        assert_eq!(sim.snapshot().energy_kwh, energy);
        assert_eq!(sim.snapshot().rated_power_kw, 60.0);
    }

    fn full_demand(archetype: Archetype) -> DeviceSimulator {
        let spec = MachineSpec::new(
            format!("{archetype}-1"),
            40.0,
            Duration::from_secs(1),
            MachineModel::default_for(archetype),
        );
        let settings = DeviceSettings {
            calendar: ShiftCalendar::constant(1.0),
            anomalies: AnomalyPolicy::disabled(),
            ..DeviceSettings::default()
        };
        DeviceSimulator::new(spec, settings).unwrap()
    }

    #[test]
    fn anomalous_power_is_clamped_to_ceiling() {
        let cases = [
            (Archetype::Motor, AnomalyKind::Overload, 2.0),
            (Archetype::Compressor, AnomalyKind::Leak, 1.0),
        ];
        for (archetype, kind, magnitude) in cases {
            let mut sim = full_demand(archetype);
            sim.start();
            sim.inject(kind, magnitude, Duration::from_secs(3_600), t0())
                .unwrap();
            let ceiling = sim.spec().power_ceiling_kw();
            let mut energy = 0.0;
            let mut at_ceiling = 0;
            for second in 0..600 {
                let batch = sim.tick(at(second)).unwrap().batch;
                assert!(
                    batch.energy.power_kw <= ceiling,
                    "{archetype} drew {} kW over a {ceiling} kW ceiling",
                    batch.energy.power_kw
                );
                assert!(batch.energy.energy_kwh >= energy);
                energy = batch.energy.energy_kwh;
                if batch.energy.power_kw == ceiling {
                    at_ceiling += 1;
                }
            }
            assert!(at_ceiling > 0, "{archetype} {kind} never reached the ceiling");
        }
    }

    #[test]
    fn daily_roll_follows_plant_local_midnight() {
        let spec = MachineSpec::new(
            "pump-tz",
            40.0,
            Duration::from_secs(1),
            MachineModel::default_for(Archetype::Pump),
        );
        let settings = DeviceSettings {
            calendar: ShiftCalendar {
                utc_offset_hours: 2,
                ..ShiftCalendar::constant(1.0)
            },
            anomalies: AnomalyPolicy {
                daily_probability: 1.0,
                min_duration: Duration::from_secs(60),
                max_duration: Duration::from_secs(60),
            },
            ..DeviceSettings::default()
        };
        let mut sim = DeviceSimulator::new(spec, settings).unwrap();
        sim.start();

        // 21:30 UTC is 23:30 local; 22:30 UTC is 00:30 on the next local day
        // while still the same UTC date.
        let evening = Utc.with_ymd_and_hms(2024, 3, 6, 21, 30, 0).unwrap();
        let first = sim.tick(evening).unwrap();
        assert!(first.triggered.is_some());

        let later = evening + chrono::Duration::minutes(10);
        assert!(sim.tick(later).unwrap().triggered.is_none());

        let after_local_midnight = evening + chrono::Duration::hours(1);
        let second = sim.tick(after_local_midnight).unwrap();
        assert!(
            second.triggered.is_some(),
            "a new local day must roll again"
        );
    }

    #[test]
    fn electrical_current_follows_power() {
        let profile = ElectricalProfile::default();
        let amps = profile.current_a(50.0, 0.88);
        assert!((amps - 50_000.0 / (3f64.sqrt() * 400.0 * 0.88)).abs() < 1e-9);
        assert_eq!(profile.current_a(0.0, 0.88), 0.0);
    }
}
