//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "tests"
//! fab_type: "source"
//! fab_scope: "test"
//! fab_description: "Hour-long device runs checking physical invariants."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use fabsim_sim::models::compressor::CompressorParams;
use fabsim_sim::{
    AnomalyKind, AnomalyPolicy, Archetype, DeviceSettings, DeviceSimulator, Environment,
    MachineModel, MachineSpec, ReadingBatch, ShiftCalendar,
};
use statrs::statistics::Statistics;

fn t0() -> DateTime<Utc> {
    // Wednesday morning, inside the first default shift.
    Utc.with_ymd_and_hms(2024, 3, 6, 7, 0, 0).unwrap()
}

fn at(seconds: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(seconds)
}

fn compressor(id: &str, params: CompressorParams) -> MachineSpec {
    MachineSpec::new(
        id,
        50.0,
        Duration::from_secs(1),
        MachineModel::Compressor(params),
    )
}

fn pressure(batch: &ReadingBatch) -> f64 {
    match batch.environmental.environment {
        Environment::Compressor(env) => env.pressure_bar,
        ref other => panic!("unexpected environment {other:?}"),
    }
}

#[test]
fn compressor_hour_stays_within_physical_bounds() -> anyhow::Result<()> {
    let settings = DeviceSettings {
        seed: 42,
        anomalies: AnomalyPolicy::disabled(),
        ..DeviceSettings::default()
    };
    let mut sim = DeviceSimulator::new(compressor("air-1", CompressorParams::default()), settings)?;
    sim.start();

    let mut energy_readings = 0;
    let mut last_energy = 0.0;
    for second in 0..3_600 {
        let batch = sim.tick(at(second))?.batch;
        energy_readings += 1;
        assert!(batch.energy.power_kw >= 0.0 && batch.energy.power_kw <= 55.0);
        assert!(batch.energy.energy_kwh >= last_energy);
        last_energy = batch.energy.energy_kwh;
        let bar = pressure(&batch);
        assert!((6.0..=8.0).contains(&bar), "pressure excursion {bar}");
    }

    assert_eq!(energy_readings, 3_600);
    assert!(
        (10.0..=47.5).contains(&last_energy),
        "hourly energy {last_energy} kWh"
    );
    Ok(())
}

#[test]
fn leak_raises_mean_power_by_about_thirty_percent() -> anyhow::Result<()> {
    // Narrow hysteresis band so each 60 s window spans many load cycles.
    let params = CompressorParams {
        load_pressure_bar: 6.9,
        unload_pressure_bar: 7.1,
        build_rate_bar_per_s: 0.3,
        consumption_rate_bar_per_s: 0.2,
        ..CompressorParams::default()
    };
    let settings = DeviceSettings {
        seed: 7,
        calendar: ShiftCalendar::constant(0.2),
        anomalies: AnomalyPolicy::disabled(),
        ..DeviceSettings::default()
    };
    let mut sim = DeviceSimulator::new(compressor("air-leak", params), settings)?;
    sim.start();

    for second in 0..600 {
        sim.tick(at(second))?;
    }
    let mut baseline = Vec::with_capacity(60);
    for second in 600..660 {
        baseline.push(sim.tick(at(second))?.batch.energy.power_kw);
    }
    sim.inject(AnomalyKind::Leak, 1.0, Duration::from_secs(60), at(660))?;
    let mut leaking = Vec::with_capacity(60);
    for second in 660..720 {
        let outcome = sim.tick(at(second))?;
        leaking.push(outcome.batch.energy.power_kw);
    }

    let ratio = leaking.iter().mean() / baseline.iter().mean();
    assert!((1.2..=1.4).contains(&ratio), "leak power ratio {ratio}");

    let outcome = sim.tick(at(720))?;
    assert!(outcome.expired.is_some());
    assert!(sim.snapshot().active_anomaly.is_none());
    Ok(())
}

#[test]
fn same_seed_replays_identical_readings() -> anyhow::Result<()> {
    let settings = DeviceSettings {
        seed: 99,
        ..DeviceSettings::default()
    };
    let spec = MachineSpec::new(
        "pump-1",
        22.0,
        Duration::from_secs(2),
        MachineModel::default_for(Archetype::Pump),
    );
    let mut left = DeviceSimulator::new(spec.clone(), settings.clone())?;
    let mut right = DeviceSimulator::new(spec, settings)?;
    left.start();
    right.start();
    for step in 0..300 {
        let now = at(step * 2);
        assert_eq!(left.tick(now)?.batch, right.tick(now)?.batch);
    }
    Ok(())
}

#[test]
fn daily_anomalies_fire_at_most_once_per_day() -> anyhow::Result<()> {
    let settings = DeviceSettings {
        seed: 3,
        anomalies: AnomalyPolicy {
            daily_probability: 1.0,
            min_duration: Duration::from_secs(600),
            max_duration: Duration::from_secs(1_200),
        },
        ..DeviceSettings::default()
    };
    let spec = MachineSpec::new(
        "belt-9",
        15.0,
        Duration::from_secs(60),
        MachineModel::default_for(Archetype::Motor),
    );
    let mut sim = DeviceSimulator::new(spec, settings)?;
    sim.start();

    let mut triggered = Vec::new();
    // Three simulated days at one-minute resolution.
    for minute in 0..(3 * 24 * 60) {
        let outcome = sim.tick(at(minute * 60))?;
        if let Some(anomaly) = outcome.triggered {
            assert!(Archetype::Motor.supports(anomaly.kind));
            triggered.push(anomaly.activated_at.date_naive());
        }
    }
    let mut days = triggered.clone();
    days.dedup();
    assert_eq!(days.len(), triggered.len(), "one trigger per day");
    assert!(triggered.len() >= 3);
    Ok(())
}

#[test]
fn batches_serialize_to_three_json_records() -> anyhow::Result<()> {
    let spec = MachineSpec::new(
        "molder-2",
        80.0,
        Duration::from_secs(5),
        MachineModel::default_for(Archetype::InjectionMolder),
    );
    let mut sim = DeviceSimulator::new(spec, DeviceSettings::default())?;
    sim.start();
    let batch = sim.tick(t0())?.batch;
    let records = batch.to_json_records()?;
    let kinds: Vec<&str> = records.iter().map(|(kind, _)| kind.as_str()).collect();
    assert_eq!(kinds, ["energy", "production", "environmental"]);
    let environmental: serde_json::Value = serde_json::from_slice(&records[2].1)?;
    assert_eq!(environmental["archetype"], "injection_molder");
    assert_eq!(environmental["machine_id"], "molder-2");
    assert!(environmental.get("barrel_temp_c").is_some());
    Ok(())
}
