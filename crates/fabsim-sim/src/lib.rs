//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "01-bootstrap"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Simulation module exports and shared types."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! Physical machine models and device simulators for FabSim.
//!
//! Every machine archetype implements [`PhysicalModel`]; the closed
//! [`MachineModel`] enum dispatches between them. A [`DeviceSimulator`]
//! wraps one model instance with lifecycle, bookkeeping counters and the
//! anomaly injector, and produces one [`ReadingBatch`] per tick.

pub mod anomaly;
pub mod demand;
pub mod device;
pub mod error;
pub mod models;
pub mod noise;
pub mod readings;
pub mod spec;

pub use anomaly::{AnomalyInjector, AnomalyKind, AnomalyOrigin, AnomalyPolicy, AnomalyState};
pub use demand::{ShiftCalendar, ShiftWindow};
pub use device::{
    DeviceSettings, DeviceSimulator, DeviceSnapshot, DeviceState, ElectricalProfile, TickOutcome,
};
pub use error::{Result, SimError};
pub use models::{ModelOutput, ModelState, PhysicalModel, StepInput};
pub use noise::NoiseSource;
pub use readings::{
    EnergyReading, Environment, EnvironmentalReading, OperatingMode, ProductionReading,
    ReadingBatch, ReadingKind,
};
pub use spec::{Archetype, MachineModel, MachineSpec};
