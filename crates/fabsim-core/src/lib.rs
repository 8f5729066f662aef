//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Fleet management and per-device scheduling."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! Simulation manager for FabSim.
//!
//! [`SimulationManager`] owns the fleet. Every registered device runs in its
//! own tokio task that exclusively owns its [`fabsim_sim::DeviceSimulator`];
//! the manager talks to it through a command channel and reads its state
//! through a snapshot channel. Reading batches leave the task through the
//! bounded publisher queue from [`fabsim_msg`].

mod device_task;
pub mod error;
pub mod manager;
pub mod wiring;

pub use error::FleetError;
pub use manager::{DeviceUpdate, ManagerConfig, ShutdownReport, SimulationManager};
pub use wiring::{build_transport, publisher_config, MetricsObserver};
