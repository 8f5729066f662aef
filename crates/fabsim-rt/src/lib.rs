//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Runtime helpers for per-device scheduling."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! Scheduling helpers for the FabSim runtime.

pub mod scheduling;

pub use scheduling::{RateLimiter, TaskGroup, TickPlan, TickSchedule};
