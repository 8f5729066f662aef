//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Errors returned by fleet operations."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use fabsim_sim::{Archetype, SimError};

/// Result alias for manager operations.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Synchronous rejections from the [`crate::SimulationManager`]. A rejected
/// command never changes device state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FleetError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("anomaly type '{kind}' is not valid for {archetype} machine '{machine}'")]
    InvalidAnomalyType {
        machine: String,
        archetype: Archetype,
        kind: String,
    },
    #[error("device '{0}' not found")]
    DeviceNotFound(String),
    #[error("device '{0}' is already registered")]
    DuplicateId(String),
    /// The device task is gone, typically after a panic.
    #[error("device '{0}' is not responding")]
    DeviceUnavailable(String),
    #[error("simulation manager is shutting down")]
    ShuttingDown,
}

impl FleetError {
    pub(crate) fn from_sim(machine: &str, err: SimError) -> Self {
        match err {
            SimError::InvalidAnomalyType { archetype, kind } => FleetError::InvalidAnomalyType {
                machine: machine.to_owned(),
                archetype,
                kind: kind.to_string(),
            },
            SimError::Configuration(message) => {
                FleetError::Configuration(format!("machine '{machine}': {message}"))
            }
            other @ SimError::ArchetypeMismatch { .. } => {
                FleetError::Configuration(format!("machine '{machine}': {other}"))
            }
        }
    }
}
