//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Error taxonomy for models and device simulators."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use crate::anomaly::AnomalyKind;
use crate::spec::Archetype;

/// Shared result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors raised synchronously by device-level operations.
///
/// None of these are fatal: a rejected command leaves the device untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    /// An archetype parameter, interval, magnitude or duration is invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The anomaly kind is not defined for the device archetype.
    #[error("anomaly type '{kind}' is not valid for {archetype} machines")]
    InvalidAnomalyType {
        archetype: Archetype,
        kind: AnomalyKind,
    },
    /// A reconfiguration or state update targeted a different archetype.
    #[error("archetype mismatch: machine is {expected}, got {found}")]
    ArchetypeMismatch {
        expected: Archetype,
        found: Archetype,
    },
}

impl SimError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        SimError::Configuration(message.into())
    }
}
