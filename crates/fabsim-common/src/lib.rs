//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Shared configuration, logging and clock primitives."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
//! Shared primitives for the FabSim workspace: configuration loading,
//! tracing setup, scheduler timing summaries and the simulated clock.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod time;

pub use config::{
    AppConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, RetryConfig, SimulationConfig,
    TransportConfig, TransportKind,
};
pub use logging::{init_tracing, LogFormat};
pub use metrics::{JitterHistogram, JitterSummary};
pub use time::SimClock;
