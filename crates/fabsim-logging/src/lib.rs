//! ---
//! fab_section: "03-logging"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Device-scoped structured logging helpers."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging helpers layered on `tracing`. Every event emitted
//! through the `fab_*` macros carries the same machine, archetype, tick and
//! mode fields so log pipelines can filter per device.

pub mod macros;

#[doc(hidden)]
pub use tracing;

/// Device fields attached to log events by the `fab_*` macros.
#[derive(Debug, Default, Clone)]
pub struct DeviceLogContext<'a> {
    /// Machine identifier.
    pub machine: Option<&'a str>,
    /// Machine archetype, e.g. `compressor`.
    pub archetype: Option<&'a str>,
    /// Number of ticks the device has produced.
    pub tick: Option<u64>,
    /// Operating mode at the time of the event.
    pub mode: Option<&'a str>,
}

impl<'a> DeviceLogContext<'a> {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for one machine.
    pub fn for_machine(machine: &'a str, archetype: &'a str) -> Self {
        Self {
            machine: Some(machine),
            archetype: Some(archetype),
            ..Self::default()
        }
    }

    /// Attach a tick counter.
    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }

    /// Attach an operating mode.
    pub fn with_mode(mut self, mode: &'a str) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Outcome of a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The transition completed.
    Success,
    /// The transition failed or was forced.
    Fault,
}

impl LifecycleOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Success => "success",
            LifecycleOutcome::Fault => "fault",
        }
    }
}

/// Emit a lifecycle event such as `device.started` or `fleet.shutdown`.
/// Faults are logged at warn level, successes at info.
pub fn log_lifecycle_event(
    context: Option<&DeviceLogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    let machine = ctx.machine.unwrap_or("");
    let archetype = ctx.archetype.unwrap_or("");
    let tick = ctx.tick.unwrap_or_default();
    match outcome {
        LifecycleOutcome::Success => tracing::info!(
            event,
            outcome = outcome.as_str(),
            machine,
            archetype,
            tick,
            "{message}"
        ),
        LifecycleOutcome::Fault => tracing::warn!(
            event,
            outcome = outcome.as_str(),
            machine,
            archetype,
            tick,
            "{message}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

    fn init() {
        let _ = Registry::default()
            .with(EnvFilter::new("debug"))
            .with(subscriber_fmt::layer().with_test_writer())
            .try_init();
    }

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = DeviceLogContext::for_machine("air-1", "compressor")
            .with_tick(12)
            .with_mode("running");
        fab_info!(context = ctx.clone(), "device online");
        fab_debug!("plain debug message");
        fab_warn!(context = ctx, "overrun by {} ms", 42);
        fab_error!("publish failed: {}", "timeout");
    }

    #[test]
    fn context_builder_sets_fields() {
        let ctx = DeviceLogContext::for_machine("pump-2", "pump").with_tick(3);
        assert_eq!(ctx.machine, Some("pump-2"));
        assert_eq!(ctx.archetype, Some("pump"));
        assert_eq!(ctx.tick, Some(3));
        assert_eq!(ctx.mode, None);
    }

    #[test]
    fn lifecycle_helper_emits() {
        init();
        let ctx = DeviceLogContext::for_machine("boiler-1", "boiler");
        log_lifecycle_event(
            Some(&ctx),
            "device.started",
            "device started",
            LifecycleOutcome::Success,
        );
        log_lifecycle_event(
            None,
            "fleet.shutdown",
            "device task aborted",
            LifecycleOutcome::Fault,
        );
    }
}
