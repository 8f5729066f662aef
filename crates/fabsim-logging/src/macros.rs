//! ---
//! fab_section: "03-logging"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Logging macros stamping device context on events."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
/// Shared expansion for the level-specific macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __fab_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $level,
            machine = ctx.machine.unwrap_or(""),
            archetype = ctx.archetype.unwrap_or(""),
            tick = ctx.tick.unwrap_or_default(),
            mode = ctx.mode.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational event enriched with device context.
#[macro_export]
macro_rules! fab_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fab_event!($crate::tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fab_event!(
            $crate::tracing::Level::INFO,
            $crate::DeviceLogContext::default(),
            $($arg)+
        )
    };
}

/// Emit a debug event enriched with device context.
#[macro_export]
macro_rules! fab_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fab_event!($crate::tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fab_event!(
            $crate::tracing::Level::DEBUG,
            $crate::DeviceLogContext::default(),
            $($arg)+
        )
    };
}

/// Emit a warning enriched with device context.
#[macro_export]
macro_rules! fab_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fab_event!($crate::tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fab_event!(
            $crate::tracing::Level::WARN,
            $crate::DeviceLogContext::default(),
            $($arg)+
        )
    };
}

/// Emit an error enriched with device context.
#[macro_export]
macro_rules! fab_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fab_event!($crate::tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fab_event!(
            $crate::tracing::Level::ERROR,
            $crate::DeviceLogContext::default(),
            $($arg)+
        )
    };
}
