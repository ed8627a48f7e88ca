//! ---
//! psoak_section: "03-observability"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Structured logging context and phase events."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
//! Context-aware logging macros.

/// Shared expansion for the level-specific macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __psoak_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            phase = ctx.phase.unwrap_or(""),
            node = ctx.node.unwrap_or_default(),
            resource = ctx.resource.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with harness context.
#[macro_export]
macro_rules! psoak_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__psoak_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__psoak_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with harness context.
#[macro_export]
macro_rules! psoak_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__psoak_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__psoak_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with harness context.
#[macro_export]
macro_rules! psoak_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__psoak_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__psoak_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}
