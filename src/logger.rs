//! Pluggable logging sink.
//!
//! The wire protocol itself has no opinion on logging; the server engine
//! emits one line per dispatched call (elapsed time, procedure name, an
//! argument summary) through whatever [`Logger`] the pipeline was built
//! with. The default forwards to `tracing`, matching how the rest of this
//! crate reports diagnostics.

/// A one-line logging sink.
pub trait Logger: Send + Sync {
    /// Record a single line.
    fn log(&self, line: &str);
}

/// Default [`Logger`] that forwards to the `tracing` crate at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, line: &str) { tracing::info!("{line}"); }
}

impl<F: Fn(&str) + Send + Sync> Logger for F {
    fn log(&self, line: &str) { self(line); }
}
