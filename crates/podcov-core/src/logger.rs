//! Pluggable logging capability.
//!
//! Components receive a `dyn CoverageLogger` through [`crate::CoverageContext`]
//! instead of reaching for a global. The default forwards to `tracing`.

/// Leveled logging sink for coverage events.
pub trait CoverageLogger: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards to the `tracing` macros under the `podcov` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl CoverageLogger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(target: "podcov", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "podcov", "{message}");
    }
}

// Compile-time assertion: CoverageLogger must be usable as `dyn CoverageLogger`.
const _: () = {
    fn _assert_object_safe(_: &dyn CoverageLogger) {}
};
