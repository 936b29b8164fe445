//! Diagnostic sink handed to the pipeline and its collaborators.
//!
//! Nothing in this crate logs through a hidden global except fatal paths.
//! Callers pass a `Logger` into [`InferencePipeline`](crate::InferencePipeline)
//! and the backend; the default forwards to `tracing`.

use std::fmt;
use std::sync::Arc;

/// Message severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error,
    Warn,
    Info,
    Debug,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warn => "warn",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logger interface for the inference stack.
///
/// Implementors provide [`log`](Logger::log); the per-level methods forward
/// to it. [`enabled`](Logger::enabled) lets callers skip building expensive
/// messages nobody will see.
pub trait Logger: Send + Sync {
    fn log(&self, severity: Severity, msg: &str);

    fn enabled(&self, _severity: Severity) -> bool {
        true
    }

    fn error(&self, msg: &str) {
        self.log(Severity::Error, msg);
    }

    fn warn(&self, msg: &str) {
        self.log(Severity::Warn, msg);
    }

    fn info(&self, msg: &str) {
        self.log(Severity::Info, msg);
    }

    fn debug(&self, msg: &str) {
        self.log(Severity::Debug, msg);
    }
}

/// Returns the default logger, which forwards to `tracing`.
pub fn default_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}

struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, severity: Severity, msg: &str) {
        match severity {
            Severity::Error => tracing::error!("infer: {msg}"),
            Severity::Warn => tracing::warn!("infer: {msg}"),
            Severity::Info => tracing::info!("infer: {msg}"),
            Severity::Debug => tracing::debug!("infer: {msg}"),
        }
    }

    fn enabled(&self, severity: Severity) -> bool {
        match severity {
            Severity::Error => tracing::enabled!(tracing::Level::ERROR),
            Severity::Warn => tracing::enabled!(tracing::Level::WARN),
            Severity::Info => tracing::enabled!(tracing::Level::INFO),
            Severity::Debug => tracing::enabled!(tracing::Level::DEBUG),
        }
    }
}

/// Drops messages less severe than a threshold before they reach `inner`.
pub struct SeverityFilter<L> {
    inner: L,
    max: Severity,
}

impl<L: Logger> SeverityFilter<L> {
    /// Passes `max` and everything more severe.
    pub fn new(inner: L, max: Severity) -> Self {
        Self { inner, max }
    }
}

impl<L: Logger> Logger for SeverityFilter<L> {
    fn log(&self, severity: Severity, msg: &str) {
        if self.enabled(severity) {
            self.inner.log(severity, msg);
        }
    }

    fn enabled(&self, severity: Severity) -> bool {
        severity <= self.max && self.inner.enabled(severity)
    }
}

/// Logger that discards everything.
pub struct NopLogger;

impl Logger for NopLogger {
    fn log(&self, _severity: Severity, _msg: &str) {}

    fn enabled(&self, _severity: Severity) -> bool {
        false
    }
}

/// Logs a formatted message at error level.
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_at!($logger, $crate::logger::Severity::Error, $($arg)*)
    };
}

/// Logs a formatted message at warn level.
#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_at!($logger, $crate::logger::Severity::Warn, $($arg)*)
    };
}

/// Logs a formatted message at info level.
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_at!($logger, $crate::logger::Severity::Info, $($arg)*)
    };
}

/// Logs a formatted message at debug level. Arguments are not evaluated
/// when the logger has debug disabled.
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $crate::log_at!($logger, $crate::logger::Severity::Debug, $($arg)*)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! log_at {
    ($logger:expr, $severity:expr, $($arg:tt)*) => {{
        let logger = &$logger;
        if $crate::logger::Logger::enabled(&**logger, $severity) {
            $crate::logger::Logger::log(&**logger, $severity, &format!($($arg)*));
        }
    }};
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records every message with its severity name.
    #[derive(Default)]
    pub(crate) struct CapturingLogger {
        messages: Mutex<Vec<(String, String)>>,
    }

    impl CapturingLogger {
        pub(crate) fn messages(&self) -> Vec<(String, String)> {
            self.messages.lock().clone()
        }

        pub(crate) fn contains(&self, level: &str, needle: &str) -> bool {
            self.messages
                .lock()
                .iter()
                .any(|(l, m)| l == level && m.contains(needle))
        }
    }

    impl Logger for CapturingLogger {
        fn log(&self, severity: Severity, msg: &str) {
            self.messages.lock().push((severity.to_string(), msg.to_string()));
        }
    }

    #[test]
    fn macros_format_and_route() {
        let logger = Arc::new(CapturingLogger::default());
        log_error!(logger, "build failed at {}", "parse");
        log_warn!(logger, "dla core {} ignored", 0);
        log_info!(logger, "engine ready");
        log_debug!(logger, "bytes={}", 3136);

        let msgs = logger.messages();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0], ("error".to_string(), "build failed at parse".to_string()));
        assert_eq!(msgs[1], ("warn".to_string(), "dla core 0 ignored".to_string()));
        assert_eq!(msgs[2], ("info".to_string(), "engine ready".to_string()));
        assert_eq!(msgs[3], ("debug".to_string(), "bytes=3136".to_string()));
    }

    #[test]
    fn filter_drops_verbose_messages() {
        let filtered = Arc::new(SeverityFilter::new(CapturingLogger::default(), Severity::Warn));
        assert!(filtered.enabled(Severity::Error));
        assert!(!filtered.enabled(Severity::Info));

        filtered.info("dropped");
        filtered.warn("kept");
        let mut evaluated = false;
        log_debug!(filtered, "{}", {
            evaluated = true;
            "dropped"
        });
        assert!(!evaluated);
        assert_eq!(filtered.inner.messages(), vec![("warn".to_string(), "kept".to_string())]);
    }

    #[test]
    fn nop_logger_is_disabled() {
        let logger = NopLogger;
        assert!(!logger.enabled(Severity::Error));
        logger.error("should not panic");
    }

    #[test]
    fn default_logger_forwards() {
        let logger = default_logger();
        logger.info("test default logger");
    }

    #[test]
    fn severity_order() {
        assert!(Severity::Error < Severity::Debug);
        assert_eq!(Severity::Warn.to_string(), "warn");
    }
}
