//! Logging sink for the fiber job scheduler
//!
//! The scheduler core treats logging as an external collaborator: callers
//! inject a sink callable rather than the scheduler reaching for a global
//! logger. The default sink writes nowhere, matching a production build with
//! logging compiled out.

use std::fmt;
use std::sync::Arc;

/// Severity of a scheduler log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Log,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Log => "log",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// A sink that receives scheduler diagnostics.
///
/// Cloning a `LogSink` is cheap: it's a reference-counted pointer to the
/// same callable.
#[derive(Clone)]
pub struct LogSink(Arc<dyn Fn(LogLevel, &str) + Send + Sync>);

impl LogSink {
    /// Wrap a callable as a sink.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A sink that discards every message, used by default.
    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    /// A sink that writes to stderr, formatted as `[level] message`.
    pub fn stderr() -> Self {
        Self::new(|level, message| eprintln!("[{level}] {message}"))
    }

    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        (self.0)(level, message.as_ref());
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_noop_sink_discards_messages() {
        let sink = LogSink::noop();
        sink.log(LogLevel::Error, "should be dropped");
    }

    #[test]
    fn test_custom_sink_receives_messages() {
        let captured: Arc<Mutex<Vec<(LogLevel, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = Arc::clone(&captured);

        let sink = LogSink::new(move |level, message| {
            captured_clone
                .lock()
                .unwrap()
                .push((level, message.to_string()));
        });

        sink.log(LogLevel::Warning, "fiber pool nearly exhausted");

        let messages = captured.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, LogLevel::Warning);
        assert_eq!(messages[0].1, "fiber pool nearly exhausted");
    }

    #[test]
    fn test_sink_clone_shares_destination() {
        let captured: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        let captured_clone = Arc::clone(&captured);
        let sink = LogSink::new(move |_, _| {
            *captured_clone.lock().unwrap() += 1;
        });

        let cloned_sink = sink.clone();
        sink.log(LogLevel::Log, "a");
        cloned_sink.log(LogLevel::Log, "b");

        assert_eq!(*captured.lock().unwrap(), 2);
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Trace.to_string(), "trace");
        assert_eq!(LogLevel::Log.to_string(), "log");
        assert_eq!(LogLevel::Warning.to_string(), "warning");
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_default_sink_is_noop() {
        let sink = LogSink::default();
        sink.log(LogLevel::Error, "nobody is listening");
    }
}
