use std::fmt;

/// Logging configuration for the MPV core.
///
/// Logging here is deliberately not a global `log`/`tracing` subscriber: the
/// core is meant to be embedded inside a larger search engine that may
/// already own its own logging setup, so instead each [`crate::agent::Agent`]
/// is handed a sink it writes batch/lifecycle events to directly.
pub enum Logging {
    /// No events are recorded.
    Disabled,
    /// Lifecycle events (start, stop, reset, batch drop) are written to the
    /// given writer.
    Enabled { writer: Box<dyn std::io::Write + Send> },
    /// Like `Enabled`, but every completed batch also logs its size and
    /// latency, not just lifecycle transitions.
    Verbose { writer: Box<dyn std::io::Write + Send> },
}

impl Logging {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Logging::Disabled)
    }

    pub fn is_verbose(&self) -> bool {
        matches!(self, Logging::Verbose { .. })
    }

    /// Writes a lifecycle line if logging is enabled at any level.
    pub fn log(&mut self, message: fmt::Arguments) {
        let writer = match self {
            Logging::Disabled => return,
            Logging::Enabled { writer } | Logging::Verbose { writer } => writer,
        };
        let _ = writeln!(writer, "{message}");
    }

    /// Writes a per-batch line, only if `Verbose`.
    pub fn log_verbose(&mut self, message: fmt::Arguments) {
        if let Logging::Verbose { writer } = self {
            let _ = writeln!(writer, "{message}");
        }
    }
}

impl fmt::Debug for Logging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Logging::Disabled => write!(f, "Logging::Disabled"),
            Logging::Enabled { .. } => write!(f, "Logging::Enabled"),
            Logging::Verbose { .. } => write!(f, "Logging::Verbose"),
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Logging::Enabled {
                writer: Box::new(std::io::stderr()),
            }
        } else {
            Logging::Disabled
        }
    }
}
