//! Logging through the bus.
//!
//! Modules report through [`log`] instead of logging directly, so that any
//! number of sinks can subscribe to [`LogMessage`]. [`TracingLogger`] is the
//! sink forwarding to `tracing`.
use crate::bus::Bus;
use crate::task::Task;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

/// Raises a [`LogMessage`] on `bus`.
pub fn log(bus: &Bus, level: LogLevel, message: impl Into<String>) -> Task<()> {
    bus.raise(LogMessage {
        level,
        message: message.into(),
    })
}

/// Forwards every [`LogMessage`] raised on the bus to `tracing`.
#[derive(Debug)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn install(bus: &Bus) -> Self {
        bus.subscribe(|msg: &LogMessage| {
            match msg.level {
                LogLevel::Trace => tracing::trace!(target: "evbus::bus", "{}", msg.message),
                LogLevel::Debug => tracing::debug!(target: "evbus::bus", "{}", msg.message),
                LogLevel::Info => tracing::info!(target: "evbus::bus", "{}", msg.message),
                LogLevel::Warn => tracing::warn!(target: "evbus::bus", "{}", msg.message),
                LogLevel::Error => tracing::error!(target: "evbus::bus", "{}", msg.message),
            }
            Task::done()
        });

        TracingLogger
    }
}
