//! Host log sink.
//!
//! Mobile hosts usually want the core's diagnostics in their own log stream
//! (OSLog, Logcat). The logging layer in `core-runtime` converts each
//! `tracing` event into a [`LogRecord`] and hands it to a [`HostLogSink`].
//! Credential-bearing fields are masked before a record is built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic event, already redacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub at: DateTime<Utc>,
    /// Module path of the emitting code, e.g. `core_auth::refresh`.
    pub target: String,
    pub message: String,
    /// Structured fields, ordered by name.
    pub fields: BTreeMap<String, String>,
    /// Name of the innermost active span, if any.
    pub span: Option<String>,
}

impl LogRecord {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            at: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: BTreeMap::new(),
            span: None,
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Receives log records from the core.
///
/// Called inline from the emitting thread; implementations should hand the
/// record off quickly (OS log calls, a channel) rather than block on I/O.
///
/// ```ignore
/// use bridge_traits::log::{HostLogSink, LogLevel, LogRecord};
///
/// struct Logcat;
///
/// impl HostLogSink for Logcat {
///     fn write(&self, record: &LogRecord) {
///         android_log(record.level, &record.target, &record.message);
///     }
/// }
/// ```
pub trait HostLogSink: Send + Sync {
    fn write(&self, record: &LogRecord);

    /// Records below this level never reach [`HostLogSink::write`].
    fn threshold(&self) -> LogLevel {
        LogLevel::Info
    }
}
