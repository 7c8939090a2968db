//! # Logging
//!
//! One call to [`init_logging`] installs the process-wide `tracing`
//! subscriber for the session core: a `tracing-subscriber` fmt layer
//! (pretty, JSON or compact), an `EnvFilter` that keeps the workspace crates
//! at the configured level and HTTP/TLS dependencies at `warn`, and, when the
//! host supplied one, a layer that mirrors events into a [`HostLogSink`].
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use bridge_traits::LogLevel;
//!
//! init_logging(
//!     LoggingConfig::from_env()
//!         .with_format(LogFormat::Compact)
//!         .with_level(LogLevel::Debug),
//! )?;
//! ```
//!
//! The core never hands token values to `tracing`. Redaction here covers
//! what remains: URLs whose query carries `code`/`state`/`id_token_hint`,
//! and fields a host-side caller names after a credential.

use crate::error::{Error, Result};

use bridge_traits::log::{HostLogSink, LogLevel, LogRecord};

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::format::FmtSpan,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer, Registry,
};

/// Overrides the whole filter, `RUST_LOG` syntax.
pub const ENV_LOG_FILTER: &str = "OIDC_SESSION_LOG";
/// `pretty`, `json` or `compact`.
pub const ENV_LOG_FORMAT: &str = "OIDC_SESSION_LOG_FORMAT";

const WORKSPACE_TARGETS: &[&str] = &["oidc_session", "core_runtime", "core_auth", "bridge_desktop"];
const QUIET_DEPENDENCIES: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "rustls"];

/// Substrings that mark a field name as credential-bearing.
const CREDENTIAL_MARKERS: &[&str] = &[
    "token", "secret", "password", "authorization", "bearer", "verifier", "code", "state", "hint",
];

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl Default for LogFormat {
    /// Pretty in debug builds, JSON in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(Error::Config(format!(
                "Unknown log format '{}'; expected pretty, json or compact",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level applied to the workspace crates when no custom filter is set.
    pub level: LogLevel,
    /// Replaces the generated filter entirely.
    pub filter: Option<String>,
    /// Mask credential-named fields before they reach the host sink.
    pub redact: bool,
    pub sink: Option<Arc<dyn HostLogSink>>,
    /// Emit span open/close lines, and span context in JSON output.
    pub spans: bool,
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            redact: true,
            sink: None,
            spans: false,
            show_target: true,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("redact", &self.redact)
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl LoggingConfig {
    /// Defaults, with [`ENV_LOG_FILTER`] and [`ENV_LOG_FORMAT`] applied when set.
    /// An unparsable format value is ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var(ENV_LOG_FILTER) {
            if !filter.trim().is_empty() {
                config.filter = Some(filter);
            }
        }
        if let Some(format) = std::env::var(ENV_LOG_FORMAT)
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            config.format = format;
        }
        config
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_redaction(mut self, redact: bool) -> Self {
        self.redact = redact;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn HostLogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, spans: bool) -> Self {
        self.spans = spans;
        self
    }

    pub fn with_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// [`Error::Config`] for an invalid filter, or when a global subscriber is
/// already installed (a second call always fails).
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let sink = config
        .sink
        .clone()
        .map(|sink| SinkLayer::new(sink, config.redact));

    tracing_subscriber::registry()
        .with(fmt_layer(&config))
        .with(filter)
        .with(sink)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn fmt_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let span_events = if config.spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let base = tracing_subscriber::fmt::layer()
        .with_target(config.show_target)
        .with_span_events(span_events);

    match config.format {
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Compact => base.compact().boxed(),
        LogFormat::Json => base
            .json()
            .flatten_event(true)
            .with_current_span(config.spans)
            .with_span_list(config.spans)
            .boxed(),
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) => custom.clone(),
        None => WORKSPACE_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, config.level))
            .chain(QUIET_DEPENDENCIES.iter().map(|dep| format!("{}=warn", dep)))
            .collect::<Vec<_>>()
            .join(","),
    };

    EnvFilter::try_new(&directives)
        .map_err(|e| Error::Config(format!("Invalid log filter '{}': {}", directives, e)))
}

/// Mirrors events into the host sink.
struct SinkLayer {
    sink: Arc<dyn HostLogSink>,
    redact: bool,
}

impl SinkLayer {
    fn new(sink: Arc<dyn HostLogSink>, redact: bool) -> Self {
        Self { sink, redact }
    }
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = log_level(metadata.level());
        if level < self.sink.threshold() {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let mut record = LogRecord::new(
            level,
            metadata.target(),
            fields.message.unwrap_or_else(|| metadata.name().to_string()),
        );
        record.fields = if self.redact {
            fields
                .values
                .into_iter()
                .map(|(name, value)| {
                    let masked = mask_field(&name, &value).into_owned();
                    (name, masked)
                })
                .collect()
        } else {
            fields.values
        };
        record.span = ctx.event_span(event).map(|span| span.name().to_string());

        self.sink.write(&record);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: BTreeMap<String, String>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.values.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}

fn log_level(level: &tracing::Level) -> LogLevel {
    match *level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

fn is_credential_field(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    CREDENTIAL_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Replace `value` with `[REDACTED]` when `field_name` looks like it holds a
/// credential; URL-shaped values of other fields lose their query string.
pub fn mask_field<'a>(field_name: &str, value: &'a str) -> Cow<'a, str> {
    if is_credential_field(field_name) {
        Cow::Borrowed(REDACTED)
    } else if value.contains("://") || value.contains(":/") {
        redact_url_query(value)
    } else {
        Cow::Borrowed(value)
    }
}

/// Strip everything from the first `?` or `#` on.
///
/// Authorization URLs carry `state` and the PKCE challenge, callback URLs
/// the authorization code, end-session URLs the id token hint.
///
/// ```ignore
/// assert_eq!(redact_url_query("app:/cb?code=abc&state=xyz"), "app:/cb?[REDACTED]");
/// ```
pub fn redact_url_query(url: &str) -> Cow<'_, str> {
    match url.find(['?', '#']) {
        Some(idx) => Cow::Owned(format!("{}?{}", &url[..idx], REDACTED)),
        None => Cow::Borrowed(url),
    }
}
