//! # Host Bridge Traits
//!
//! Capabilities the session core needs from its host but does not implement
//! itself. Each trait is the narrowest contract the core relies on; hosts plug
//! in native adapters (`bridge-desktop` ships the desktop ones).
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - GET/POST transport returning status + body
//! - [`SecureStore`](storage::SecureStore) - byte-oriented key/value store scoped to the application
//! - [`ExternalUserAgent`](user_agent::ExternalUserAgent) - browser-like agent that completes
//!   redirect-based flows and reports the callback URL or a cancellation
//! - [`Clock`](time::Clock) - injectable time source for expiry checks
//! - [`HostLogSink`](log::HostLogSink) - receives redacted diagnostics for the host's log stream
//!
//! ## Fail-Fast Strategy
//!
//! The core fails with a descriptive error when a required capability is not
//! supplied, rather than silently degrading:
//!
//! ```ignore
//! let user_agent = builder.user_agent
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "ExternalUserAgent".to_string(),
//!         message: "Inject the host's browser/web-auth session adapter.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! Every bridge reports failures as [`BridgeError`](error::BridgeError). Callers
//! translate them into their own taxonomy at the call site.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` so a single adapter can be shared across
//! tasks behind an `Arc`.

pub mod error;
pub mod http;
pub mod log;
pub mod storage;
pub mod time;
pub mod user_agent;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::SecureStore;
pub use log::{HostLogSink, LogLevel, LogRecord};
pub use time::{Clock, SystemClock};
pub use user_agent::{ExternalUserAgent, UserAgentOutcome, UserAgentRequest};
