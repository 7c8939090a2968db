//! # Core Runtime
//!
//! Ambient infrastructure shared by the session core:
//! - [`config`]: `ClientConfig` and its fail-fast builder
//! - [`logging`]: `tracing-subscriber` setup, host log sink, redaction helpers
//! - [`events`]: broadcast bus of `SessionEvent`s for UI projection

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{Error, Result};
pub use events::{EventBus, EventStream, SessionEvent};
