//! OpenID Connect client session manager.
//!
//! Facade over the workspace crates: host bridge contracts
//! ([`bridge_traits`]), configuration/logging/events ([`core_runtime`]) and
//! the session core ([`core_auth`]). With the default `desktop-shims`
//! feature, reqwest and the OS keychain back the HTTP and storage bridges.
//!
//! ```ignore
//! use oidc_session::{ClientConfig, SessionManager};
//!
//! let config = ClientConfig::builder()
//!     .client_id("mobile-app")
//!     .issuer("https://id.example.com")
//!     .application_id("com.example.app")
//!     .provider_tag("example")
//!     .user_agent(agent)
//!     .build()?;
//!
//! let manager = SessionManager::new(config)?;
//! manager.start().await?;
//! ```

pub use bridge_traits;
pub use core_auth;
pub use core_runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;

pub use bridge_traits::{
    BridgeError, Clock, ExternalUserAgent, HostLogSink, HttpClient, LogLevel, LogRecord,
    SecureStore, SystemClock, UserAgentOutcome, UserAgentRequest,
};
pub use core_auth::{
    AuthError, AuthFailure, AuthStage, DiscoveryError, EndSessionOutcome, PersistenceError,
    ProviderConfiguration, ResourceError, SessionError, SessionManager, SessionState,
    SessionView, TokenSet, UserInfo,
};
pub use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
pub use core_runtime::{ClientConfig, ClientConfigBuilder, EventStream, SessionEvent};
