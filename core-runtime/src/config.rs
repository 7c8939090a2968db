//! # Client Configuration
//!
//! [`ClientConfig`] carries everything the session core needs at startup: the
//! provider registration (client id, issuer, redirect URI), session tuning
//! (refresh margin, request timeout), and the host bridges.
//!
//! Use [`ClientConfig::builder`] to construct one. The builder fails fast with
//! an actionable message when a required value or bridge is missing.
//!
//! ## Required
//!
//! - `client_id`, `issuer`, `application_id`
//! - [`ExternalUserAgent`] (no default on any platform; presenting a login
//!   page is always host-specific)
//!
//! ## Optional (with desktop defaults)
//!
//! - [`HttpClient`] (desktop default: reqwest)
//! - [`SecureStore`] (desktop default: OS keychain, service = storage scope)
//! - [`Clock`] (default: system clock)
//!
//! Desktop defaults are injected only with the `desktop-shims` feature.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::ClientConfig;
//! use std::sync::Arc;
//!
//! let config = ClientConfig::builder()
//!     .client_id("mobile-app")
//!     .issuer("https://id.example.com")
//!     .application_id("com.example.app")
//!     .provider_tag("example")
//!     .user_agent(Arc::new(MyBrowserSession::new()))
//!     .build()?;
//!
//! assert_eq!(config.redirect_uri, "com.example.app:/oauth2redirect/example");
//! ```
//!
//! Values can be seeded from the environment with
//! [`ClientConfigBuilder::from_env`] (`OIDC_CLIENT_ID`, `OIDC_ISSUER`,
//! `OIDC_APPLICATION_ID`).

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, ExternalUserAgent, HttpClient, SecureStore, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const ENV_CLIENT_ID: &str = "OIDC_CLIENT_ID";
pub const ENV_ISSUER: &str = "OIDC_ISSUER";
pub const ENV_APPLICATION_ID: &str = "OIDC_APPLICATION_ID";

pub const DEFAULT_PROVIDER_TAG: &str = "oidc-provider";
pub const DEFAULT_STORAGE_KEY: &str = "oidc_session_state";
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "offline_access"];
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_REFRESH_MARGIN: Duration = Duration::from_secs(3600);

/// Validated configuration for one OIDC client.
#[derive(Clone)]
pub struct ClientConfig {
    pub client_id: String,

    /// Issuer URL; discovery fetches `<issuer>/.well-known/openid-configuration`.
    pub issuer: Url,

    /// Reverse-DNS application identifier, used as the redirect URI scheme.
    pub application_id: String,

    pub provider_tag: String,

    /// Must exactly match the redirect URI registered with the provider.
    pub redirect_uri: String,

    pub post_logout_redirect_uri: String,

    /// Requested scopes; always contains `openid`.
    pub scopes: Vec<String>,

    /// Key the session snapshot is stored under.
    pub storage_key: String,

    /// Store scope (keychain service name for the desktop default).
    pub storage_scope: String,

    /// Tokens expiring within this window are treated as already expired.
    pub refresh_margin: Duration,

    /// Upper bound for every network call; expiry is a network failure.
    pub request_timeout: Duration,

    pub event_buffer: usize,

    pub http_client: Arc<dyn HttpClient>,
    pub secure_store: Arc<dyn SecureStore>,
    pub user_agent: Arc<dyn ExternalUserAgent>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("issuer", &self.issuer.as_str())
            .field("redirect_uri", &self.redirect_uri)
            .field("post_logout_redirect_uri", &self.post_logout_redirect_uri)
            .field("scopes", &self.scopes)
            .field("storage_key", &self.storage_key)
            .field("storage_scope", &self.storage_scope)
            .field("refresh_margin", &self.refresh_margin)
            .field("request_timeout", &self.request_timeout)
            .field("http_client", &"HttpClient { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("user_agent", &"ExternalUserAgent { ... }")
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Redirect URI convention: `<application-id>:/oauth2redirect/<provider-tag>`.
    pub fn derive_redirect_uri(application_id: &str, provider_tag: &str) -> String {
        format!("{}:/oauth2redirect/{}", application_id, provider_tag)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Client id and application id are not empty
    /// - Redirect URIs parse as absolute URIs
    /// - Scopes include `openid`
    /// - Request timeout is non-zero and the refresh margin is at most one hour
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("Client id cannot be empty".to_string()));
        }

        if self.application_id.trim().is_empty() {
            return Err(Error::Config("Application id cannot be empty".to_string()));
        }

        for (name, uri) in [
            ("Redirect URI", &self.redirect_uri),
            ("Post-logout redirect URI", &self.post_logout_redirect_uri),
        ] {
            Url::parse(uri)
                .map_err(|e| Error::Config(format!("{} '{}' is not a valid URI: {}", name, uri, e)))?;
        }

        if !self.scopes.iter().any(|scope| scope == "openid") {
            return Err(Error::Config("Scopes must include 'openid'".to_string()));
        }

        if self.storage_key.is_empty() {
            return Err(Error::Config("Storage key cannot be empty".to_string()));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if self.refresh_margin > MAX_REFRESH_MARGIN {
            return Err(Error::Config(
                "Refresh margin exceeds maximum of one hour".to_string(),
            ));
        }

        Ok(())
    }
}

fn user_agent_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "ExternalUserAgent".to_string(),
        message: "An ExternalUserAgent is required to present login and logout pages. \
                 iOS/macOS: wrap ASWebAuthenticationSession. \
                 Android: wrap Custom Tabs with a redirect activity. \
                 Desktop: open the system browser and forward the custom-scheme callback."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for discovery and token requests. \
                 Desktop: enable the 'desktop-shims' feature to use the default reqwest client. \
                 Mobile: inject a URLSession/OkHttp adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store(scope: &str) -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    let store: Arc<dyn SecureStore> = Arc::new(KeyringSecureStore::new(scope));
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store(_scope: &str) -> Result<Arc<dyn SecureStore>> {
    Err(Error::CapabilityMissing {
        capability: "SecureStore".to_string(),
        message: "SecureStore implementation is required for session persistence. \
                 Desktop: enable the 'desktop-shims' feature to use the OS keychain. \
                 Mobile: inject Keychain/Keystore-backed storage."
            .to_string(),
    })
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    client_id: Option<String>,
    issuer: Option<String>,
    application_id: Option<String>,
    provider_tag: Option<String>,
    redirect_uri: Option<String>,
    post_logout_redirect_uri: Option<String>,
    scopes: Option<Vec<String>>,
    storage_key: Option<String>,
    storage_scope: Option<String>,
    refresh_margin: Option<Duration>,
    request_timeout: Option<Duration>,
    event_buffer: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    user_agent: Option<Arc<dyn ExternalUserAgent>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ClientConfigBuilder {
    /// Seed `client_id`, `issuer` and `application_id` from the environment.
    ///
    /// Unset variables are left empty; `build` reports them.
    pub fn from_env() -> Self {
        let mut builder = Self::default();
        builder.client_id = std::env::var(ENV_CLIENT_ID).ok();
        builder.issuer = std::env::var(ENV_ISSUER).ok();
        builder.application_id = std::env::var(ENV_APPLICATION_ID).ok();
        builder
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    pub fn provider_tag(mut self, tag: impl Into<String>) -> Self {
        self.provider_tag = Some(tag.into());
        self
    }

    /// Override the derived redirect URI.
    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    pub fn post_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.post_logout_redirect_uri = Some(uri.into());
        self
    }

    /// Replace the default scopes. `openid` is added if missing.
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    pub fn storage_scope(mut self, scope: impl Into<String>) -> Self {
        self.storage_scope = Some(scope.into());
        self
    }

    pub fn refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = Some(margin);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn user_agent(mut self, agent: Arc<dyn ExternalUserAgent>) -> Self {
        self.user_agent = Some(agent);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the final `ClientConfig`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for a missing or invalid value
    /// - [`Error::CapabilityMissing`] for a missing bridge with no default
    pub fn build(self) -> Result<ClientConfig> {
        let client_id = self.client_id.ok_or_else(|| {
            Error::Config(format!(
                "Client id is required. Use .client_id() or set {}.",
                ENV_CLIENT_ID
            ))
        })?;

        let issuer_raw = self.issuer.ok_or_else(|| {
            Error::Config(format!(
                "Issuer is required. Use .issuer() or set {}.",
                ENV_ISSUER
            ))
        })?;
        let issuer = Url::parse(&issuer_raw)
            .map_err(|e| Error::Config(format!("Issuer '{}' is not a valid URL: {}", issuer_raw, e)))?;
        if !matches!(issuer.scheme(), "https" | "http") {
            return Err(Error::Config(format!(
                "Issuer '{}' must be an http(s) URL",
                issuer_raw
            )));
        }

        let application_id = self.application_id.ok_or_else(|| {
            Error::Config(format!(
                "Application id is required. Use .application_id() or set {}.",
                ENV_APPLICATION_ID
            ))
        })?;

        let provider_tag = self
            .provider_tag
            .unwrap_or_else(|| DEFAULT_PROVIDER_TAG.to_string());
        let redirect_uri = self
            .redirect_uri
            .unwrap_or_else(|| ClientConfig::derive_redirect_uri(&application_id, &provider_tag));
        let post_logout_redirect_uri = self
            .post_logout_redirect_uri
            .unwrap_or_else(|| redirect_uri.clone());

        let mut scopes = self
            .scopes
            .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect());
        if !scopes.iter().any(|scope| scope == "openid") {
            scopes.insert(0, "openid".to_string());
        }

        let storage_scope = self
            .storage_scope
            .unwrap_or_else(|| application_id.clone());

        let user_agent = self.user_agent.ok_or_else(user_agent_missing_error)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store(&storage_scope)?,
        };

        let config = ClientConfig {
            client_id,
            issuer,
            application_id,
            provider_tag,
            redirect_uri,
            post_logout_redirect_uri,
            scopes,
            storage_key: self
                .storage_key
                .unwrap_or_else(|| DEFAULT_STORAGE_KEY.to_string()),
            storage_scope,
            refresh_margin: self.refresh_margin.unwrap_or(DEFAULT_REFRESH_MARGIN),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            event_buffer: self.event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            http_client,
            secure_store,
            user_agent,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
