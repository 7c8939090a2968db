use std::fmt;
use thiserror::Error;

/// Why an issuer could not be resolved into a [`ProviderConfiguration`](crate::types::ProviderConfiguration).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Discovery request failed: {0}")]
    Network(String),

    #[error("Discovery document is malformed: {0}")]
    Malformed(String),

    #[error("Discovery document is missing required endpoint '{0}'")]
    MissingEndpoint(&'static str),
}

/// Where in the session lifecycle an [`AuthError`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthStage {
    /// Building the authorization request or presenting it.
    Begin,
    /// Validating the redirect delivered by the user agent.
    Callback,
    /// Authorization-code exchange at the token endpoint.
    Exchange,
    /// Refresh-token exchange, or obtaining a valid access token.
    Refresh,
    Logout,
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthStage::Begin => "begin",
            AuthStage::Callback => "callback",
            AuthStage::Exchange => "exchange",
            AuthStage::Refresh => "refresh",
            AuthStage::Logout => "logout",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("anti-forgery state mismatch")]
    StateMismatch,

    #[error("user cancelled")]
    UserCancelled,

    #[error("provider returned '{error}'{}", .description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    ProviderError {
        error: String,
        description: Option<String>,
    },

    #[error("authorization code missing from callback")]
    MissingCode,

    #[error("network failure: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The refresh token was rejected; the session cannot be recovered.
    #[error("refresh token rejected (invalid_grant)")]
    InvalidGrant,

    #[error("access token expired and no refresh token is available")]
    NoRefreshToken,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("a login is already in progress")]
    LoginInProgress,

    #[error("user agent failed: {0}")]
    UserAgent(String),
}

/// A failed login, refresh, or logout step.
///
/// `Clone` so one refresh outcome can be handed to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} failed: {reason}")]
pub struct AuthError {
    pub stage: AuthStage,
    pub reason: AuthFailure,
}

impl AuthError {
    pub fn new(stage: AuthStage, reason: AuthFailure) -> Self {
        Self { stage, reason }
    }

    pub fn network(stage: AuthStage, message: impl Into<String>) -> Self {
        Self::new(stage, AuthFailure::Network(message.into()))
    }

    pub fn invalid_response(stage: AuthStage, message: impl Into<String>) -> Self {
        Self::new(stage, AuthFailure::InvalidResponse(message.into()))
    }

    /// The refresh token is dead and the session has been (or must be) cleared.
    pub fn is_invalid_grant(&self) -> bool {
        self.reason == AuthFailure::InvalidGrant
    }
}

/// Failure of an authenticated resource call (userinfo).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Resource request failed: {0}")]
    Network(String),

    #[error("Resource server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The resource server rejected the access token (HTTP 401).
    #[error("Access token rejected by resource server")]
    Unauthorized,

    #[error("Resource response is not valid JSON: {0}")]
    InvalidBody(String),

    #[error("Provider does not advertise '{0}'")]
    MissingEndpoint(&'static str),

    /// No valid access token could be obtained.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Failure reading or writing the persisted session.
///
/// Load-side variants are non-fatal: callers treat them as "no prior session".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Persisted session is corrupt: {0}")]
    Corrupt(String),

    #[error("Persisted session has unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Failed to serialize session: {0}")]
    Serialize(String),
}

impl PersistenceError {
    /// Whether the stored bytes are unusable and should be discarded.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            PersistenceError::Corrupt(_) | PersistenceError::UnsupportedVersion(_)
        )
    }
}

/// Errors surfaced by [`SessionManager`](crate::manager::SessionManager).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Config(#[from] core_runtime::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
