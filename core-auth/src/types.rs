use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Endpoints and metadata published by an OpenID provider.
///
/// Fetched once by [`DiscoveryClient`](crate::discovery::DiscoveryClient) and
/// immutable afterwards; the session manager caches it until an explicit
/// re-discovery.
///
/// # Examples
///
/// ```
/// use core_auth::ProviderConfiguration;
///
/// let config = ProviderConfiguration {
///     issuer: "https://id.example.com".into(),
///     authorization_endpoint: "https://id.example.com/authorize".into(),
///     token_endpoint: "https://id.example.com/token".into(),
///     userinfo_endpoint: Some("https://id.example.com/userinfo".into()),
///     end_session_endpoint: None,
///     jwks_uri: "https://id.example.com/jwks".into(),
/// };
/// assert!(!config.supports_end_session());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
    pub end_session_endpoint: Option<String>,
    /// Signing keys reference; recorded, not fetched.
    pub jwks_uri: String,
}

impl ProviderConfiguration {
    pub fn supports_end_session(&self) -> bool {
        self.end_session_endpoint.is_some()
    }

    /// Issuer comparison that ignores a trailing slash.
    pub fn issuer_matches(&self, other: &str) -> bool {
        self.issuer.trim_end_matches('/') == other.trim_end_matches('/')
    }
}

/// Tokens obtained from one successful exchange or refresh.
///
/// Replaced as a whole; never partially updated. `Debug` output redacts every
/// credential.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use core_auth::TokenSet;
///
/// let tokens = TokenSet {
///     access_token: "at".into(),
///     refresh_token: Some("rt".into()),
///     id_token: "header.payload.signature".into(),
///     expires_at: Utc::now() + Duration::seconds(5),
/// };
///
/// // Within the safety margin counts as expired.
/// assert!(tokens.is_expired_at(Utc::now(), Duration::seconds(10)));
/// assert!(!format!("{:?}", tokens).contains("\"rt\""));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    /// Present only when `offline_access` was granted.
    pub refresh_token: Option<String>,
    pub id_token: String,
    /// Access-token expiry.
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    /// Whether the access token expires within `margin` of `now`.
    ///
    /// An expiry too close to the representable range to subtract `margin`
    /// from counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at.checked_sub_signed(margin) {
            Some(deadline) => deadline <= now,
            None => true,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Unverified claims of the id token.
    pub fn id_token_claims(&self) -> Result<IdTokenClaims, String> {
        IdTokenClaims::decode(&self.id_token)
    }

    /// `sub` claim of the id token, if it can be decoded.
    pub fn subject(&self) -> Option<String> {
        self.id_token_claims().ok().map(|claims| claims.sub)
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("id_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// `aud` is either a single string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == client_id,
            Audience::Multiple(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }
}

/// Claims carried by an id token.
///
/// Decoded from the JWT payload without verifying the signature; they are
/// used for issuer/audience sanity checks and for display, never for
/// authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IdTokenClaims {
    pub fn decode(jwt: &str) -> Result<Self, String> {
        let mut segments = jwt.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err("id token is not a three-part JWT".to_string());
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| format!("id token payload is not base64url: {}", e))?;

        serde_json::from_slice(&bytes).map_err(|e| format!("id token claims are invalid: {}", e))
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Claims returned by the userinfo endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserInfo(pub Map<String, Value>);

impl UserInfo {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Display name: `username`, falling back to `preferred_username`, then `name`.
    pub fn username(&self) -> Option<&str> {
        ["username", "preferred_username", "name"]
            .iter()
            .find_map(|key| self.0.get(*key).and_then(Value::as_str))
    }

    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }

    /// Key/value pairs for display, sorted by key. Non-string values are rendered as JSON.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .0
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// Snapshot of the authentication session.
///
/// Absent tokens mean logged out. A set `authorization_error` means a
/// resource server rejected the access token; the tokens are kept so the
/// session can recover through refresh or re-login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub tokens: Option<TokenSet>,
    #[serde(default)]
    pub authorization_error: Option<String>,
}

impl SessionState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenSet) -> Self {
        Self {
            tokens: Some(tokens),
            authorization_error: None,
        }
    }

    /// Tokens present and no declared authorization error.
    pub fn is_authorized(&self) -> bool {
        self.tokens.is_some() && self.authorization_error.is_none()
    }

    pub fn has_tokens(&self) -> bool {
        self.tokens.is_some()
    }
}

/// What the UI renders: always derived from [`SessionState`] plus the last
/// fetched [`UserInfo`], never mutated on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub authorized: bool,
    pub username: Option<String>,
    pub profile: Vec<(String, String)>,
}

impl SessionView {
    pub fn project(state: &SessionState, user_info: Option<&UserInfo>) -> Self {
        let user_info = user_info.filter(|_| state.has_tokens());
        Self {
            authorized: state.is_authorized(),
            username: user_info.and_then(|info| info.username().map(str::to_string)),
            profile: user_info.map(UserInfo::entries).unwrap_or_default(),
        }
    }
}
