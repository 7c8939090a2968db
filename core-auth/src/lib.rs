//! # OIDC Session Core
//!
//! OpenID Connect client session management for native applications.
//!
//! ## Overview
//!
//! This crate discovers an OpenID provider, runs the authorization-code flow
//! with PKCE through an external user agent, holds the resulting tokens,
//! refreshes an expired access token before it is used, persists the session
//! across restarts and ends it with an RP-initiated logout.
//!
//! ## Components
//!
//! - [`discovery`]: provider metadata resolution
//! - [`pkce`]: verifier/challenge generation
//! - [`session`]: `AuthSession`, the single source of truth for login status
//! - [`flow`]: authorization request, callback validation, code exchange
//! - [`refresh`]: valid-access-token guarantee with single-flight refresh
//! - [`end_session`]: logout
//! - [`persistence`]: versioned snapshot format and ordered writer
//! - [`userinfo`]: authenticated userinfo fetch
//! - [`manager`]: `SessionManager`, which wires all of the above

pub mod discovery;
pub mod end_session;
pub mod error;
pub mod flow;
pub mod manager;
pub mod persistence;
pub mod pkce;
pub mod refresh;
pub mod session;
pub mod token;
pub mod types;
pub mod userinfo;

mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use discovery::DiscoveryClient;
pub use end_session::{EndSessionController, EndSessionOutcome};
pub use error::{
    AuthError, AuthFailure, AuthStage, DiscoveryError, PersistenceError, ResourceError, Result,
    SessionError,
};
pub use flow::{AuthorizationFlow, AuthorizationRequest, PendingLogin};
pub use manager::SessionManager;
pub use persistence::{SessionPersistence, SessionWriter};
pub use pkce::PkcePair;
pub use refresh::RefreshCoordinator;
pub use session::AuthSession;
pub use token::TokenEndpoint;
pub use types::{
    IdTokenClaims, ProviderConfiguration, SessionState, SessionView, TokenSet, UserInfo,
};
pub use userinfo::ResourceClient;
