//! External User Agent
//!
//! The interactive half of a redirect-based flow: a system browser, an
//! `ASWebAuthenticationSession`, a custom tab. The core hands it a URL and the
//! redirect prefix to intercept and awaits the outcome; it never blocks a
//! thread while the agent is on screen.

use async_trait::async_trait;

use crate::error::Result;

/// What the agent should open and which redirect ends the interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgentRequest {
    /// Authorization or end-session URL to display.
    pub url: String,
    /// Redirect URI prefix; the first navigation starting with it completes the flow.
    pub callback_prefix: String,
}

impl UserAgentRequest {
    pub fn new(url: impl Into<String>, callback_prefix: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            callback_prefix: callback_prefix.into(),
        }
    }

    /// Whether `url` is the redirect this request is waiting for.
    pub fn matches_callback(&self, url: &str) -> bool {
        url.starts_with(&self.callback_prefix)
    }
}

/// How an interactive flow ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAgentOutcome {
    /// The agent intercepted the redirect; carries the full callback URL.
    Callback(String),
    /// The user dismissed the agent.
    Cancelled,
}

/// Presents redirect-based flows to the user.
///
/// Used identically for login and logout. `Err` means the agent itself could
/// not run (no browser, presentation failure); a user dismissal is
/// `Ok(UserAgentOutcome::Cancelled)`.
#[async_trait]
pub trait ExternalUserAgent: Send + Sync {
    async fn present(&self, request: UserAgentRequest) -> Result<UserAgentOutcome>;
}
