//! RP-initiated logout.

use bridge_traits::{ExternalUserAgent, UserAgentOutcome, UserAgentRequest};
use core_runtime::events::{EventBus, SessionEvent};
use core_runtime::logging::redact_url_query;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{AuthError, AuthFailure, AuthStage};
use crate::pkce::generate_state;
use crate::session::AuthSession;
use crate::types::ProviderConfiguration;

/// How the provider side of a logout went. The local session is cleared
/// in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndSessionOutcome {
    /// The user agent came back through the post-logout redirect.
    ProviderNotified,
    Cancelled,
    ProviderFailed(String),
    /// No end-session endpoint known; only local state was cleared.
    EndpointUnavailable,
}

pub struct EndSessionController {
    session: Arc<AuthSession>,
    user_agent: Arc<dyn ExternalUserAgent>,
    events: EventBus,
}

impl EndSessionController {
    pub fn new(
        session: Arc<AuthSession>,
        user_agent: Arc<dyn ExternalUserAgent>,
        events: EventBus,
    ) -> Self {
        Self {
            session,
            user_agent,
            events,
        }
    }

    /// Clear the session and best-effort notify the provider.
    ///
    /// Needs an id token for the `id_token_hint`; fails with
    /// [`AuthFailure::NotLoggedIn`] without one. Local state is cleared
    /// before the user agent is shown, so an abandoned logout still leaves
    /// the client logged out.
    #[instrument(skip_all)]
    pub async fn logout(
        &self,
        provider: Option<&ProviderConfiguration>,
        post_logout_redirect_uri: &str,
    ) -> Result<EndSessionOutcome, AuthError> {
        let tokens = self
            .session
            .tokens()
            .await
            .ok_or_else(|| AuthError::new(AuthStage::Logout, AuthFailure::NotLoggedIn))?;

        self.session.clear().await;
        let _ = self.events.emit(SessionEvent::SignedOut);
        info!("Local session cleared");

        let Some(endpoint) = provider.and_then(|p| p.end_session_endpoint.as_deref()) else {
            warn!("No end-session endpoint available; provider not notified");
            return Ok(EndSessionOutcome::EndpointUnavailable);
        };

        let state = generate_state();
        let mut url = match Url::parse(endpoint) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "End-session endpoint is not a URL");
                return Ok(EndSessionOutcome::ProviderFailed(e.to_string()));
            }
        };
        url.query_pairs_mut()
            .append_pair("id_token_hint", &tokens.id_token)
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri)
            .append_pair("state", &state);

        debug!(url = %redact_url_query(url.as_str()), "Presenting end-session request");
        let request = UserAgentRequest::new(url.as_str(), post_logout_redirect_uri);
        let outcome = match self.user_agent.present(request).await {
            Ok(UserAgentOutcome::Callback(callback)) => check_callback(&callback, &state),
            Ok(UserAgentOutcome::Cancelled) => EndSessionOutcome::Cancelled,
            Err(e) => EndSessionOutcome::ProviderFailed(e.to_string()),
        };

        match &outcome {
            EndSessionOutcome::ProviderNotified => info!("Provider session ended"),
            other => warn!(outcome = ?other, "Provider logout did not complete"),
        }
        Ok(outcome)
    }
}

fn check_callback(callback: &str, state: &str) -> EndSessionOutcome {
    let Ok(url) = Url::parse(callback) else {
        return EndSessionOutcome::ProviderFailed("unparsable post-logout redirect".into());
    };
    let mut returned_state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" => return EndSessionOutcome::ProviderFailed(value.into_owned()),
            "state" => returned_state = Some(value.into_owned()),
            _ => {}
        }
    }
    match returned_state {
        Some(returned) if returned != state => {
            EndSessionOutcome::ProviderFailed("post-logout state mismatch".into())
        }
        _ => EndSessionOutcome::ProviderNotified,
    }
}
