//! Authorization-code + PKCE login.
//!
//! A login is three steps: [`AuthorizationFlow::begin_login`] builds the
//! one-shot request, [`AuthorizationFlow::present`] hands the URL to the
//! external user agent and awaits the redirect, and
//! [`AuthorizationFlow::complete_login`] validates the callback, exchanges
//! the code and installs the tokens in the [`AuthSession`].
//! [`AuthorizationFlow::login`] runs all three.

use bridge_traits::{ExternalUserAgent, UserAgentOutcome, UserAgentRequest};
use core_runtime::logging::redact_url_query;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{AuthError, AuthFailure, AuthStage};
use crate::pkce::{generate_state, PkcePair};
use crate::session::AuthSession;
use crate::token::TokenEndpoint;
use crate::types::{ProviderConfiguration, TokenSet};

pub const RESPONSE_TYPE_CODE: &str = "code";

/// Query parameters of one authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub code_challenge: String,
    pub code_challenge_method: &'static str,
    pub state: String,
}

impl AuthorizationRequest {
    pub fn response_type(&self) -> &'static str {
        RESPONSE_TYPE_CODE
    }

    pub fn to_url(&self, authorization_endpoint: &str) -> Result<Url, AuthError> {
        let mut url = Url::parse(authorization_endpoint).map_err(|e| {
            AuthError::invalid_response(
                AuthStage::Begin,
                format!("authorization endpoint is not a URL: {}", e),
            )
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", self.response_type())
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", &self.state)
            .append_pair("code_challenge", &self.code_challenge)
            .append_pair("code_challenge_method", self.code_challenge_method);
        Ok(url)
    }
}

/// A login that has been started but not completed.
///
/// Holds the PKCE verifier and the issued `state`; consumed by
/// [`AuthorizationFlow::complete_login`].
#[derive(Debug)]
pub struct PendingLogin {
    provider: Arc<ProviderConfiguration>,
    request: AuthorizationRequest,
    pkce: PkcePair,
    authorization_url: Url,
}

impl PendingLogin {
    pub fn authorization_url(&self) -> &str {
        self.authorization_url.as_str()
    }

    pub fn request(&self) -> &AuthorizationRequest {
        &self.request
    }

    pub fn state(&self) -> &str {
        &self.request.state
    }
}

pub struct AuthorizationFlow {
    token_endpoint: Arc<TokenEndpoint>,
    user_agent: Arc<dyn ExternalUserAgent>,
    session: Arc<AuthSession>,
}

impl AuthorizationFlow {
    pub fn new(
        token_endpoint: Arc<TokenEndpoint>,
        user_agent: Arc<dyn ExternalUserAgent>,
        session: Arc<AuthSession>,
    ) -> Self {
        Self {
            token_endpoint,
            user_agent,
            session,
        }
    }

    /// Fresh PKCE pair and `state`, fixed `response_type=code`.
    pub fn begin_login(
        &self,
        provider: Arc<ProviderConfiguration>,
        client_id: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> Result<PendingLogin, AuthError> {
        let pkce = PkcePair::generate();
        let request = AuthorizationRequest {
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            scopes: scopes.to_vec(),
            code_challenge: pkce.challenge().to_string(),
            code_challenge_method: pkce.method(),
            state: generate_state(),
        };
        let authorization_url = request.to_url(&provider.authorization_endpoint)?;

        debug!(
            url = %redact_url_query(authorization_url.as_str()),
            scopes = %request.scopes.join(" "),
            "Authorization request built"
        );

        Ok(PendingLogin {
            provider,
            request,
            pkce,
            authorization_url,
        })
    }

    /// Show the authorization URL and wait for the redirect.
    pub async fn present(&self, pending: &PendingLogin) -> Result<String, AuthError> {
        let request = UserAgentRequest::new(
            pending.authorization_url(),
            pending.request.redirect_uri.clone(),
        );

        match self.user_agent.present(request).await {
            Ok(UserAgentOutcome::Callback(url)) => Ok(url),
            Ok(UserAgentOutcome::Cancelled) => {
                info!("Login cancelled by user");
                Err(AuthError::new(AuthStage::Callback, AuthFailure::UserCancelled))
            }
            Err(e) => {
                warn!(error = %e, "User agent failed to present login");
                Err(AuthError::new(
                    AuthStage::Begin,
                    AuthFailure::UserAgent(e.to_string()),
                ))
            }
        }
    }

    /// Validate the callback, exchange the code and store the tokens.
    ///
    /// Checked in order: redirect target, `state`, `error`, `code`.
    #[instrument(skip_all)]
    pub async fn complete_login(
        &self,
        pending: PendingLogin,
        callback_url: &str,
    ) -> Result<TokenSet, AuthError> {
        debug!(callback = %redact_url_query(callback_url), "Login callback received");
        let code = validate_callback(&pending, callback_url)?;

        let tokens = self
            .token_endpoint
            .exchange_code(
                &pending.provider,
                &pending.request.client_id,
                &code,
                pending.pkce.verifier(),
                &pending.request.redirect_uri,
            )
            .await?;

        self.session.apply_tokens(tokens.clone()).await;
        info!(subject = ?tokens.subject(), "Login completed");
        Ok(tokens)
    }

    pub async fn login(
        &self,
        provider: Arc<ProviderConfiguration>,
        client_id: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> Result<TokenSet, AuthError> {
        let pending = self.begin_login(provider, client_id, redirect_uri, scopes)?;
        let callback = self.present(&pending).await?;
        self.complete_login(pending, &callback).await
    }
}

fn validate_callback(pending: &PendingLogin, callback_url: &str) -> Result<String, AuthError> {
    let stage = AuthStage::Callback;

    let url = Url::parse(callback_url)
        .map_err(|e| AuthError::invalid_response(stage, format!("callback URL: {}", e)))?;
    let redirect = Url::parse(&pending.request.redirect_uri)
        .map_err(|e| AuthError::invalid_response(stage, format!("redirect URI: {}", e)))?;

    if !targets_redirect(&url, &redirect) {
        return Err(AuthError::invalid_response(
            stage,
            "callback does not target the registered redirect URI",
        ));
    }
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if params.get("state").map(String::as_str) != Some(pending.state()) {
        warn!("Callback state does not match the issued state");
        return Err(AuthError::new(stage, AuthFailure::StateMismatch));
    }

    if let Some(error) = params.get("error") {
        warn!(error = %error, "Provider returned an authorization error");
        return Err(AuthError::new(
            stage,
            AuthFailure::ProviderError {
                error: error.clone(),
                description: params.get("error_description").cloned(),
            },
        ));
    }

    params
        .get("code")
        .filter(|code| !code.is_empty())
        .cloned()
        .ok_or_else(|| AuthError::new(stage, AuthFailure::MissingCode))
}

/// Scheme, authority and path must match exactly; query and fragment are
/// the provider's.
fn targets_redirect(callback: &Url, redirect: &Url) -> bool {
    callback.scheme() == redirect.scheme()
        && callback.username() == redirect.username()
        && callback.host_str() == redirect.host_str()
        && callback.port_or_known_default() == redirect.port_or_known_default()
        && callback.path() == redirect.path()
}
