//! Token endpoint client: authorization-code and refresh-token grants.

use bridge_traits::{Clock, HttpClient, HttpRequest, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, AuthFailure, AuthStage};
use crate::transport::execute_bounded;
use crate::types::{IdTokenClaims, ProviderConfiguration, TokenSet};

/// Raw token endpoint response. Every field is optional so the missing one
/// can be named in the error.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
}

/// RFC 6749 §5.2 error body.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

pub struct TokenEndpoint {
    http_client: Arc<dyn HttpClient>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenEndpoint {
    pub fn new(http_client: Arc<dyn HttpClient>, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            http_client,
            timeout,
            clock,
        }
    }

    /// Exchange an authorization code (plus PKCE verifier) for a [`TokenSet`].
    ///
    /// The response must carry `access_token`, `expires_in` and an `id_token`
    /// whose `iss` is the provider and whose `aud` contains `client_id`.
    #[instrument(skip(self, config, code, verifier), fields(token_endpoint = %config.token_endpoint))]
    pub async fn exchange_code(
        &self,
        config: &ProviderConfiguration,
        client_id: &str,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, AuthError> {
        let stage = AuthStage::Exchange;
        debug!("Exchanging authorization code for tokens");

        let response = self
            .post(
                config,
                stage,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                    ("client_id", client_id),
                    ("code_verifier", verifier),
                ],
            )
            .await?;

        let access_token = require(stage, "access_token", response.access_token)?;
        let expires_in = response
            .expires_in
            .ok_or_else(|| AuthError::invalid_response(stage, "token response has no expires_in"))?;
        let id_token = require(stage, "id_token", response.id_token)?;
        check_token_type(stage, response.token_type.as_deref())?;
        check_id_token(stage, &id_token, config, client_id)?;
        let expires_at = self.expiry(stage, expires_in)?;

        info!(
            expires_in,
            has_refresh_token = response.refresh_token.is_some(),
            "Authorization code exchanged for tokens"
        );

        Ok(TokenSet {
            access_token,
            refresh_token: response.refresh_token,
            id_token,
            expires_at,
        })
    }

    /// Redeem the refresh token of `current` for a new [`TokenSet`].
    ///
    /// A response without `refresh_token` or `id_token` keeps the previous
    /// values. `invalid_grant` comes back as [`AuthFailure::InvalidGrant`].
    #[instrument(skip(self, config, current), fields(token_endpoint = %config.token_endpoint))]
    pub async fn refresh(
        &self,
        config: &ProviderConfiguration,
        client_id: &str,
        current: &TokenSet,
    ) -> Result<TokenSet, AuthError> {
        let stage = AuthStage::Refresh;
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::new(stage, AuthFailure::NoRefreshToken))?;

        debug!("Refreshing access token");

        let response = self
            .post(
                config,
                stage,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", client_id),
                ],
            )
            .await?;

        let access_token = require(stage, "access_token", response.access_token)?;
        let expires_in = response
            .expires_in
            .ok_or_else(|| AuthError::invalid_response(stage, "token response has no expires_in"))?;
        check_token_type(stage, response.token_type.as_deref())?;
        let expires_at = self.expiry(stage, expires_in)?;

        let id_token = match response.id_token {
            Some(id_token) => {
                check_id_token(stage, &id_token, config, client_id)?;
                id_token
            }
            None => current.id_token.clone(),
        };
        let rotated = response.refresh_token.is_some();

        info!(expires_in, rotated, "Access token refreshed");

        Ok(TokenSet {
            access_token,
            refresh_token: response.refresh_token.or_else(|| current.refresh_token.clone()),
            id_token,
            expires_at,
        })
    }

    async fn post(
        &self,
        config: &ProviderConfiguration,
        stage: AuthStage,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, AuthError> {
        let request = HttpRequest::post(&config.token_endpoint)
            .header("Accept", "application/json")
            .form(params)
            .map_err(|e| AuthError::invalid_response(stage, e.to_string()))?;

        let response = execute_bounded(self.http_client.as_ref(), request, self.timeout)
            .await
            .map_err(|message| {
                warn!(%stage, error = %message, "Token endpoint unreachable");
                AuthError::network(stage, message)
            })?;

        if !response.is_success() {
            return Err(error_from_response(stage, &response));
        }

        response
            .json()
            .map_err(|e| AuthError::invalid_response(stage, format!("token response: {}", e)))
    }

    fn expiry(
        &self,
        stage: AuthStage,
        expires_in: i64,
    ) -> Result<chrono::DateTime<chrono::Utc>, AuthError> {
        chrono::Duration::try_seconds(expires_in.max(0))
            .and_then(|lifetime| self.clock.now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                warn!(%stage, expires_in, "Token lifetime out of range");
                AuthError::invalid_response(stage, "expires_in out of range")
            })
    }
}

fn error_from_response(stage: AuthStage, response: &HttpResponse) -> AuthError {
    let status = response.status;
    match response.json::<OAuthErrorBody>() {
        Ok(body) if stage == AuthStage::Refresh && body.error == "invalid_grant" => {
            warn!(status, "Refresh token rejected by provider");
            AuthError::new(stage, AuthFailure::InvalidGrant)
        }
        Ok(body) => {
            warn!(status, error = %body.error, "Token endpoint returned an OAuth error");
            let detail = match body.error_description {
                Some(description) => format!("{}: {}", body.error, description),
                None => body.error,
            };
            AuthError::invalid_response(
                stage,
                format!("token endpoint returned HTTP {} ({})", status, detail),
            )
        }
        Err(_) => {
            warn!(status, "Token endpoint returned an error status");
            AuthError::invalid_response(
                stage,
                format!(
                    "token endpoint returned HTTP {}: {}",
                    status,
                    response.text_lossy()
                ),
            )
        }
    }
}

fn require(stage: AuthStage, name: &str, value: Option<String>) -> Result<String, AuthError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::invalid_response(stage, format!("token response has no {}", name)))
}

fn check_token_type(stage: AuthStage, token_type: Option<&str>) -> Result<(), AuthError> {
    match token_type {
        Some(t) if !t.eq_ignore_ascii_case("bearer") => Err(AuthError::invalid_response(
            stage,
            format!("unsupported token_type '{}'", t),
        )),
        _ => Ok(()),
    }
}

fn check_id_token(
    stage: AuthStage,
    id_token: &str,
    config: &ProviderConfiguration,
    client_id: &str,
) -> Result<IdTokenClaims, AuthError> {
    let claims =
        IdTokenClaims::decode(id_token).map_err(|e| AuthError::invalid_response(stage, e))?;
    if !config.issuer_matches(&claims.iss) {
        return Err(AuthError::invalid_response(
            stage,
            format!("id token issuer '{}' is not '{}'", claims.iss, config.issuer),
        ));
    }
    if !claims.aud.contains(client_id) {
        return Err(AuthError::invalid_response(
            stage,
            "id token audience does not include the client id",
        ));
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        form_params, id_token_for, jwt, oauth_error, provider, token_response, tokens,
        MockClock, ScriptedHttpClient, CLIENT_ID, ISSUER, REDIRECT_URI,
    };
    use bridge_traits::BridgeError;
    use serde_json::json;

    fn endpoint(http: Arc<ScriptedHttpClient>, clock: Arc<MockClock>) -> TokenEndpoint {
        TokenEndpoint::new(http, Duration::from_secs(5), clock)
    }

    #[tokio::test]
    async fn test_exchange_code_sends_pkce_grant() {
        let http = Arc::new(ScriptedHttpClient::new(|_| {
            Ok(token_response("at-1", Some("rt-1"), 3600))
        }));
        let clock = Arc::new(MockClock::new());
        let tokens = endpoint(http.clone(), clock.clone())
            .exchange_code(&provider(), CLIENT_ID, "code-123", "verifier-abc", REDIRECT_URI)
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(tokens.expires_at, clock.now() + chrono::Duration::seconds(3600));
        assert_eq!(tokens.subject().as_deref(), Some("user-1"));

        let request = &http.requests()[0];
        assert_eq!(request.url, format!("{ISSUER}/oauth2/token"));
        assert_eq!(
            request.header_value("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        let form = form_params(request);
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "code-123");
        assert_eq!(form["code_verifier"], "verifier-abc");
        assert_eq!(form["redirect_uri"], REDIRECT_URI);
        assert_eq!(form["client_id"], CLIENT_ID);
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_is_invalid_response() {
        let http = Arc::new(ScriptedHttpClient::new(|_| {
            Ok(token_response("at-1", Some("rt-1"), 9_000_000_000_000))
        }));
        let err = endpoint(http.clone(), Arc::new(MockClock::new()))
            .exchange_code(&provider(), CLIENT_ID, "c", "v", REDIRECT_URI)
            .await
            .unwrap_err();
        assert_eq!(err.stage, AuthStage::Exchange);
        assert!(matches!(err.reason, AuthFailure::InvalidResponse(ref m) if m.contains("expires_in")));

        let err = endpoint(http, Arc::new(MockClock::new()))
            .refresh(&provider(), CLIENT_ID, &tokens("at-0", Some("rt-0"), chrono::Utc::now()))
            .await
            .unwrap_err();
        assert_eq!(err.stage, AuthStage::Refresh);
        assert!(matches!(err.reason, AuthFailure::InvalidResponse(ref m) if m.contains("expires_in")));
    }

    #[tokio::test]
    async fn test_exchange_requires_id_token_and_expiry() {
        let http = Arc::new(ScriptedHttpClient::new(|_| {
            Ok(HttpResponse::new(
                200,
                json!({"access_token": "at", "expires_in": 60}).to_string(),
            ))
        }));
        let err = endpoint(http, Arc::new(MockClock::new()))
            .exchange_code(&provider(), CLIENT_ID, "c", "v", REDIRECT_URI)
            .await
            .unwrap_err();
        assert_eq!(err.stage, AuthStage::Exchange);
        assert!(matches!(err.reason, AuthFailure::InvalidResponse(ref m) if m.contains("id_token")));

        let http = Arc::new(ScriptedHttpClient::new(|_| {
            Ok(HttpResponse::new(
                200,
                json!({"access_token": "at", "id_token": id_token_for("u")}).to_string(),
            ))
        }));
        let err = endpoint(http, Arc::new(MockClock::new()))
            .exchange_code(&provider(), CLIENT_ID, "c", "v", REDIRECT_URI)
            .await
            .unwrap_err();
        assert!(matches!(err.reason, AuthFailure::InvalidResponse(ref m) if m.contains("expires_in")));
    }

    #[tokio::test]
    async fn test_exchange_rejects_foreign_id_token() {
        let foreign = jwt(json!({
            "iss": ISSUER,
            "sub": "user-1",
            "aud": "someone-else",
            "exp": 4_000_000_000i64,
        }));
        let http = Arc::new(ScriptedHttpClient::new(move |_| {
            Ok(HttpResponse::new(
                200,
                json!({"access_token": "at", "expires_in": 60, "id_token": foreign}).to_string(),
            ))
        }));
        let err = endpoint(http, Arc::new(MockClock::new()))
            .exchange_code(&provider(), CLIENT_ID, "c", "v", REDIRECT_URI)
            .await
            .unwrap_err();
        assert!(matches!(err.reason, AuthFailure::InvalidResponse(ref m) if m.contains("audience")));
    }

    #[tokio::test]
    async fn test_exchange_error_status_is_invalid_response() {
        let http = Arc::new(ScriptedHttpClient::new(|_| Ok(oauth_error(400, "invalid_grant"))));
        let err = endpoint(http, Arc::new(MockClock::new()))
            .exchange_code(&provider(), CLIENT_ID, "c", "v", REDIRECT_URI)
            .await
            .unwrap_err();
        assert_eq!(err.stage, AuthStage::Exchange);
        assert!(matches!(err.reason, AuthFailure::InvalidResponse(ref m) if m.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_tokens_when_not_rotated() {
        let http = Arc::new(ScriptedHttpClient::new(|_| Ok(token_response("at-2", None, 600))));
        let clock = Arc::new(MockClock::new());
        let current = tokens("at-1", Some("rt-1"), clock.now());

        let refreshed = endpoint(http.clone(), clock.clone())
            .refresh(&provider(), CLIENT_ID, &current)
            .await
            .unwrap();

        assert_eq!(refreshed.access_token, "at-2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(refreshed.expires_at, clock.now() + chrono::Duration::seconds(600));

        let form = form_params(&http.requests()[0]);
        assert_eq!(form["grant_type"], "refresh_token");
        assert_eq!(form["refresh_token"], "rt-1");
        assert_eq!(form["client_id"], CLIENT_ID);
    }

    #[tokio::test]
    async fn test_refresh_adopts_rotated_refresh_token() {
        let http = Arc::new(ScriptedHttpClient::new(|_| {
            Ok(token_response("at-2", Some("rt-2"), 600))
        }));
        let clock = Arc::new(MockClock::new());
        let refreshed = endpoint(http, clock.clone())
            .refresh(&provider(), CLIENT_ID, &tokens("at-1", Some("rt-1"), clock.now()))
            .await
            .unwrap();
        assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-2"));
    }

    #[tokio::test]
    async fn test_refresh_invalid_grant() {
        let http = Arc::new(ScriptedHttpClient::new(|_| Ok(oauth_error(400, "invalid_grant"))));
        let clock = Arc::new(MockClock::new());
        let err = endpoint(http, clock.clone())
            .refresh(&provider(), CLIENT_ID, &tokens("at", Some("rt"), clock.now()))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::new(AuthStage::Refresh, AuthFailure::InvalidGrant));
    }

    #[tokio::test]
    async fn test_refresh_server_error_and_transport_failure() {
        let clock = Arc::new(MockClock::new());
        let current = tokens("at", Some("rt"), clock.now());

        let http = Arc::new(ScriptedHttpClient::new(|_| {
            Ok(HttpResponse::new(502, "bad gateway"))
        }));
        let err = endpoint(http, clock.clone())
            .refresh(&provider(), CLIENT_ID, &current)
            .await
            .unwrap_err();
        assert!(matches!(err.reason, AuthFailure::InvalidResponse(ref m) if m.contains("502")));

        let http = Arc::new(ScriptedHttpClient::new(|_| {
            Err(BridgeError::OperationFailed("dns failure".into()))
        }));
        let err = endpoint(http, clock)
            .refresh(&provider(), CLIENT_ID, &current)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::network(AuthStage::Refresh, "Bridge operation failed: dns failure"));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_makes_no_call() {
        let http = Arc::new(ScriptedHttpClient::unreachable());
        let clock = Arc::new(MockClock::new());
        let err = endpoint(http.clone(), clock.clone())
            .refresh(&provider(), CLIENT_ID, &tokens("at", None, clock.now()))
            .await
            .unwrap_err();
        assert_eq!(err.reason, AuthFailure::NoRefreshToken);
        assert!(http.requests().is_empty());
    }
}
