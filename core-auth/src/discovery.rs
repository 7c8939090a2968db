//! OpenID Provider discovery.

use bridge_traits::{HttpClient, HttpRequest};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::DiscoveryError;
use crate::transport::execute_bounded;
use crate::types::ProviderConfiguration;

pub const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

/// Metadata document as published; every field optional so that a missing
/// endpoint is reported by name instead of as a parse failure.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: Option<String>,
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    userinfo_endpoint: Option<String>,
    end_session_endpoint: Option<String>,
    jwks_uri: Option<String>,
}

/// `<issuer>/.well-known/openid-configuration`, keeping any issuer path.
pub fn discovery_url(issuer: &Url) -> String {
    format!(
        "{}/{}",
        issuer.as_str().trim_end_matches('/'),
        WELL_KNOWN_PATH
    )
}

/// Resolves an issuer into its [`ProviderConfiguration`].
///
/// One GET per call, no caching and no retry; the caller decides both.
pub struct DiscoveryClient {
    http_client: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl DiscoveryClient {
    pub fn new(http_client: Arc<dyn HttpClient>, timeout: Duration) -> Self {
        Self {
            http_client,
            timeout,
        }
    }

    #[instrument(skip(self), fields(issuer = %issuer))]
    pub async fn discover(&self, issuer: &Url) -> Result<ProviderConfiguration, DiscoveryError> {
        let url = discovery_url(issuer);
        debug!(url = %url, "Fetching provider metadata");

        let response = execute_bounded(
            self.http_client.as_ref(),
            HttpRequest::get(&url).header("Accept", "application/json"),
            self.timeout,
        )
        .await
        .map_err(DiscoveryError::Network)?;

        if !response.is_success() {
            warn!(status = response.status, "Discovery endpoint returned an error status");
            return Err(DiscoveryError::Network(format!(
                "HTTP {} from {}",
                response.status, url
            )));
        }

        let document: DiscoveryDocument = response
            .json()
            .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

        let config = validate(document)?;

        if !config.issuer_matches(issuer.as_str()) {
            warn!(
                advertised = %config.issuer,
                "Discovery document issuer differs from configured issuer"
            );
        }

        debug!(
            has_userinfo = config.userinfo_endpoint.is_some(),
            has_end_session = config.end_session_endpoint.is_some(),
            "Provider metadata resolved"
        );

        Ok(config)
    }
}

fn validate(document: DiscoveryDocument) -> Result<ProviderConfiguration, DiscoveryError> {
    let issuer = required("issuer", document.issuer)?;
    let authorization_endpoint =
        required_url("authorization_endpoint", document.authorization_endpoint)?;
    let token_endpoint = required_url("token_endpoint", document.token_endpoint)?;
    let jwks_uri = required_url("jwks_uri", document.jwks_uri)?;
    let userinfo_endpoint = optional_url("userinfo_endpoint", document.userinfo_endpoint)?;
    let end_session_endpoint =
        optional_url("end_session_endpoint", document.end_session_endpoint)?;

    Ok(ProviderConfiguration {
        issuer,
        authorization_endpoint,
        token_endpoint,
        userinfo_endpoint,
        end_session_endpoint,
        jwks_uri,
    })
}

fn required(name: &'static str, value: Option<String>) -> Result<String, DiscoveryError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(DiscoveryError::MissingEndpoint(name))
}

fn required_url(name: &'static str, value: Option<String>) -> Result<String, DiscoveryError> {
    let value = required(name, value)?;
    check_url(name, &value)?;
    Ok(value)
}

fn optional_url(
    name: &'static str,
    value: Option<String>,
) -> Result<Option<String>, DiscoveryError> {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(v) => {
            check_url(name, &v)?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

fn check_url(name: &str, value: &str) -> Result<(), DiscoveryError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| DiscoveryError::Malformed(format!("{} '{}' is not a URL: {}", name, value, e)))
}
