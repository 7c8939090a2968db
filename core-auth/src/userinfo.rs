use bridge_traits::{HttpClient, HttpRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::ResourceError;
use crate::refresh::RefreshCoordinator;
use crate::session::AuthSession;
use crate::transport::execute_bounded;
use crate::types::{ProviderConfiguration, UserInfo};

/// Authenticated calls to the provider's resource endpoints.
pub struct ResourceClient {
    http_client: Arc<dyn HttpClient>,
    timeout: Duration,
    session: Arc<AuthSession>,
    refresh: RefreshCoordinator,
}

impl ResourceClient {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        timeout: Duration,
        session: Arc<AuthSession>,
        refresh: RefreshCoordinator,
    ) -> Self {
        Self {
            http_client,
            timeout,
            session,
            refresh,
        }
    }

    /// GET the userinfo endpoint with a valid bearer token.
    ///
    /// A 401 flags the session with an authorization error (tokens are
    /// kept) and returns [`ResourceError::Unauthorized`]. No retry.
    #[instrument(skip_all)]
    pub async fn fetch_user_info(
        &self,
        provider: &Arc<ProviderConfiguration>,
    ) -> Result<UserInfo, ResourceError> {
        let endpoint = provider
            .userinfo_endpoint
            .as_deref()
            .ok_or(ResourceError::MissingEndpoint("userinfo_endpoint"))?;

        let (used_token, response) = self
            .refresh
            .with_valid_access_token(provider, |token| async move {
                let request = HttpRequest::get(endpoint)
                    .bearer_token(&token)
                    .header("Accept", "application/json");
                let response = execute_bounded(self.http_client.as_ref(), request, self.timeout).await;
                (token, response)
            })
            .await?;
        let response = response.map_err(ResourceError::Network)?;

        match response.status {
            200..=299 => {
                let info: UserInfo = response
                    .json()
                    .map_err(|e| ResourceError::InvalidBody(e.to_string()))?;
                debug!(claims = info.0.len(), "Userinfo fetched");
                Ok(info)
            }
            401 => {
                warn!("Userinfo rejected the access token");
                self.session
                    .record_authorization_error(&used_token, format!("HTTP 401 from {}", endpoint))
                    .await;
                Err(ResourceError::Unauthorized)
            }
            status => {
                warn!(status, "Userinfo request failed");
                Err(ResourceError::Http {
                    status,
                    body: response.text_lossy(),
                })
            }
        }
    }
}
