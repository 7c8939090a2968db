//! Valid-access-token guarantee with single-flight refresh.
//!
//! Callers that find the access token expired (or flagged by a resource
//! server) share one refresh-token exchange. The first caller installs a
//! `watch` channel in the in-flight slot and spawns the exchange; everyone
//! arriving before it finishes subscribes to that channel. The exchange runs
//! on its own task so a caller that gives up cannot strand the others.

use bridge_traits::Clock;
use core_runtime::events::{EventBus, SessionEvent};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, AuthFailure, AuthStage};
use crate::session::AuthSession;
use crate::token::TokenEndpoint;
use crate::types::{ProviderConfiguration, TokenSet};

type Outcome = Option<Result<String, AuthError>>;

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    session: Arc<AuthSession>,
    token_endpoint: Arc<TokenEndpoint>,
    clock: Arc<dyn Clock>,
    client_id: String,
    margin: chrono::Duration,
    events: EventBus,
    in_flight: Mutex<Option<watch::Receiver<Outcome>>>,
}

impl RefreshCoordinator {
    pub fn new(
        session: Arc<AuthSession>,
        token_endpoint: Arc<TokenEndpoint>,
        clock: Arc<dyn Clock>,
        client_id: impl Into<String>,
        refresh_margin: Duration,
        events: EventBus,
    ) -> Self {
        let margin = chrono::Duration::from_std(refresh_margin)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));
        Self {
            inner: Arc::new(Inner {
                session,
                token_endpoint,
                clock,
                client_id: client_id.into(),
                margin,
                events,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// An access token that will not expire within the safety margin.
    ///
    /// Refreshes first when needed; concurrent callers share one refresh and
    /// all observe its outcome.
    #[instrument(skip_all)]
    pub async fn valid_access_token(
        &self,
        provider: &Arc<ProviderConfiguration>,
    ) -> Result<String, AuthError> {
        let mut rx = {
            let mut slot = self.inner.in_flight.lock().await;

            // Read under the slot lock: a refresh that just finished has
            // already installed its tokens.
            let state = self.inner.session.snapshot().await;
            let Some(tokens) = state.tokens else {
                return Err(AuthError::new(AuthStage::Refresh, AuthFailure::NotLoggedIn));
            };

            let flagged = state.authorization_error.is_some();
            if !flagged && !tokens.is_expired_at(self.inner.clock.now(), self.inner.margin) {
                debug!("Access token is fresh");
                return Ok(tokens.access_token);
            }

            if !tokens.has_refresh_token() {
                warn!(flagged, "Access token unusable and no refresh token available");
                return Err(AuthError::new(AuthStage::Refresh, AuthFailure::NoRefreshToken));
            }

            match slot.as_ref() {
                Some(rx) if rx.has_changed().is_ok() => {
                    debug!("Joining in-flight refresh");
                    rx.clone()
                }
                _ => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx.clone());
                    self.spawn_refresh(Arc::clone(provider), tokens, tx);
                    rx
                }
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(AuthError::network(
                AuthStage::Refresh,
                "refresh task ended without an outcome",
            ))
        })
    }

    /// Run `f` with a valid access token.
    pub async fn with_valid_access_token<F, Fut, T>(
        &self,
        provider: &Arc<ProviderConfiguration>,
        f: F,
    ) -> Result<T, AuthError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = T>,
    {
        let token = self.valid_access_token(provider).await?;
        Ok(f(token).await)
    }

    fn spawn_refresh(
        &self,
        provider: Arc<ProviderConfiguration>,
        current: TokenSet,
        tx: watch::Sender<Outcome>,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = inner.refresh(&provider, &current).await;

            let mut slot = inner.in_flight.lock().await;
            *slot = None;
            tx.send_replace(Some(outcome));
        });
    }
}

impl Inner {
    async fn refresh(
        &self,
        provider: &ProviderConfiguration,
        current: &TokenSet,
    ) -> Result<String, AuthError> {
        let _ = self.events.emit(SessionEvent::TokenRefreshing);

        match self
            .token_endpoint
            .refresh(provider, &self.client_id, current)
            .await
        {
            Ok(fresh) => {
                let access_token = fresh.access_token.clone();
                let expires_at = fresh.expires_at.timestamp();

                if self.session.swap_tokens_if(current, Some(fresh)).await {
                    info!("Access token was refreshed automatically");
                    let _ = self.events.emit(SessionEvent::TokenRefreshed { expires_at });
                    return Ok(access_token);
                }

                // Logout or a new login landed while the exchange was in
                // flight; its state wins.
                warn!("Session changed during refresh; refreshed tokens discarded");
                match self.session.tokens().await {
                    Some(tokens) if !tokens.is_expired_at(self.clock.now(), self.margin) => {
                        Ok(tokens.access_token)
                    }
                    _ => Err(AuthError::new(AuthStage::Refresh, AuthFailure::NotLoggedIn)),
                }
            }
            Err(err) => {
                let session_cleared =
                    err.is_invalid_grant() && self.session.swap_tokens_if(current, None).await;
                if session_cleared {
                    warn!("Refresh token rejected; session cleared");
                } else {
                    warn!(error = %err, "Token refresh failed");
                }
                let _ = self.events.emit(SessionEvent::RefreshFailed {
                    message: err.to_string(),
                    session_cleared,
                });
                Err(err)
            }
        }
    }
}
