//! # Session Manager
//!
//! Composition root for one OIDC client session. Owns the single
//! [`AuthSession`] and injects it into the flow, refresh, end-session and
//! resource components; caches the discovered [`ProviderConfiguration`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_auth::SessionManager;
//! use core_runtime::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .client_id("mobile-app")
//!     .issuer("https://id.example.com")
//!     .application_id("com.example.app")
//!     .user_agent(agent)
//!     .build()?;
//!
//! let manager = SessionManager::new(config)?;
//! let view = manager.start().await?;
//! if !view.authorized {
//!     manager.login().await?;
//! }
//! let profile = manager.fetch_user_info().await?;
//! ```

use core_runtime::config::ClientConfig;
use core_runtime::events::{EventBus, EventStream, SessionEvent};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::discovery::DiscoveryClient;
use crate::end_session::{EndSessionController, EndSessionOutcome};
use crate::error::{AuthError, AuthFailure, AuthStage, Result};
use crate::flow::AuthorizationFlow;
use crate::persistence::{SessionPersistence, SessionWriter};
use crate::refresh::RefreshCoordinator;
use crate::session::AuthSession;
use crate::token::TokenEndpoint;
use crate::types::{ProviderConfiguration, SessionState, SessionView, TokenSet, UserInfo};
use crate::userinfo::ResourceClient;

pub struct SessionManager {
    config: ClientConfig,
    events: EventBus,
    session: Arc<AuthSession>,
    persistence: Arc<SessionPersistence>,
    discovery: DiscoveryClient,
    provider: RwLock<Option<Arc<ProviderConfiguration>>>,
    flow: AuthorizationFlow,
    refresh: RefreshCoordinator,
    end_session: EndSessionController,
    resources: ResourceClient,
    login_in_progress: AtomicBool,
    user_info: RwLock<Option<UserInfo>>,
}

impl SessionManager {
    /// Wire every component around one empty [`AuthSession`].
    ///
    /// Must be called from within a tokio runtime (the persistence writer is
    /// a spawned task).
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(core_runtime::Error::Config(
                "SessionManager must be created inside a tokio runtime".to_string(),
            )
            .into());
        }

        let events = EventBus::new(config.event_buffer);
        let persistence = Arc::new(SessionPersistence::new(
            config.secure_store.clone(),
            config.storage_key.clone(),
        ));
        let session = Arc::new(AuthSession::new(
            SessionState::empty(),
            SessionWriter::spawn(persistence.clone()),
            events.clone(),
        ));

        let token_endpoint = Arc::new(TokenEndpoint::new(
            config.http_client.clone(),
            config.request_timeout,
            config.clock.clone(),
        ));
        let refresh = RefreshCoordinator::new(
            session.clone(),
            token_endpoint.clone(),
            config.clock.clone(),
            config.client_id.clone(),
            config.refresh_margin,
            events.clone(),
        );

        Ok(Self {
            discovery: DiscoveryClient::new(config.http_client.clone(), config.request_timeout),
            flow: AuthorizationFlow::new(token_endpoint, config.user_agent.clone(), session.clone()),
            end_session: EndSessionController::new(
                session.clone(),
                config.user_agent.clone(),
                events.clone(),
            ),
            resources: ResourceClient::new(
                config.http_client.clone(),
                config.request_timeout,
                session.clone(),
                refresh.clone(),
            ),
            refresh,
            provider: RwLock::new(None),
            login_in_progress: AtomicBool::new(false),
            user_info: RwLock::new(None),
            persistence,
            session,
            events,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Restore, discover, then re-validate a restored session.
    ///
    /// The restore always happens; a discovery failure is returned after it.
    /// Re-validation failures are logged only.
    #[instrument(skip(self), fields(issuer = %self.config.issuer))]
    pub async fn start(&self) -> Result<SessionView> {
        let restored = self.restore().await;

        let provider = self.discover().await?;

        // A session flagged by a 401 is re-validated too; the refresh it
        // forces can recover it.
        if restored.has_tokens() {
            let revalidated = if provider.userinfo_endpoint.is_some() {
                self.fetch_user_info().await.map(|_| ())
            } else {
                self.refresh
                    .valid_access_token(&provider)
                    .await
                    .map(|_| ())
                    .map_err(Into::into)
            };
            if let Err(e) = revalidated {
                warn!(error = %e, "Restored session could not be re-validated");
            }
        }

        Ok(self.view().await)
    }

    /// Load the persisted session into [`AuthSession`].
    ///
    /// Missing, unreadable or corrupt data yields an empty session; corrupt
    /// data is also deleted from the store.
    pub async fn restore(&self) -> SessionState {
        match self.persistence.load().await {
            Ok(Some(state)) => {
                info!(authorized = state.is_authorized(), "Persisted session restored");
                self.session.restore(state).await;
            }
            Ok(None) => debug!("No persisted session"),
            Err(e) if e.is_corrupt() => {
                warn!(error = %e, "Discarding corrupt persisted session");
                if let Err(e) = self.persistence.discard().await {
                    warn!(error = %e, "Failed to delete corrupt session");
                }
            }
            Err(e) => warn!(error = %e, "Persisted session unavailable"),
        }
        self.session.snapshot().await
    }

    /// Cached provider configuration, discovering on first use.
    pub async fn discover(&self) -> Result<Arc<ProviderConfiguration>> {
        if let Some(provider) = self.provider.read().await.as_ref() {
            return Ok(provider.clone());
        }
        self.rediscover().await
    }

    /// Fetch the discovery document again and replace the cache.
    pub async fn rediscover(&self) -> Result<Arc<ProviderConfiguration>> {
        let provider = Arc::new(self.discovery.discover(&self.config.issuer).await?);
        *self.provider.write().await = Some(provider.clone());
        Ok(provider)
    }

    /// Interactive login. A second call while one is pending fails with
    /// [`AuthFailure::LoginInProgress`].
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<SessionView> {
        let _guard = LoginGuard::acquire(&self.login_in_progress).ok_or_else(|| {
            warn!("Login already in progress");
            AuthError::new(AuthStage::Begin, AuthFailure::LoginInProgress)
        })?;

        let provider = self.discover().await?;
        let _ = self.events.emit(SessionEvent::LoginStarted);

        let tokens: TokenSet = match self
            .flow
            .login(
                provider,
                &self.config.client_id,
                &self.config.redirect_uri,
                &self.config.scopes,
            )
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                let _ = self.events.emit(SessionEvent::LoginFailed {
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };

        *self.user_info.write().await = None;
        let _ = self.events.emit(SessionEvent::LoginCompleted {
            subject: tokens.subject(),
        });

        if let Err(e) = self.fetch_user_info().await {
            warn!(error = %e, "Userinfo fetch after login failed");
        }

        Ok(self.view().await)
    }

    /// Clear the session and best-effort end it at the provider.
    ///
    /// Local state is cleared even if discovery fails.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<EndSessionOutcome> {
        let provider = match self.discover().await {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!(error = %e, "Discovery failed; logging out locally only");
                None
            }
        };

        *self.user_info.write().await = None;
        let outcome = self
            .end_session
            .logout(provider.as_deref(), &self.config.post_logout_redirect_uri)
            .await?;
        Ok(outcome)
    }

    /// Fetch userinfo with a valid access token and remember it for
    /// [`view`](Self::view).
    pub async fn fetch_user_info(&self) -> Result<UserInfo> {
        let provider = self.discover().await?;
        let info = self.resources.fetch_user_info(&provider).await?;

        *self.user_info.write().await = Some(info.clone());
        let _ = self.events.emit(SessionEvent::UserInfoUpdated {
            username: info.username().map(str::to_string),
        });
        Ok(info)
    }

    pub async fn valid_access_token(&self) -> Result<String> {
        let provider = self.discover().await?;
        Ok(self.refresh.valid_access_token(&provider).await?)
    }

    /// Run `f` with an access token that is valid for at least the refresh
    /// margin.
    pub async fn with_valid_access_token<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = T>,
    {
        let provider = self.discover().await?;
        Ok(self.refresh.with_valid_access_token(&provider, f).await?)
    }

    pub async fn session_state(&self) -> SessionState {
        self.session.snapshot().await
    }

    pub async fn view(&self) -> SessionView {
        let state = self.session.snapshot().await;
        let user_info = self.user_info.read().await;
        SessionView::project(&state, user_info.as_ref())
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    /// Wait until every session transition so far has been persisted.
    pub async fn flush(&self) {
        self.session.flush().await;
    }
}

struct LoginGuard<'a>(&'a AtomicBool);

impl<'a> LoginGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
