//! The single source of truth for login status.

use core_runtime::events::{EventBus, SessionEvent};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::persistence::SessionWriter;
use crate::types::{SessionState, TokenSet};

/// Current tokens plus the authorization-error flag.
///
/// Every transition runs under one lock and, when it changes the state,
/// queues a persistence write and then emits [`SessionEvent::StateChanged`]
/// before the lock is released. Transitions to an equal state do neither.
pub struct AuthSession {
    state: Mutex<SessionState>,
    writer: SessionWriter,
    events: EventBus,
}

impl AuthSession {
    pub fn new(initial: SessionState, writer: SessionWriter, events: EventBus) -> Self {
        Self {
            state: Mutex::new(initial),
            writer,
            events,
        }
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub async fn tokens(&self) -> Option<TokenSet> {
        self.state.lock().await.tokens.clone()
    }

    pub async fn is_authorized(&self) -> bool {
        self.state.lock().await.is_authorized()
    }

    /// Install a freshly exchanged or refreshed token set. Clears any
    /// authorization error. Returns whether anything changed.
    pub async fn apply_tokens(&self, tokens: TokenSet) -> bool {
        let mut state = self.state.lock().await;
        self.transition(&mut state, SessionState::with_tokens(tokens))
    }

    /// Flag the tokens as rejected by a resource server, provided the
    /// session still holds the access token the server saw. The tokens stay;
    /// a logged-out or since-replaced session is left alone.
    pub async fn record_authorization_error(
        &self,
        rejected_access_token: &str,
        message: impl Into<String>,
    ) -> bool {
        let mut state = self.state.lock().await;
        match &state.tokens {
            Some(current) if current.access_token == rejected_access_token => {}
            Some(_) => {
                debug!("Rejected access token already replaced; not flagging session");
                return false;
            }
            None => return false,
        }
        let next = SessionState {
            tokens: state.tokens.clone(),
            authorization_error: Some(message.into()),
        };
        self.transition(&mut state, next)
    }

    pub async fn clear(&self) -> bool {
        let mut state = self.state.lock().await;
        self.transition(&mut state, SessionState::empty())
    }

    /// Replace the whole state, e.g. with a snapshot loaded at startup.
    pub async fn restore(&self, restored: SessionState) -> bool {
        let mut state = self.state.lock().await;
        self.transition(&mut state, restored)
    }

    /// Replace the tokens only if the session still holds `expected`.
    ///
    /// `None` logs the session out. Returns `false` without touching
    /// anything when another transition got there first.
    pub async fn swap_tokens_if(&self, expected: &TokenSet, next: Option<TokenSet>) -> bool {
        let mut state = self.state.lock().await;
        if state.tokens.as_ref() != Some(expected) {
            debug!("Session changed underneath; token swap skipped");
            return false;
        }
        let next = next.map(SessionState::with_tokens).unwrap_or_default();
        self.transition(&mut state, next);
        true
    }

    /// Wait for every queued persistence write.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    fn transition(&self, state: &mut MutexGuard<'_, SessionState>, next: SessionState) -> bool {
        if **state == next {
            return false;
        }

        let was_authorized = state.is_authorized();
        **state = next;

        self.writer.enqueue(state.clone());
        let _ = self.events.emit(SessionEvent::StateChanged {
            authorized: state.is_authorized(),
            has_tokens: state.has_tokens(),
            authorization_error: state.authorization_error.clone(),
        });

        if was_authorized != state.is_authorized() {
            info!(authorized = state.is_authorized(), "Session authorization changed");
        }
        true
    }
}
