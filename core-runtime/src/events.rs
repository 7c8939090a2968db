//! # Session Event Bus
//!
//! UI-facing notifications for the session core, published on a
//! `tokio::sync::broadcast` channel.
//!
//! Every session transition emits [`SessionEvent::StateChanged`] right after
//! its persistence write has been queued, so a subscriber that renders from
//! these events always sees the state that will be restored on next launch.
//! The remaining variants describe flow progress (login, refresh, logout)
//! for hosts that want finer-grained feedback.
//!
//! ```text
//! ┌──────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ AuthSession  ├────────>│           ├────────────>│  UI layer  │
//! └──────────────┘         │ EventBus  │             └────────────┘
//! ┌──────────────┐  emit   │ (broadcast│  subscribe  ┌────────────┐
//! │ Refresh/Flow ├────────>│  channel) ├────────────>│ Telemetry  │
//! └──────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, EventStream, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut state_changes = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, SessionEvent::StateChanged { .. }));
//!
//! bus.emit(SessionEvent::LoginStarted).ok();
//! bus.emit(SessionEvent::StateChanged {
//!     authorized: true,
//!     has_tokens: true,
//!     authorization_error: None,
//! })
//! .ok();
//!
//! let event = state_changes.recv().await.unwrap();
//! assert!(matches!(event, SessionEvent::StateChanged { authorized: true, .. }));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Non-fatal;
//!   the next `StateChanged` carries the full current state anyway.
//! - **`RecvError::Closed`**: the session manager was dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 64;

/// Notifications published by the session core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// The session changed; carries the full projection the UI renders from.
    StateChanged {
        authorized: bool,
        has_tokens: bool,
        /// Set when a resource server rejected the access token.
        authorization_error: Option<String>,
    },
    /// The login agent is about to be presented.
    LoginStarted,
    /// Login finished and tokens were stored.
    LoginCompleted {
        /// `sub` claim of the new id token, if it could be read.
        subject: Option<String>,
    },
    LoginFailed {
        message: String,
    },
    /// A refresh-token exchange is in flight.
    TokenRefreshing,
    TokenRefreshed {
        /// New access-token expiry (Unix epoch seconds).
        expires_at: i64,
    },
    RefreshFailed {
        message: String,
        /// Whether the failure cleared the session (refresh token rejected).
        session_cleared: bool,
    },
    /// A userinfo document was fetched.
    UserInfoUpdated {
        username: Option<String>,
    },
    /// Local session state was cleared by logout.
    SignedOut,
}

impl SessionEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            SessionEvent::StateChanged { .. } => "Session state changed",
            SessionEvent::LoginStarted => "Login in progress",
            SessionEvent::LoginCompleted { .. } => "Login completed",
            SessionEvent::LoginFailed { .. } => "Login failed",
            SessionEvent::TokenRefreshing => "Refreshing access token",
            SessionEvent::TokenRefreshed { .. } => "Access token refreshed",
            SessionEvent::RefreshFailed { .. } => "Access token refresh failed",
            SessionEvent::UserInfoUpdated { .. } => "User info updated",
            SessionEvent::SignedOut => "Signed out",
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            SessionEvent::LoginFailed { .. } => EventSeverity::Error,
            SessionEvent::RefreshFailed {
                session_cleared: true,
                ..
            } => EventSeverity::Error,
            SessionEvent::RefreshFailed { .. } => EventSeverity::Warning,
            SessionEvent::StateChanged {
                authorization_error: Some(_),
                ..
            } => EventSeverity::Warning,
            SessionEvent::LoginCompleted { .. } | SessionEvent::SignedOut => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Broadcast channel for [`SessionEvent`]s.
///
/// Cloning shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    ///
    /// A subscriber that falls further behind receives `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers, or an error when nobody is
    /// subscribed. Publishers in the core ignore that error.
    pub fn emit(&self, event: SessionEvent) -> Result<usize, SendError<SessionEvent>> {
        self.sender.send(event)
    }

    /// New receiver for all future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&SessionEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
pub struct EventStream {
    receiver: Receiver<SessionEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<SessionEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&SessionEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &SessionEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once every sender is gone.
    pub async fn recv(&mut self) -> Result<SessionEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive; `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<SessionEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
