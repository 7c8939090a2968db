//! Session persistence.
//!
//! [`SessionPersistence`] maps a [`SessionState`] to a versioned JSON
//! envelope in the host's [`SecureStore`]:
//!
//! ```json
//! { "version": 1, "session": { "tokens": { ... }, "authorization_error": null } }
//! ```
//!
//! [`SessionWriter`] owns the write side: every snapshot goes through one
//! queue drained by one task, so writes land in the order the transitions
//! happened.

use bridge_traits::SecureStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::types::SessionState;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    session: &'a SessionState,
}

#[derive(Deserialize)]
struct RawEnvelope {
    version: u32,
    session: serde_json::Value,
}

pub struct SessionPersistence {
    store: Arc<dyn SecureStore>,
    key: String,
}

impl SessionPersistence {
    pub fn new(store: Arc<dyn SecureStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn encode(state: &SessionState) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec(&EnvelopeRef {
            version: FORMAT_VERSION,
            session: state,
        })
        .map_err(|e| PersistenceError::Serialize(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<SessionState, PersistenceError> {
        let envelope: RawEnvelope =
            serde_json::from_slice(bytes).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        if envelope.version != FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(envelope.version));
        }
        serde_json::from_value(envelope.session)
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))
    }

    /// Write `state`, logged-out states included.
    pub async fn save(&self, state: &SessionState) -> Result<(), PersistenceError> {
        let bytes = Self::encode(state)?;
        self.store
            .set_secret(&self.key, &bytes)
            .await
            .map_err(|e| PersistenceError::Store(e.to_string()))?;
        debug!(key = %self.key, has_tokens = state.has_tokens(), "Session persisted");
        Ok(())
    }

    /// `Ok(None)` when nothing was ever saved. Corrupt or foreign-version
    /// payloads are reported as such; see [`PersistenceError::is_corrupt`].
    pub async fn load(&self) -> Result<Option<SessionState>, PersistenceError> {
        let bytes = self
            .store
            .get_secret(&self.key)
            .await
            .map_err(|e| PersistenceError::Store(e.to_string()))?;

        match bytes {
            Some(bytes) => Self::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub async fn discard(&self) -> Result<(), PersistenceError> {
        self.store
            .delete_secret(&self.key)
            .await
            .map_err(|e| PersistenceError::Store(e.to_string()))
    }
}

enum WriteCommand {
    Save(SessionState),
    Flush(oneshot::Sender<()>),
}

/// Ordered, fire-and-forget persistence queue.
///
/// Must be created inside a tokio runtime. The background task exits once
/// every handle has been dropped.
#[derive(Clone)]
pub struct SessionWriter {
    tx: mpsc::UnboundedSender<WriteCommand>,
}

impl SessionWriter {
    pub fn spawn(persistence: Arc<SessionPersistence>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    WriteCommand::Save(state) => {
                        if let Err(e) = persistence.save(&state).await {
                            warn!(error = %e, "Failed to persist session snapshot");
                        }
                    }
                    WriteCommand::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!("Session writer stopped");
        });

        Self { tx }
    }

    pub fn enqueue(&self, state: SessionState) {
        if self.tx.send(WriteCommand::Save(state)).is_err() {
            warn!("Session writer has stopped; snapshot not persisted");
        }
    }

    /// Resolves once every snapshot queued before this call has been written.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriteCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}
