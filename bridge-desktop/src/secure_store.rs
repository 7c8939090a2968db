//! Session storage in the OS keychain.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tracing::{debug, error};

/// Keyring-backed [`SecureStore`].
///
/// The service name is the store scope (normally the application id), so two
/// applications on one machine never see each other's sessions. Values are
/// base64-encoded because keyring entries hold strings.
///
/// Keychain and Secret Service calls block, so each one runs on tokio's
/// blocking pool.
pub struct KeyringSecureStore {
    service_name: String,
}

impl KeyringSecureStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> std::result::Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service_name.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &key).map_err(keyring_error)?;
            op(entry).map_err(keyring_error)
        })
        .await
        .map_err(|e| BridgeError::Storage(format!("Keyring task failed: {}", e)))?
    }
}

fn keyring_error(e: keyring::Error) -> BridgeError {
    BridgeError::Storage(format!("Keyring error: {}", e))
}

/// `NoEntry` becomes `None`; other errors pass through.
fn optional<T>(result: std::result::Result<T, keyring::Error>) -> std::result::Result<Option<T>, keyring::Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        let encoded = STANDARD.encode(value);
        self.with_entry(key, move |entry| entry.set_password(&encoded))
            .await?;

        debug!(service = %self.service_name, key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(encoded) = self
            .with_entry(key, |entry| optional(entry.get_password()))
            .await?
        else {
            debug!(key, "Secret not found in keyring");
            return Ok(None);
        };

        STANDARD.decode(encoded.as_bytes()).map(Some).map_err(|e| {
            error!(key, error = %e, "Keyring entry is not valid base64");
            BridgeError::Storage(format!("Failed to decode secret: {}", e))
        })
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        let existed = self
            .with_entry(key, |entry| optional(entry.delete_credential()))
            .await?
            .is_some();

        debug!(key, existed, "Deleted secret from keyring");
        Ok(())
    }
}
