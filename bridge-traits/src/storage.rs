//! Session storage contract.
//!
//! The session snapshot is the only thing the core writes. The store is
//! already scoped to the application (keychain service, app-group suite), so
//! the key only needs to be unique within that scope.

use async_trait::async_trait;

use crate::error::Result;

/// Byte-oriented key/value store for credentials.
///
/// Typical backends are the iOS/macOS Keychain, Android Keystore-backed
/// preferences, Windows Credential Manager and the Linux Secret Service.
/// Values are opaque and must never be logged.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SecureStore;
///
/// async fn remember(store: &dyn SecureStore, snapshot: &[u8]) -> Result<()> {
///     store.set_secret("oidc_session_state", snapshot).await
/// }
/// ```
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// `Ok(None)` when nothing was ever stored under `key`.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret. Deleting a missing key is not an error.
    async fn delete_secret(&self, key: &str) -> Result<()>;
}
