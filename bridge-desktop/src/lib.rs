//! # Desktop Bridge Implementations
//!
//! Desktop (macOS, Windows, Linux) adapters for the host bridges:
//! - `HttpClient` using `reqwest` with rustls
//! - `SecureStore` using the OS keychain via `keyring`
//!
//! There is no desktop `ExternalUserAgent`: intercepting a custom-scheme
//! redirect depends on how the application registers its URL handler, so the
//! host supplies one.
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{KeyringSecureStore, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! let config = ClientConfig::builder()
//!     .http_client(Arc::new(ReqwestHttpClient::new()))
//!     .secure_store(Arc::new(KeyringSecureStore::new("com.example.app")))
//!     // ...
//!     .build()?;
//! ```

mod http;
#[cfg(feature = "secure-store")]
mod secure_store;

pub use http::ReqwestHttpClient;
#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
