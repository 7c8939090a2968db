use std::time::Duration;
use thiserror::Error;

/// Failure reported by a host adapter.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The host cannot provide this capability at all (no browser, no keychain).
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    /// Transport-level failure: DNS, TLS, connection reset, unreadable body.
    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Secure storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
