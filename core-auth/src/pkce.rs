//! Proof Key for Code Exchange (RFC 7636).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;

pub const CODE_CHALLENGE_METHOD: &str = "S256";

const VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 16;

/// Verifier/challenge pair for one login attempt.
///
/// Never persisted; dropped once the code has been exchanged.
///
/// # Examples
///
/// ```
/// use core_auth::pkce::{challenge_for, PkcePair};
///
/// let pair = PkcePair::generate();
/// assert_eq!(pair.challenge(), challenge_for(pair.verifier()));
/// assert_eq!(pair.method(), "S256");
/// ```
#[derive(Clone)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    /// 32 random bytes from the thread-local CSPRNG, base64url encoded (43 chars).
    pub fn generate() -> Self {
        Self::from_verifier(random_token(VERIFIER_BYTES))
    }

    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn method(&self) -> &'static str {
        CODE_CHALLENGE_METHOD
    }
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Fresh opaque anti-forgery `state` value.
pub fn generate_state() -> String {
    random_token(STATE_BYTES)
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill(bytes.as_mut_slice());
    URL_SAFE_NO_PAD.encode(bytes)
}
