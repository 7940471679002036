//! PKCE code verifiers (RFC 7636)

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of generated verifiers.
pub const VERIFIER_LEN: usize = 64;

/// A PKCE code verifier.
///
/// Never logged; `Debug` prints `[REDACTED]`.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Draw a fresh verifier of [`VERIFIER_LEN`] alphanumeric characters.
    pub fn generate() -> Self {
        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(VERIFIER_LEN)
            .map(char::from)
            .collect();
        Self(secret)
    }

    /// Wrap a verifier recovered from login state.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The verifier itself.
    pub fn secret(&self) -> &str {
        &self.0
    }

    /// S256 code challenge: `BASE64URL(SHA256(verifier))` without padding.
    pub fn challenge(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}

impl fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PkceVerifier([REDACTED])")
    }
}
