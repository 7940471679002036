//! Symmetric encryption for secrets carried inside signed tokens
//!
//! Login-state tokens are signed but readable. The PKCE code verifier they
//! carry is encrypted with AES-256-GCM first and hex-encoded for the claim.
//! Wire layout: `nonce (12 bytes) || ciphertext || tag`.

use crate::error::{AuthError, AuthResult};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

/// AES-256-GCM nonce size in bytes.
const NONCE_SIZE: usize = 12;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Encrypts and decrypts short opaque payloads.
pub trait Encrypter: Send + Sync {
    /// Encrypt a payload.
    fn encrypt(&self, plaintext: &[u8]) -> AuthResult<Vec<u8>>;

    /// Decrypt a payload produced by [`Encrypter::encrypt`].
    fn decrypt(&self, ciphertext: &[u8]) -> AuthResult<Vec<u8>>;
}

/// AES-256-GCM [`Encrypter`] with a random nonce per message.
#[derive(Clone)]
pub struct AesGcmEncrypter {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for AesGcmEncrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmEncrypter")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl AesGcmEncrypter {
    /// Create an encrypter from a raw key.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Create an encrypter from a key slice, which must be exactly 32 bytes.
    pub fn from_slice(key: &[u8]) -> AuthResult<Self> {
        let key: [u8; KEY_SIZE] = key.try_into().map_err(|_| {
            AuthError::ConfigError(format!(
                "encryption key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            ))
        })?;
        Ok(Self::new(key))
    }

    fn cipher(&self) -> AuthResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|e| AuthError::Crypto(e.to_string()))
    }
}

impl Encrypter for AesGcmEncrypter {
    fn encrypt(&self, plaintext: &[u8]) -> AuthResult<Vec<u8>> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| AuthError::Crypto(format!("nonce generation failed: {}", e)))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| AuthError::Crypto(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> AuthResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(AuthError::DecryptFailed);
        }

        let cipher = self.cipher()?;
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| AuthError::DecryptFailed)
    }
}
