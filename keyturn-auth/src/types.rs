//! Identifier types shared by the token core and its collaborators.

use crate::error::{AuthError, AuthResult};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier owned by the user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Single-use credential authorizing an external identity to be linked
/// to an existing account.
///
/// A non-negative 63-bit integer, rendered as a decimal string at the
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoginKey(i64);

impl LoginKey {
    /// Draw a fresh random non-negative 63-bit key.
    pub fn generate() -> AuthResult<Self> {
        let mut bytes = [0u8; 8];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| AuthError::Crypto(format!("login key generation failed: {}", e)))?;
        Ok(Self((u64::from_be_bytes(bytes) >> 1) as i64))
    }

    /// Wrap a raw value read back from a claim or a store.
    pub fn from_raw(value: i64) -> AuthResult<Self> {
        if value < 0 {
            return Err(AuthError::InvalidLoginKey);
        }
        Ok(Self(value))
    }

    /// Parse the decimal form used at the boundary.
    pub fn parse(s: &str) -> AuthResult<Self> {
        let value: i64 = s.trim().parse().map_err(|_| AuthError::InvalidLoginKey)?;
        Self::from_raw(value)
    }

    /// Raw integer value.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LoginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
