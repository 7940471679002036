//! Error types for token lifecycle operations
//!
//! This module defines the errors raised while minting, validating,
//! rotating and revoking tokens, and by the storage capability underneath.

use thiserror::Error;

/// Authentication error types.
///
/// Validation failures (`TokenExpired`, `InvalidSignature`, ...) are
/// recoverable by rejecting the request. Storage and crypto failures are
/// infrastructure errors and report as server errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token has expired
    #[error("Token has expired")]
    TokenExpired,

    /// Token is not valid yet
    #[error("Token is not valid yet")]
    TokenNotYetValid,

    /// Token signature does not verify
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Token is malformed or carries a claim of the wrong shape
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token is missing a required claim
    #[error("Missing required claim: {0}")]
    MissingClaim(String),

    /// Token was issued for a different purpose than the one presented for
    #[error("Token purpose mismatch: expected {expected}, found {found}")]
    WrongPurpose {
        /// Purpose the caller asked for
        expected: &'static str,
        /// Purpose carried by the token
        found: String,
    },

    /// No persisted session matches the presented token.
    ///
    /// Deliberately rendered the same as [`AuthError::Unauthorized`] so a
    /// caller cannot tell a revoked session from a token that never existed.
    #[error("Unauthorized")]
    SessionUnknown,

    /// Caller is not authorized
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// No user is linked to the external subject
    #[error("User not found")]
    UserNotFound,

    /// Login key does not exist or was already consumed
    #[error("Login key not found")]
    LoginKeyNotFound,

    /// External subject is already linked to a user
    #[error("External identity already linked")]
    SubjectAlreadyLinked,

    /// Login key string could not be parsed
    #[error("Invalid login key")]
    InvalidLoginKey,

    /// Encrypted secret could not be decrypted
    #[error("Failed to decrypt secret")]
    DecryptFailed,

    /// Encryption or randomness failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// OAuth provider error
    #[error("OAuth error: {0}")]
    OAuthError(String),

    /// External login is switched off for this deployment
    #[error("Login provider is not enabled")]
    ProviderDisabled,

    /// Storage capability failure
    #[error("Storage error: {0}")]
    Storage(#[from] crate::store::StoreError),

    /// A transaction body failed and the rollback failed as well
    #[error("Transaction failed ({cause}) and rollback failed ({rollback})")]
    RollbackFailed {
        /// Error returned by the transaction body
        cause: Box<AuthError>,
        /// Error returned by the rollback
        rollback: crate::store::StoreError,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Check if this error should be logged at error level.
    ///
    /// Rejected tokens and unknown sessions are expected traffic and
    /// are not server errors.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            AuthError::DecryptFailed
                | AuthError::Crypto(_)
                | AuthError::OAuthError(_)
                | AuthError::Storage(_)
                | AuthError::RollbackFailed { .. }
                | AuthError::ConfigError(_)
                | AuthError::Internal(_)
        )
    }

    /// Check if this error means the presented credential must be rejected.
    pub fn is_unauthorized(&self) -> bool {
        self.status_code() == 401
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::TokenExpired
            | AuthError::TokenNotYetValid
            | AuthError::InvalidSignature
            | AuthError::InvalidToken(_)
            | AuthError::MissingClaim(_)
            | AuthError::WrongPurpose { .. }
            | AuthError::SessionUnknown
            | AuthError::Unauthorized(_) => 401,

            AuthError::UserNotFound | AuthError::LoginKeyNotFound => 404,
            AuthError::SubjectAlreadyLinked => 409,
            AuthError::InvalidLoginKey | AuthError::ProviderDisabled => 400,

            AuthError::DecryptFailed
            | AuthError::Crypto(_)
            | AuthError::OAuthError(_)
            | AuthError::Storage(_)
            | AuthError::RollbackFailed { .. }
            | AuthError::ConfigError(_)
            | AuthError::Internal(_) => 500,
        }
    }

    /// Get error code for API responses.
    ///
    /// Every session-lookup failure shares the `UNAUTHORIZED` code.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenNotYetValid
            | AuthError::InvalidSignature
            | AuthError::InvalidToken(_)
            | AuthError::MissingClaim(_)
            | AuthError::WrongPurpose { .. } => "INVALID_TOKEN",
            AuthError::SessionUnknown | AuthError::Unauthorized(_) => "UNAUTHORIZED",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::LoginKeyNotFound => "LOGIN_KEY_NOT_FOUND",
            AuthError::SubjectAlreadyLinked => "ALREADY_LINKED",
            AuthError::InvalidLoginKey => "INVALID_LOGIN_KEY",
            AuthError::ProviderDisabled => "NOT_ENABLED",
            AuthError::DecryptFailed | AuthError::Crypto(_) => "CRYPTO_ERROR",
            AuthError::OAuthError(_) => "OAUTH_ERROR",
            AuthError::Storage(_) | AuthError::RollbackFailed { .. } => "STORAGE_ERROR",
            AuthError::ConfigError(_) => "CONFIG_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
