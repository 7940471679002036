//! Token lifecycle configuration
//!
//! Loaded once at startup from `KEYTURN_*` environment variables and passed
//! by value to every component that needs it.

use crate::crypto::KEY_SIZE;
use crate::error::AuthError;
use crate::jwt::{JwtAlgorithm, JwtConfig, MIN_SECRET_LEN};
use chrono::Duration;
use thiserror::Error;

/// Default login-state lifetime: 15 minutes.
pub const DEFAULT_LOGIN_TTL_SECS: i64 = 15 * 60;
/// Default access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;
/// Default refresh token lifetime: 7 days.
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;
/// Default login key lifetime: 1 day.
pub const DEFAULT_LOGIN_KEY_TTL_SECS: i64 = 24 * 60 * 60;
/// Default `iss` claim.
pub const DEFAULT_ISSUER: &str = "keyturn";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl From<ConfigError> for AuthError {
    fn from(e: ConfigError) -> Self {
        AuthError::ConfigError(e.to_string())
    }
}

/// Keys, algorithm and lifetimes for the token lifecycle.
#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC signing key
    pub signing_key: Vec<u8>,
    /// AES-256 key for secrets carried in login-state tokens
    pub encryption_key: [u8; KEY_SIZE],
    /// JWT algorithm
    pub algorithm: JwtAlgorithm,
    /// `iss` claim
    pub issuer: String,
    /// Login-state token lifetime
    pub login_ttl: Duration,
    /// Access token lifetime
    pub access_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_ttl: Duration,
    /// Lifetime of an unconsumed login key
    pub login_key_ttl: Duration,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("signing_key", &"[REDACTED]")
            .field("encryption_key", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("login_ttl", &self.login_ttl)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("login_key_ttl", &self.login_key_ttl)
            .finish()
    }
}

impl AuthConfig {
    /// Create a configuration with default algorithm, issuer and lifetimes.
    pub fn new(signing_key: Vec<u8>, encryption_key: [u8; KEY_SIZE]) -> Self {
        Self {
            signing_key,
            encryption_key,
            algorithm: JwtAlgorithm::default(),
            issuer: DEFAULT_ISSUER.to_string(),
            login_ttl: Duration::seconds(DEFAULT_LOGIN_TTL_SECS),
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
            login_key_ttl: Duration::seconds(DEFAULT_LOGIN_KEY_TTL_SECS),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `KEYTURN_SIGNING_KEY`: hex HMAC key, at least 32 bytes (required)
    /// - `KEYTURN_ENCRYPTION_KEY`: hex AES-256 key, exactly 32 bytes
    ///   (default: the signing key, when it is exactly 32 bytes)
    /// - `KEYTURN_JWT_ALGORITHM`: HS256, HS384 or HS512 (default: HS512)
    /// - `KEYTURN_ISSUER`: `iss` claim (default: keyturn)
    /// - `KEYTURN_LOGIN_TTL_SECS`: login-state lifetime (default: 900)
    /// - `KEYTURN_ACCESS_TTL_SECS`: access token lifetime (default: 900)
    /// - `KEYTURN_REFRESH_TTL_SECS`: refresh token lifetime (default: 604800)
    /// - `KEYTURN_LOGIN_KEY_TTL_SECS`: login key lifetime (default: 86400)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let signing_key = hex_var(&lookup, "KEYTURN_SIGNING_KEY")?
            .ok_or_else(|| ConfigError::MissingEnvVar("KEYTURN_SIGNING_KEY".to_string()))?;
        if signing_key.len() < MIN_SECRET_LEN {
            return Err(ConfigError::invalid(
                "KEYTURN_SIGNING_KEY",
                format!("must be at least {} bytes", MIN_SECRET_LEN),
            ));
        }

        let encryption_key = match hex_var(&lookup, "KEYTURN_ENCRYPTION_KEY")? {
            Some(bytes) => fixed_key("KEYTURN_ENCRYPTION_KEY", &bytes)?,
            None => fixed_key("KEYTURN_SIGNING_KEY", &signing_key).map_err(|_| {
                ConfigError::MissingEnvVar("KEYTURN_ENCRYPTION_KEY".to_string())
            })?,
        };

        let mut config = Self::new(signing_key, encryption_key);

        if let Some(raw) = lookup("KEYTURN_JWT_ALGORITHM") {
            config.algorithm = JwtAlgorithm::parse(&raw).ok_or_else(|| {
                ConfigError::invalid("KEYTURN_JWT_ALGORITHM", "expected HS256, HS384 or HS512")
            })?;
        }
        if let Some(issuer) = lookup("KEYTURN_ISSUER") {
            config.issuer = issuer;
        }

        config.login_ttl = ttl_var(&lookup, "KEYTURN_LOGIN_TTL_SECS", config.login_ttl)?;
        config.access_ttl = ttl_var(&lookup, "KEYTURN_ACCESS_TTL_SECS", config.access_ttl)?;
        config.refresh_ttl = ttl_var(&lookup, "KEYTURN_REFRESH_TTL_SECS", config.refresh_ttl)?;
        config.login_key_ttl =
            ttl_var(&lookup, "KEYTURN_LOGIN_KEY_TTL_SECS", config.login_key_ttl)?;

        Ok(config)
    }

    /// Signer configuration derived from this config.
    pub fn jwt_config(&self) -> JwtConfig {
        JwtConfig {
            secret: self.signing_key.clone(),
            algorithm: self.algorithm,
            issuer: self.issuer.clone(),
        }
    }
}

fn hex_var<F>(lookup: &F, key: &str) -> Result<Option<Vec<u8>>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| hex::decode(raw.trim()).map_err(|e| ConfigError::invalid(key, e.to_string())))
        .transpose()
}

fn fixed_key(key: &str, bytes: &[u8]) -> Result<[u8; KEY_SIZE], ConfigError> {
    bytes
        .try_into()
        .map_err(|_| ConfigError::invalid(key, format!("must be exactly {} bytes", KEY_SIZE)))
}

fn ttl_var<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => {
            let secs: i64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(key, "expected whole seconds"))?;
            if secs <= 0 {
                return Err(ConfigError::invalid(key, "must be positive"));
            }
            Ok(Duration::seconds(secs))
        }
    }
}
