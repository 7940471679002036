//! # Keyturn Authentication Core
//!
//! Token lifecycle for the keyturn authentication service: signed login
//! state that survives an OAuth2 redirect without server-side storage, and
//! refresh/access tokens that rotate on use and can be revoked per login
//! session.
//!
//! ## Overview
//!
//! - **Claims**: typed claim sets tagged by purpose, encoded to and decoded
//!   from a generic claim map
//! - **JWT**: HMAC signing and verification with a pinned algorithm
//! - **Crypto**: AES-256-GCM encryption of the PKCE verifier carried in
//!   login state
//! - **Store**: transactional token storage (memory, PostgreSQL)
//! - **Service**: mint, verify, rotate, revoke, sweep
//!
//! ## Features
//!
//! - `memory` (default): in-memory token store
//! - `postgres`: PostgreSQL token store using sqlx
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn run() -> keyturn_auth::AuthResult<()> {
//! use keyturn_auth::{AuthConfig, MemoryTokenStore, TokenService, UserId};
//! use std::sync::Arc;
//!
//! let config = AuthConfig::from_env()?;
//! let service = TokenService::from_config(config, Arc::new(MemoryTokenStore::new()))?;
//!
//! let session = service.create_refresh_token(UserId(42)).await?;
//! let verified = service.verify_refresh_token(&session.refresh_token).await?;
//! let rotated = service.refresh_token(&verified).await?;
//!
//! service.invalidate_tokens(rotated.login_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod claims;
pub mod config;
pub mod crypto;
pub mod error;
pub mod jwt;
pub mod repository;
pub mod service;
pub mod store;
pub mod types;

// Re-export main types
pub use claims::{
    AccessTokenClaims, BaseClaims, ClaimMap, Claims, FirstLoginStateClaims, LoginState,
    LoginStateClaims, LoginStateKind, RefreshTokenClaims, TokenClaims, TokenPurpose,
};
pub use config::{AuthConfig, ConfigError};
pub use crypto::{AesGcmEncrypter, Encrypter};
pub use error::{AuthError, AuthResult};
pub use jwt::{JwtAlgorithm, JwtConfig, JwtSigner, TokenSigner};
pub use repository::{RevokedTokens, SweepReport, TokenRepository};
pub use service::{IssuedSession, RefreshedTokens, TokenService, VerifiedSession};
pub use store::{StoreError, StoreResult, TokenStore, TokenTransaction};
pub use types::{LoginKey, UserId};

#[cfg(feature = "memory")]
pub use store::memory::MemoryTokenStore;

#[cfg(feature = "postgres")]
pub use store::postgres::PgTokenStore;
