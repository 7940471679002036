//! Transactional token storage
//!
//! The lifecycle service never talks to a database directly. It opens a
//! [`TokenTransaction`] from a [`TokenStore`], performs its inserts,
//! lookups and deletes against it, and commits or rolls back. Dropping a
//! transaction without committing discards its changes.
//!
//! Backends:
//! - [`memory::MemoryTokenStore`] (feature `memory`, default)
//! - [`postgres::PgTokenStore`] (feature `postgres`)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::UserId;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Storage capability errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not open a transaction
    #[error("failed to begin transaction: {0}")]
    Begin(String),

    /// Commit failed; nothing was applied
    #[error("failed to commit transaction: {0}")]
    Commit(String),

    /// Rollback failed
    #[error("failed to roll back transaction: {0}")]
    Rollback(String),

    /// Unique constraint violated
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    /// Parent row does not exist
    #[error("foreign key violated: {0}")]
    ForeignKey(String),

    /// Any other backend failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persisted refresh token row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    /// Surrogate key
    pub id: i64,
    /// Owning user
    pub user_id: UserId,
    /// Token identifier (unique)
    pub jti: Uuid,
    /// Login session (shared by every rotation)
    pub login_id: Uuid,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Expiry of the token this row backs
    pub expires_at: DateTime<Utc>,
}

/// Persisted access token row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenRecord {
    /// Surrogate key
    pub id: i64,
    /// Refresh token row this access token was minted from
    pub refresh_token_id: i64,
    /// Token identifier (unique)
    pub jti: Uuid,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Expiry of the token this row backs
    pub expires_at: DateTime<Utc>,
}

/// Refresh token row to insert.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: UserId,
    pub jti: Uuid,
    pub login_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Access token row to insert.
#[derive(Debug, Clone)]
pub struct NewAccessToken {
    pub refresh_token_id: i64,
    pub jti: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Token storage capable of opening transactions.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> StoreResult<Box<dyn TokenTransaction>>;

    /// Backend name used in log fields.
    fn backend_name(&self) -> &'static str;
}

/// Unit of work over the token tables.
///
/// All changes become visible together on [`TokenTransaction::commit`],
/// or not at all.
#[async_trait]
pub trait TokenTransaction: Send {
    /// Insert a refresh token row, returning its id.
    async fn insert_refresh_token(&mut self, token: NewRefreshToken) -> StoreResult<i64>;

    /// Insert an access token row, returning its id.
    async fn insert_access_token(&mut self, token: NewAccessToken) -> StoreResult<i64>;

    /// Look up a refresh token row by jti.
    async fn find_refresh_token(&mut self, jti: Uuid) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Look up an access token row by jti.
    async fn find_access_token(&mut self, jti: Uuid) -> StoreResult<Option<AccessTokenRecord>>;

    /// Delete every access token row whose refresh token belongs to the login.
    async fn delete_access_tokens_by_login_id(&mut self, login_id: Uuid) -> StoreResult<u64>;

    /// Delete every refresh token row of the login.
    async fn delete_refresh_tokens_by_login_id(&mut self, login_id: Uuid) -> StoreResult<u64>;

    /// Delete access token rows that expired at or before `cutoff`.
    async fn delete_expired_access_tokens(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Delete refresh token rows that expired at or before `cutoff`,
    /// along with any access token rows still pointing at them.
    async fn delete_expired_refresh_tokens(&mut self, cutoff: DateTime<Utc>)
        -> StoreResult<u64>;

    /// Apply every change made in this transaction.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every change made in this transaction.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
