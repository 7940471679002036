//! Token repository
//!
//! Durable record of issued refresh and access tokens. Every write goes
//! through [`TokenRepository::with_transaction`], which commits when the
//! body succeeds and rolls back on every other exit path.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::store::{
    AccessTokenRecord, NewAccessToken, NewRefreshToken, RefreshTokenRecord, StoreError,
    TokenStore, TokenTransaction,
};

/// Future returned by a transaction body, borrowing the transaction.
pub type TxFuture<'t, T> = Pin<Box<dyn Future<Output = AuthResult<T>> + Send + 't>>;

/// Rows removed by a family revocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedTokens {
    /// Access token rows deleted
    pub access_tokens: u64,
    /// Refresh token rows deleted
    pub refresh_tokens: u64,
}

impl RevokedTokens {
    /// True when nothing was deleted.
    pub fn is_empty(&self) -> bool {
        self.access_tokens == 0 && self.refresh_tokens == 0
    }
}

/// Rows removed by an expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Access token rows deleted
    pub access_tokens: u64,
    /// Refresh token rows deleted
    pub refresh_tokens: u64,
}

/// Row ids written by a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotatedRows {
    /// New access token row
    pub access_token_id: i64,
    /// New refresh token row
    pub refresh_token_id: i64,
}

/// Access and refresh rows to write in one rotation. The access row's
/// parent is set by the repository.
#[derive(Debug, Clone)]
pub struct Rotation {
    /// Refresh row the presented token resolved to
    pub parent_refresh_token_id: i64,
    /// Access token identifier
    pub access_jti: Uuid,
    /// Access token expiry
    pub access_expires_at: DateTime<Utc>,
    /// Successor refresh row
    pub refresh: NewRefreshToken,
}

/// Token repository over a transactional [`TokenStore`].
#[derive(Clone)]
pub struct TokenRepository {
    store: Arc<dyn TokenStore>,
}

impl std::fmt::Debug for TokenRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRepository")
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

impl TokenRepository {
    /// Create a repository over a store.
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Run `body` inside a transaction.
    ///
    /// Commits when `body` returns `Ok`. When `body` fails the transaction
    /// is rolled back; if the rollback fails too, both errors are returned
    /// as [`AuthError::RollbackFailed`]. A panic or cancellation inside
    /// `body` drops the transaction, which discards its changes.
    pub async fn with_transaction<T, F>(&self, body: F) -> AuthResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn TokenTransaction) -> TxFuture<'t, T> + Send,
    {
        let mut tx = self.store.begin().await?;

        match body(tx.as_mut()).await {
            Ok(value) => {
                tx.commit().await.map_err(|e| {
                    error!(backend = self.store.backend_name(), error = %e, "Commit failed");
                    AuthError::from(e)
                })?;
                Ok(value)
            }
            Err(cause) => match tx.rollback().await {
                Ok(()) => Err(cause),
                Err(rollback) => {
                    error!(
                        backend = self.store.backend_name(),
                        error = %cause,
                        rollback_error = %rollback,
                        "Rollback failed"
                    );
                    Err(AuthError::RollbackFailed {
                        cause: Box::new(cause),
                        rollback,
                    })
                }
            },
        }
    }

    /// Persist a refresh token row.
    pub async fn save_refresh_token(&self, token: NewRefreshToken) -> AuthResult<i64> {
        self.with_transaction(move |tx| {
            Box::pin(async move { Ok(tx.insert_refresh_token(token).await?) })
        })
        .await
    }

    /// Resolve a refresh token row by jti.
    ///
    /// A miss is [`AuthError::SessionUnknown`].
    pub async fn find_refresh_token(&self, jti: Uuid) -> AuthResult<RefreshTokenRecord> {
        self.with_transaction(move |tx| {
            Box::pin(async move {
                tx.find_refresh_token(jti)
                    .await?
                    .ok_or(AuthError::SessionUnknown)
            })
        })
        .await
    }

    /// Resolve an access token row by jti.
    ///
    /// A miss is [`AuthError::SessionUnknown`].
    pub async fn find_access_token(&self, jti: Uuid) -> AuthResult<AccessTokenRecord> {
        self.with_transaction(move |tx| {
            Box::pin(async move {
                tx.find_access_token(jti)
                    .await?
                    .ok_or(AuthError::SessionUnknown)
            })
        })
        .await
    }

    /// Write the access row, then the successor refresh row, atomically.
    ///
    /// A parent row revoked since it was verified is
    /// [`AuthError::SessionUnknown`].
    pub async fn rotate(&self, rotation: Rotation) -> AuthResult<RotatedRows> {
        self.with_transaction(move |tx| {
            Box::pin(async move {
                let access_token_id = tx
                    .insert_access_token(NewAccessToken {
                        refresh_token_id: rotation.parent_refresh_token_id,
                        jti: rotation.access_jti,
                        created_at: rotation.refresh.created_at,
                        expires_at: rotation.access_expires_at,
                    })
                    .await
                    .map_err(|e| match e {
                        StoreError::ForeignKey(_) => AuthError::SessionUnknown,
                        other => AuthError::from(other),
                    })?;
                let refresh_token_id = tx.insert_refresh_token(rotation.refresh).await?;

                Ok(RotatedRows {
                    access_token_id,
                    refresh_token_id,
                })
            })
        })
        .await
    }

    /// Delete every access and refresh row of a login session atomically.
    pub async fn delete_by_login_id(&self, login_id: Uuid) -> AuthResult<RevokedTokens> {
        let revoked = self
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let access_tokens = tx.delete_access_tokens_by_login_id(login_id).await?;
                    let refresh_tokens = tx.delete_refresh_tokens_by_login_id(login_id).await?;
                    Ok(RevokedTokens {
                        access_tokens,
                        refresh_tokens,
                    })
                })
            })
            .await?;

        debug!(
            %login_id,
            access_tokens = revoked.access_tokens,
            refresh_tokens = revoked.refresh_tokens,
            "Deleted token family"
        );
        Ok(revoked)
    }

    /// Delete rows that expired at or before `cutoff`, access rows first.
    pub async fn delete_expired(&self, cutoff: DateTime<Utc>) -> AuthResult<SweepReport> {
        self.with_transaction(move |tx| {
            Box::pin(async move {
                let access_tokens = tx.delete_expired_access_tokens(cutoff).await?;
                let refresh_tokens = tx.delete_expired_refresh_tokens(cutoff).await?;
                Ok(SweepReport {
                    access_tokens,
                    refresh_tokens,
                })
            })
        })
        .await
    }
}
