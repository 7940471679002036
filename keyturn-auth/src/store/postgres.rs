//! PostgreSQL token store
//!
//! Tables:
//! - `refresh_tokens (id, user_id, jti UNIQUE, login_id, created_at, expires_at)`
//! - `access_tokens (id, refresh_token_id -> refresh_tokens ON DELETE CASCADE,
//!   jti UNIQUE, created_at, expires_at)`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, Postgres};
use sqlx::Transaction;
use uuid::Uuid;

use super::{
    AccessTokenRecord, NewAccessToken, NewRefreshToken, RefreshTokenRecord, StoreError,
    StoreResult, TokenStore, TokenTransaction,
};
use crate::types::UserId;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        id          BIGSERIAL PRIMARY KEY,
        user_id     BIGINT      NOT NULL,
        jti         UUID        NOT NULL UNIQUE,
        login_id    UUID        NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        expires_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS refresh_tokens_login_id_idx ON refresh_tokens (login_id)",
    "CREATE INDEX IF NOT EXISTS refresh_tokens_expires_at_idx ON refresh_tokens (expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS access_tokens (
        id                BIGSERIAL PRIMARY KEY,
        refresh_token_id  BIGINT      NOT NULL REFERENCES refresh_tokens (id) ON DELETE CASCADE,
        jti               UUID        NOT NULL UNIQUE,
        created_at        TIMESTAMPTZ NOT NULL,
        expires_at        TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS access_tokens_refresh_token_id_idx ON access_tokens (refresh_token_id)",
    "CREATE INDEX IF NOT EXISTS access_tokens_expires_at_idx ON access_tokens (expires_at)",
];

type RefreshRow = (i64, i64, Uuid, Uuid, DateTime<Utc>, DateTime<Utc>);
type AccessRow = (i64, i64, Uuid, DateTime<Utc>, DateTime<Utc>);

fn refresh_from_row(row: RefreshRow) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id: row.0,
        user_id: UserId(row.1),
        jti: row.2,
        login_id: row.3,
        created_at: row.4,
        expires_at: row.5,
    }
}

fn access_from_row(row: AccessRow) -> AccessTokenRecord {
    AccessTokenRecord {
        id: row.0,
        refresh_token_id: row.1,
        jti: row.2,
        created_at: row.3,
        expires_at: row.4,
    }
}

fn map_db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(db_err.message().to_string());
        }
        if db_err.is_foreign_key_violation() {
            return StoreError::ForeignKey(db_err.message().to_string());
        }
    }
    StoreError::Backend(e.to_string())
}

/// PostgreSQL-backed [`TokenStore`].
#[derive(Debug, Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the token tables if they do not exist.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn begin(&self) -> StoreResult<Box<dyn TokenTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Begin(e.to_string()))?;
        Ok(Box::new(PgTokenTransaction { tx }))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// Transaction over a [`PgTokenStore`]. Rolled back by sqlx on drop.
pub struct PgTokenTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TokenTransaction for PgTokenTransaction {
    async fn insert_refresh_token(&mut self, token: NewRefreshToken) -> StoreResult<i64> {
        sqlx::query_scalar(
            r#"
            INSERT INTO refresh_tokens (user_id, jti, login_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(token.user_id.0)
        .bind(token.jti)
        .bind(token.login_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_err)
    }

    async fn insert_access_token(&mut self, token: NewAccessToken) -> StoreResult<i64> {
        sqlx::query_scalar(
            r#"
            INSERT INTO access_tokens (refresh_token_id, jti, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(token.refresh_token_id)
        .bind(token.jti)
        .bind(token.created_at)
        .bind(token.expires_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_err)
    }

    async fn find_refresh_token(&mut self, jti: Uuid) -> StoreResult<Option<RefreshTokenRecord>> {
        let row: Option<RefreshRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, jti, login_id, created_at, expires_at
            FROM refresh_tokens
            WHERE jti = $1
            "#,
        )
        .bind(jti)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_err)?;

        Ok(row.map(refresh_from_row))
    }

    async fn find_access_token(&mut self, jti: Uuid) -> StoreResult<Option<AccessTokenRecord>> {
        let row: Option<AccessRow> = sqlx::query_as(
            r#"
            SELECT id, refresh_token_id, jti, created_at, expires_at
            FROM access_tokens
            WHERE jti = $1
            "#,
        )
        .bind(jti)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_err)?;

        Ok(row.map(access_from_row))
    }

    async fn delete_access_tokens_by_login_id(&mut self, login_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM access_tokens
            WHERE refresh_token_id IN (
                SELECT id FROM refresh_tokens WHERE login_id = $1
            )
            "#,
        )
        .bind(login_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_err)?;

        Ok(result.rows_affected())
    }

    async fn delete_refresh_tokens_by_login_id(&mut self, login_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE login_id = $1")
            .bind(login_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected())
    }

    async fn delete_expired_access_tokens(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE expires_at <= $1")
            .bind(cutoff)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected())
    }

    async fn delete_expired_refresh_tokens(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(cutoff)
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Commit(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::Rollback(e.to_string()))
    }
}
