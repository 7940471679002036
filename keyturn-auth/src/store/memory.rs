//! In-memory token store
//!
//! Suitable for tests and single-process deployments. A transaction holds
//! the table lock for its whole lifetime and works on a private copy of the
//! tables, so transactions are serialized and uncommitted changes are never
//! observed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    AccessTokenRecord, NewAccessToken, NewRefreshToken, RefreshTokenRecord, StoreError,
    StoreResult, TokenStore, TokenTransaction,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    next_refresh_id: i64,
    next_access_id: i64,
    refresh: BTreeMap<i64, RefreshTokenRecord>,
    access: BTreeMap<i64, AccessTokenRecord>,
    refresh_by_jti: HashMap<Uuid, i64>,
    access_by_jti: HashMap<Uuid, i64>,
}

impl Tables {
    fn remove_access(&mut self, ids: &[i64]) {
        for id in ids {
            if let Some(row) = self.access.remove(id) {
                self.access_by_jti.remove(&row.jti);
            }
        }
    }

    fn remove_refresh(&mut self, ids: &[i64]) {
        // access rows cascade with their parent
        let orphans: Vec<i64> = self
            .access
            .values()
            .filter(|row| ids.contains(&row.refresh_token_id))
            .map(|row| row.id)
            .collect();
        self.remove_access(&orphans);

        for id in ids {
            if let Some(row) = self.refresh.remove(id) {
                self.refresh_by_jti.remove(&row.jti);
            }
        }
    }
}

/// In-memory [`TokenStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every committed refresh token row.
    pub async fn refresh_tokens(&self) -> Vec<RefreshTokenRecord> {
        self.tables.lock().await.refresh.values().cloned().collect()
    }

    /// Snapshot of every committed access token row.
    pub async fn access_tokens(&self) -> Vec<AccessTokenRecord> {
        self.tables.lock().await.access.values().cloned().collect()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn begin(&self) -> StoreResult<Box<dyn TokenTransaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTokenTransaction { guard, working }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Transaction over a [`MemoryTokenStore`].
pub struct MemoryTokenTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl TokenTransaction for MemoryTokenTransaction {
    async fn insert_refresh_token(&mut self, token: NewRefreshToken) -> StoreResult<i64> {
        let tables = &mut self.working;
        if tables.refresh_by_jti.contains_key(&token.jti) {
            return Err(StoreError::Conflict(format!(
                "refresh_tokens.jti {}",
                token.jti
            )));
        }

        tables.next_refresh_id += 1;
        let id = tables.next_refresh_id;
        tables.refresh_by_jti.insert(token.jti, id);
        tables.refresh.insert(
            id,
            RefreshTokenRecord {
                id,
                user_id: token.user_id,
                jti: token.jti,
                login_id: token.login_id,
                created_at: token.created_at,
                expires_at: token.expires_at,
            },
        );
        Ok(id)
    }

    async fn insert_access_token(&mut self, token: NewAccessToken) -> StoreResult<i64> {
        let tables = &mut self.working;
        if !tables.refresh.contains_key(&token.refresh_token_id) {
            return Err(StoreError::ForeignKey(format!(
                "access_tokens.refresh_token_id {}",
                token.refresh_token_id
            )));
        }
        if tables.access_by_jti.contains_key(&token.jti) {
            return Err(StoreError::Conflict(format!(
                "access_tokens.jti {}",
                token.jti
            )));
        }

        tables.next_access_id += 1;
        let id = tables.next_access_id;
        tables.access_by_jti.insert(token.jti, id);
        tables.access.insert(
            id,
            AccessTokenRecord {
                id,
                refresh_token_id: token.refresh_token_id,
                jti: token.jti,
                created_at: token.created_at,
                expires_at: token.expires_at,
            },
        );
        Ok(id)
    }

    async fn find_refresh_token(&mut self, jti: Uuid) -> StoreResult<Option<RefreshTokenRecord>> {
        let tables = &self.working;
        Ok(tables
            .refresh_by_jti
            .get(&jti)
            .and_then(|id| tables.refresh.get(id))
            .cloned())
    }

    async fn find_access_token(&mut self, jti: Uuid) -> StoreResult<Option<AccessTokenRecord>> {
        let tables = &self.working;
        Ok(tables
            .access_by_jti
            .get(&jti)
            .and_then(|id| tables.access.get(id))
            .cloned())
    }

    async fn delete_access_tokens_by_login_id(&mut self, login_id: Uuid) -> StoreResult<u64> {
        let tables = &mut self.working;
        let ids: Vec<i64> = tables
            .access
            .values()
            .filter(|row| {
                tables
                    .refresh
                    .get(&row.refresh_token_id)
                    .is_some_and(|parent| parent.login_id == login_id)
            })
            .map(|row| row.id)
            .collect();
        tables.remove_access(&ids);
        Ok(ids.len() as u64)
    }

    async fn delete_refresh_tokens_by_login_id(&mut self, login_id: Uuid) -> StoreResult<u64> {
        let tables = &mut self.working;
        let ids: Vec<i64> = tables
            .refresh
            .values()
            .filter(|row| row.login_id == login_id)
            .map(|row| row.id)
            .collect();
        tables.remove_refresh(&ids);
        Ok(ids.len() as u64)
    }

    async fn delete_expired_access_tokens(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let tables = &mut self.working;
        let ids: Vec<i64> = tables
            .access
            .values()
            .filter(|row| row.expires_at <= cutoff)
            .map(|row| row.id)
            .collect();
        tables.remove_access(&ids);
        Ok(ids.len() as u64)
    }

    async fn delete_expired_refresh_tokens(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let tables = &mut self.working;
        let ids: Vec<i64> = tables
            .refresh
            .values()
            .filter(|row| row.expires_at <= cutoff)
            .map(|row| row.id)
            .collect();
        tables.remove_refresh(&ids);
        Ok(ids.len() as u64)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTokenTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
