//! User directory
//!
//! Maps external subjects to users and holds the single-use login keys
//! that authorize linking a new subject to an existing user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyturn_auth::{AuthError, AuthResult, LoginKey, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// User-directory capability.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve the user linked to an external subject.
    ///
    /// Returns [`AuthError::UserNotFound`] when nobody is linked.
    async fn find_user_by_subject(&self, subject: &str) -> AuthResult<UserId>;

    /// Store a login key for a user, replacing any key the user already has.
    async fn save_login_key(
        &self,
        user_id: UserId,
        login_key: LoginKey,
        created_at: DateTime<Utc>,
    ) -> AuthResult<()>;

    /// Consume a login key and link `subject` to its user, atomically.
    ///
    /// Fails with [`AuthError::LoginKeyNotFound`] for an unknown or consumed
    /// key and [`AuthError::SubjectAlreadyLinked`] when either the subject or
    /// the user is already linked. A failed attempt leaves the key in place.
    async fn link_subject_with_login_key(
        &self,
        login_key: LoginKey,
        subject: &str,
    ) -> AuthResult<UserId>;

    /// Remove login keys created at or before `cutoff`.
    async fn delete_login_keys_created_before(&self, cutoff: DateTime<Utc>) -> AuthResult<u64>;
}

#[derive(Debug, Clone, Copy)]
struct IssuedKey {
    user_id: UserId,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct DirectoryTables {
    users_by_subject: HashMap<String, UserId>,
    subjects_by_user: HashMap<UserId, String>,
    login_keys: HashMap<LoginKey, IssuedKey>,
}

/// In-memory user directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserDirectory {
    tables: Arc<Mutex<DirectoryTables>>,
}

impl MemoryUserDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a subject to a user directly.
    pub async fn link(&self, user_id: UserId, subject: impl Into<String>) {
        let subject = subject.into();
        let mut tables = self.tables.lock().await;
        tables.users_by_subject.insert(subject.clone(), user_id);
        tables.subjects_by_user.insert(user_id, subject);
    }

    /// Subject linked to a user, if any.
    pub async fn subject_of(&self, user_id: UserId) -> Option<String> {
        self.tables
            .lock()
            .await
            .subjects_by_user
            .get(&user_id)
            .cloned()
    }

    /// Number of outstanding login keys.
    pub async fn login_key_count(&self) -> usize {
        self.tables.lock().await.login_keys.len()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_user_by_subject(&self, subject: &str) -> AuthResult<UserId> {
        self.tables
            .lock()
            .await
            .users_by_subject
            .get(subject)
            .copied()
            .ok_or(AuthError::UserNotFound)
    }

    async fn save_login_key(
        &self,
        user_id: UserId,
        login_key: LoginKey,
        created_at: DateTime<Utc>,
    ) -> AuthResult<()> {
        let mut tables = self.tables.lock().await;
        tables.login_keys.retain(|_, issued| issued.user_id != user_id);
        tables.login_keys.insert(
            login_key,
            IssuedKey {
                user_id,
                created_at,
            },
        );
        Ok(())
    }

    async fn link_subject_with_login_key(
        &self,
        login_key: LoginKey,
        subject: &str,
    ) -> AuthResult<UserId> {
        let mut tables = self.tables.lock().await;

        let user_id = tables
            .login_keys
            .get(&login_key)
            .map(|issued| issued.user_id)
            .ok_or(AuthError::LoginKeyNotFound)?;

        if tables.users_by_subject.contains_key(subject)
            || tables.subjects_by_user.contains_key(&user_id)
        {
            return Err(AuthError::SubjectAlreadyLinked);
        }

        tables.login_keys.remove(&login_key);
        tables.users_by_subject.insert(subject.to_string(), user_id);
        tables.subjects_by_user.insert(user_id, subject.to_string());
        Ok(user_id)
    }

    async fn delete_login_keys_created_before(&self, cutoff: DateTime<Utc>) -> AuthResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.login_keys.len();
        tables
            .login_keys
            .retain(|_, issued| issued.created_at > cutoff);
        Ok((before - tables.login_keys.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(value: i64) -> LoginKey {
        LoginKey::from_raw(value).unwrap()
    }

    #[tokio::test]
    async fn test_find_user_by_subject() {
        let directory = MemoryUserDirectory::new();
        directory.link(UserId(1), "sub-1").await;

        assert_eq!(directory.find_user_by_subject("sub-1").await.unwrap(), UserId(1));
        assert!(matches!(
            directory.find_user_by_subject("sub-2").await,
            Err(AuthError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_new_key_replaces_previous_key() {
        let directory = MemoryUserDirectory::new();
        directory.save_login_key(UserId(7), key(1), Utc::now()).await.unwrap();
        directory.save_login_key(UserId(7), key(2), Utc::now()).await.unwrap();

        assert_eq!(directory.login_key_count().await, 1);
        assert!(matches!(
            directory.link_subject_with_login_key(key(1), "sub").await,
            Err(AuthError::LoginKeyNotFound)
        ));
        assert_eq!(
            directory.link_subject_with_login_key(key(2), "sub").await.unwrap(),
            UserId(7)
        );
    }

    #[tokio::test]
    async fn test_link_rejects_linked_subject_and_keeps_key() {
        let directory = MemoryUserDirectory::new();
        directory.link(UserId(1), "taken").await;
        directory.save_login_key(UserId(2), key(5), Utc::now()).await.unwrap();

        assert!(matches!(
            directory.link_subject_with_login_key(key(5), "taken").await,
            Err(AuthError::SubjectAlreadyLinked)
        ));
        assert_eq!(directory.login_key_count().await, 1);

        directory.link_subject_with_login_key(key(5), "fresh").await.unwrap();
        assert_eq!(directory.subject_of(UserId(2)).await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_link_rejects_user_with_subject() {
        let directory = MemoryUserDirectory::new();
        directory.link(UserId(3), "first").await;
        directory.save_login_key(UserId(3), key(9), Utc::now()).await.unwrap();

        assert!(matches!(
            directory.link_subject_with_login_key(key(9), "second").await,
            Err(AuthError::SubjectAlreadyLinked)
        ));
    }

    #[tokio::test]
    async fn test_delete_login_keys_created_before() {
        let directory = MemoryUserDirectory::new();
        let now = Utc::now();
        directory
            .save_login_key(UserId(1), key(1), now - Duration::days(2))
            .await
            .unwrap();
        directory.save_login_key(UserId(2), key(2), now).await.unwrap();

        let removed = directory
            .delete_login_keys_created_before(now - Duration::days(1))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(directory.login_key_count().await, 1);
        assert_eq!(
            directory
                .delete_login_keys_created_before(now - Duration::days(1))
                .await
                .unwrap(),
            0
        );
    }
}
