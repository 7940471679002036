//! Access-log recorders
//!
//! Recording is an append behind [`AccessLogRecorder`]. Callers decide
//! whether a failed append fails the request.

use crate::types::AccessLogEntry;
use async_trait::async_trait;
use keyturn_auth::{AuthError, UserId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Access-log error types.
#[derive(Debug, Error)]
pub enum AccessLogError {
    /// Failed to persist the entry
    #[error("Failed to record access log entry: {0}")]
    RecordError(String),
}

impl From<AccessLogError> for AuthError {
    fn from(e: AccessLogError) -> Self {
        AuthError::Internal(e.to_string())
    }
}

/// Result type for access-log operations.
pub type AccessLogResult<T> = Result<T, AccessLogError>;

/// Appends access-log entries.
#[async_trait]
pub trait AccessLogRecorder: Send + Sync {
    /// Append an entry.
    async fn record(&self, entry: AccessLogEntry) -> AccessLogResult<()>;
}

/// In-memory access log.
///
/// Suitable for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccessLog {
    entries: Arc<RwLock<Vec<AccessLogEntry>>>,
}

impl MemoryAccessLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded entry, oldest first.
    pub async fn entries(&self) -> Vec<AccessLogEntry> {
        self.entries.read().await.clone()
    }

    /// Entries recorded for one user, oldest first.
    pub async fn entries_for_user(&self, user_id: UserId) -> Vec<AccessLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Number of recorded entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when nothing has been recorded.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AccessLogRecorder for MemoryAccessLog {
    async fn record(&self, entry: AccessLogEntry) -> AccessLogResult<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }
}

/// Access log that emits each entry as a structured `tracing` event under
/// the `keyturn::access_log` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAccessLog;

#[async_trait]
impl AccessLogRecorder for TracingAccessLog {
    async fn record(&self, entry: AccessLogEntry) -> AccessLogResult<()> {
        let client_ip = entry.client_ip.map(|ip| ip.to_string());
        info!(
            target: "keyturn::access_log",
            entry_id = %entry.id,
            user_id = %entry.user_id,
            action = entry.action.as_str(),
            login_id = %entry.login_id,
            client_ip = client_ip.as_deref(),
            user_agent = %entry.user_agent,
            created_at = %entry.created_at,
            "Access"
        );
        Ok(())
    }
}
