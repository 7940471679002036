//! Access-log event types
//!
//! One [`AccessLogEntry`] is recorded for every login, identity link,
//! token refresh and logout.

use chrono::{DateTime, Utc};
use keyturn_auth::UserId;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Maximum stored user-agent length in bytes.
pub const MAX_USER_AGENT_LEN: usize = 255;

/// Kind of access being logged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccessLogAction {
    /// Returning-user login
    Login,
    /// Logout
    Logout,
    /// Login that linked a new external identity
    FirstLogin,
    /// Refresh token rotation
    RefreshToken,
}

impl AccessLogAction {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLogAction::Login => "login",
            AccessLogAction::Logout => "logout",
            AccessLogAction::FirstLogin => "first_login",
            AccessLogAction::RefreshToken => "refresh_token",
        }
    }
}

impl std::fmt::Display for AccessLogAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request metadata attached to access-log entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client IP address, when known
    pub ip: Option<IpAddr>,
    /// Raw `User-Agent` header
    pub user_agent: String,
}

impl ClientInfo {
    /// Create client info.
    pub fn new(ip: Option<IpAddr>, user_agent: impl Into<String>) -> Self {
        Self {
            ip,
            user_agent: user_agent.into(),
        }
    }
}

/// One access-log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Unique entry ID
    pub id: Uuid,
    /// User the access belongs to
    pub user_id: UserId,
    /// What happened
    pub action: AccessLogAction,
    /// Login session the access belongs to
    pub login_id: Uuid,
    /// Client IP address
    pub client_ip: Option<IpAddr>,
    /// User agent, at most [`MAX_USER_AGENT_LEN`] bytes
    pub user_agent: String,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
}

impl AccessLogEntry {
    /// Create an entry with no client metadata.
    pub fn new(user_id: UserId, action: AccessLogAction, login_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            action,
            login_id,
            client_ip: None,
            user_agent: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach client metadata, truncating the user agent.
    pub fn with_client(mut self, client: &ClientInfo) -> Self {
        self.client_ip = client.ip;
        self.user_agent = truncate_user_agent(&client.user_agent).to_string();
        self
    }
}

/// Truncate a user agent to [`MAX_USER_AGENT_LEN`] bytes on a char boundary.
pub fn truncate_user_agent(user_agent: &str) -> &str {
    if user_agent.len() <= MAX_USER_AGENT_LEN {
        return user_agent;
    }
    let mut end = MAX_USER_AGENT_LEN;
    while !user_agent.is_char_boundary(end) {
        end -= 1;
    }
    &user_agent[..end]
}
