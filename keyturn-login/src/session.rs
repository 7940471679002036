//! Session flows: issuing, refreshing and ending a login session
//!
//! A session lives in two cookies: the HTTP-only refresh token and a
//! script-readable CSRF token that refresh and logout requests echo back
//! in a header.

use crate::csrf::{check_csrf_token, generate_csrf_token};
use chrono::{DateTime, Utc};
use keyturn_auth::{AuthError, AuthResult, RevokedTokens, TokenService, UserId};
use keyturn_events::{AccessLogAction, AccessLogEntry, AccessLogRecorder, ClientInfo};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Name of the refresh-token cookie.
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
/// Name of the CSRF cookie.
pub const CSRF_TOKEN_COOKIE: &str = "csrf_token";
/// Header carrying the CSRF token on refresh and logout.
pub const CSRF_TOKEN_HEADER: &str = "X-CSRF-Token";

/// Cookie values for an issued or rotated session.
#[derive(Clone)]
pub struct SessionCookies {
    /// Value of the [`REFRESH_TOKEN_COOKIE`]
    pub refresh_token: String,
    /// Value of the [`CSRF_TOKEN_COOKIE`]
    pub csrf_token: String,
    /// Cookie expiry, equal to the refresh token's
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for SessionCookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookies")
            .field("refresh_token", &"[REDACTED]")
            .field("csrf_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credentials presented on a refresh or logout request.
#[derive(Clone, Default)]
pub struct SessionRequest {
    /// Value of the refresh-token cookie
    pub refresh_token: Option<String>,
    /// Value of the CSRF cookie
    pub csrf_cookie: Option<String>,
    /// Value of the CSRF header
    pub csrf_header: Option<String>,
    /// Request metadata for the access log
    pub client: ClientInfo,
}

impl fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRequest")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("csrf_cookie", &self.csrf_cookie.as_ref().map(|_| "[REDACTED]"))
            .field("csrf_header", &self.csrf_header.as_ref().map(|_| "[REDACTED]"))
            .field("client", &self.client)
            .finish()
    }
}

/// A rotated session.
#[derive(Clone)]
pub struct RefreshedSession {
    /// Login session the pair belongs to
    pub login_id: Uuid,
    /// New access token
    pub access_token: String,
    /// Access token expiry
    pub access_expires_at: DateTime<Utc>,
    /// New cookie values
    pub cookies: SessionCookies,
}

impl fmt::Debug for RefreshedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedSession")
            .field("login_id", &self.login_id)
            .field("access_token", &"[REDACTED]")
            .field("access_expires_at", &self.access_expires_at)
            .field("cookies", &self.cookies)
            .finish()
    }
}

/// Result of a logout.
///
/// The session cookies should be cleared in either case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutResult {
    /// The session was revoked
    LoggedOut {
        /// Revoked login session
        login_id: Uuid,
        /// Rows removed
        revoked: RevokedTokens,
    },
    /// The token no longer names a live session
    AlreadyLoggedOut,
}

/// Mint a session for a user, record the access and draw a CSRF token.
pub(crate) async fn issue_session(
    tokens: &TokenService,
    access_log: &dyn AccessLogRecorder,
    user_id: UserId,
    action: AccessLogAction,
    client: &ClientInfo,
) -> AuthResult<SessionCookies> {
    let session = tokens.create_refresh_token(user_id).await?;

    access_log
        .record(AccessLogEntry::new(user_id, action, session.login_id).with_client(client))
        .await?;

    Ok(SessionCookies {
        refresh_token: session.refresh_token,
        csrf_token: generate_csrf_token()?,
        expires_at: session.expires_at,
    })
}

/// Refresh and logout over an established session.
pub struct SessionFlow {
    tokens: Arc<TokenService>,
    access_log: Arc<dyn AccessLogRecorder>,
}

impl SessionFlow {
    /// Create a session flow.
    pub fn new(tokens: Arc<TokenService>, access_log: Arc<dyn AccessLogRecorder>) -> Self {
        Self { tokens, access_log }
    }

    /// Rotate the presented refresh token into a fresh token pair.
    #[instrument(skip_all)]
    pub async fn refresh(&self, request: &SessionRequest) -> AuthResult<RefreshedSession> {
        check_csrf_token(request.csrf_cookie.as_deref(), request.csrf_header.as_deref())?;
        let token = presented_token(request)?;

        let session = self.tokens.verify_refresh_token(token).await?;
        let rotated = self.tokens.refresh_token(&session).await?;

        self.access_log
            .record(
                AccessLogEntry::new(session.user_id, AccessLogAction::RefreshToken, rotated.login_id)
                    .with_client(&request.client),
            )
            .await
            .inspect_err(|e| error!(error = %e, "Failed to record token refresh"))?;

        debug!(user_id = %session.user_id, login_id = %rotated.login_id, "Session refreshed");

        Ok(RefreshedSession {
            login_id: rotated.login_id,
            access_token: rotated.access_token,
            access_expires_at: rotated.access_expires_at,
            cookies: SessionCookies {
                refresh_token: rotated.refresh_token,
                csrf_token: generate_csrf_token()?,
                expires_at: rotated.refresh_expires_at,
            },
        })
    }

    /// End the session named by the presented refresh token.
    ///
    /// A token that no longer names a live session reports
    /// [`LogoutResult::AlreadyLoggedOut`], so repeating a logout is harmless.
    #[instrument(skip_all)]
    pub async fn logout(&self, request: &SessionRequest) -> AuthResult<LogoutResult> {
        check_csrf_token(request.csrf_cookie.as_deref(), request.csrf_header.as_deref())?;
        let token = presented_token(request)?;

        let session = match self.tokens.verify_refresh_token(token).await {
            Ok(session) => session,
            Err(e) if e.is_unauthorized() => {
                debug!("Logout for a session that is already gone");
                return Ok(LogoutResult::AlreadyLoggedOut);
            }
            Err(e) => return Err(e),
        };

        let login_id = session.login_id();
        let revoked = self.tokens.invalidate_tokens(login_id).await?;

        self.access_log
            .record(
                AccessLogEntry::new(session.user_id, AccessLogAction::Logout, login_id)
                    .with_client(&request.client),
            )
            .await
            .inspect_err(|e| error!(error = %e, "Failed to record logout"))?;

        info!(user_id = %session.user_id, login_id = %login_id, "Logged out");
        Ok(LogoutResult::LoggedOut { login_id, revoked })
    }
}

fn presented_token(request: &SessionRequest) -> AuthResult<&str> {
    request.refresh_token.as_deref().ok_or_else(|| {
        warn!("Refresh token cookie missing");
        AuthError::Unauthorized("refresh token not found".to_string())
    })
}
