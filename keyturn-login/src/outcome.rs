//! Login outcomes
//!
//! Every callback ends on the result page with one of these codes in the
//! `type` query parameter.

use keyturn_auth::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Result of a login callback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LoginOutcome {
    /// Session issued
    Success,
    /// State token, verifier, code or identity assertion rejected
    InvalidToken,
    /// No user is linked to the external subject
    UserNotFound,
    /// Login key unknown, consumed or expired
    LoginKeyNotFound,
    /// External subject already linked
    AlreadyLinked,
    /// Infrastructure failure
    InternalError,
    /// External login is switched off
    NotEnabled,
}

impl LoginOutcome {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginOutcome::Success => "success",
            LoginOutcome::InvalidToken => "invalid_token",
            LoginOutcome::UserNotFound => "user_not_found",
            LoginOutcome::LoginKeyNotFound => "login_key_not_found",
            LoginOutcome::AlreadyLinked => "already_linked",
            LoginOutcome::InternalError => "internal_error",
            LoginOutcome::NotEnabled => "not_enabled",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(LoginOutcome::Success),
            "invalid_token" => Some(LoginOutcome::InvalidToken),
            "user_not_found" => Some(LoginOutcome::UserNotFound),
            "login_key_not_found" => Some(LoginOutcome::LoginKeyNotFound),
            "already_linked" => Some(LoginOutcome::AlreadyLinked),
            "internal_error" => Some(LoginOutcome::InternalError),
            "not_enabled" => Some(LoginOutcome::NotEnabled),
            _ => None,
        }
    }

    /// Reduce an error raised while handling a callback to an outcome.
    ///
    /// Rejected credentials of any kind, a failed decrypt and a failed
    /// code exchange all report `InvalidToken`.
    pub fn from_error(error: &AuthError) -> Self {
        match error {
            AuthError::UserNotFound => LoginOutcome::UserNotFound,
            AuthError::LoginKeyNotFound => LoginOutcome::LoginKeyNotFound,
            AuthError::SubjectAlreadyLinked => LoginOutcome::AlreadyLinked,
            AuthError::ProviderDisabled => LoginOutcome::NotEnabled,
            AuthError::DecryptFailed | AuthError::OAuthError(_) => LoginOutcome::InvalidToken,
            e if e.is_unauthorized() => LoginOutcome::InvalidToken,
            _ => LoginOutcome::InternalError,
        }
    }

    /// Result page URL for this outcome.
    ///
    /// `redirect_to` is appended as `redirectTo` when non-empty.
    pub fn result_page_url(&self, result_page: &Url, redirect_to: Option<&str>) -> String {
        let mut url = result_page.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("type", self.as_str());
            if let Some(target) = redirect_to.filter(|t| !t.is_empty()) {
                query.append_pair("redirectTo", target);
            }
        }
        url.to_string()
    }
}

impl fmt::Display for LoginOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse and check a result page URL.
pub fn parse_result_page(raw: &str) -> AuthResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| AuthError::ConfigError(format!("result page URL: {}", e)))?;
    if url.cannot_be_a_base() {
        return Err(AuthError::ConfigError(
            "result page URL must be hierarchical".to_string(),
        ));
    }
    Ok(url)
}
