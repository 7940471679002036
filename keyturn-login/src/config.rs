//! Login handler configuration
//!
//! Loaded from `KEYTURN_LOGIN_*` and `KEYTURN_OAUTH_*` environment
//! variables.

use crate::outcome::parse_result_page;
use crate::provider::{OAuthConfig, OAuthProvider};
use keyturn_auth::ConfigError;
use url::Url;

/// Settings for the login flow.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    /// Whether external login is switched on
    pub enabled: bool,
    /// Page every callback redirects to
    pub result_page_url: Url,
    /// Client registration; present whenever `enabled` is set
    pub oauth: Option<OAuthConfig>,
}

impl LoginConfig {
    /// An enabled configuration.
    pub fn enabled(result_page_url: Url, oauth: OAuthConfig) -> Self {
        Self {
            enabled: true,
            result_page_url,
            oauth: Some(oauth),
        }
    }

    /// A disabled configuration; every callback reports `NotEnabled`.
    pub fn disabled(result_page_url: Url) -> Self {
        Self {
            enabled: false,
            result_page_url,
            oauth: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = match lookup("KEYTURN_LOGIN_ENABLED") {
            None => false,
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "KEYTURN_LOGIN_ENABLED".to_string(),
                message: "expected true or false".to_string(),
            })?,
        };

        let raw_page = required(&lookup, "KEYTURN_LOGIN_RESULT_PAGE_URL")?;
        let result_page_url =
            parse_result_page(&raw_page).map_err(|e| ConfigError::InvalidValue {
                key: "KEYTURN_LOGIN_RESULT_PAGE_URL".to_string(),
                message: e.to_string(),
            })?;

        if !enabled {
            return Ok(Self::disabled(result_page_url));
        }

        let provider = match lookup("KEYTURN_OAUTH_PROVIDER") {
            None => OAuthProvider::Google,
            Some(raw) => OAuthProvider::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "KEYTURN_OAUTH_PROVIDER".to_string(),
                message: format!("unknown provider `{}`", raw),
            })?,
        };

        let mut oauth = OAuthConfig::new(
            provider,
            required(&lookup, "KEYTURN_OAUTH_CLIENT_ID")?,
            required(&lookup, "KEYTURN_OAUTH_CLIENT_SECRET")?,
            required(&lookup, "KEYTURN_OAUTH_REDIRECT_URL")?,
        );
        oauth.auth_url = lookup("KEYTURN_OAUTH_AUTH_URL");
        oauth.token_url = lookup("KEYTURN_OAUTH_TOKEN_URL");
        if let Some(raw) = lookup("KEYTURN_OAUTH_SCOPES") {
            oauth.scopes = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(Self::enabled(result_page_url, oauth))
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_disabled_by_default() {
        let config = LoginConfig::from_lookup(lookup(&[(
            "KEYTURN_LOGIN_RESULT_PAGE_URL",
            "https://app.example.com/result",
        )]))
        .unwrap();

        assert!(!config.enabled);
        assert!(config.oauth.is_none());
    }

    #[test]
    fn test_enabled_requires_client_settings() {
        let result = LoginConfig::from_lookup(lookup(&[
            ("KEYTURN_LOGIN_ENABLED", "true"),
            ("KEYTURN_LOGIN_RESULT_PAGE_URL", "https://app.example.com/result"),
            ("KEYTURN_OAUTH_CLIENT_ID", "client"),
        ]));

        assert!(matches!(
            result,
            Err(ConfigError::MissingEnvVar(ref key)) if key == "KEYTURN_OAUTH_CLIENT_SECRET"
        ));
    }

    #[test]
    fn test_enabled_config() {
        let config = LoginConfig::from_lookup(lookup(&[
            ("KEYTURN_LOGIN_ENABLED", "yes"),
            ("KEYTURN_LOGIN_RESULT_PAGE_URL", "https://app.example.com/result"),
            ("KEYTURN_OAUTH_PROVIDER", "microsoft"),
            ("KEYTURN_OAUTH_CLIENT_ID", "client"),
            ("KEYTURN_OAUTH_CLIENT_SECRET", "secret"),
            ("KEYTURN_OAUTH_REDIRECT_URL", "https://auth.example.com/callback"),
            ("KEYTURN_OAUTH_SCOPES", "openid, email"),
        ]))
        .unwrap();

        let oauth = config.oauth.unwrap();
        assert!(config.enabled);
        assert_eq!(oauth.provider, OAuthProvider::Microsoft);
        assert_eq!(oauth.scopes, vec!["openid", "email"]);
    }

    #[test]
    fn test_invalid_values() {
        let bad_flag = LoginConfig::from_lookup(lookup(&[
            ("KEYTURN_LOGIN_ENABLED", "maybe"),
            ("KEYTURN_LOGIN_RESULT_PAGE_URL", "https://app.example.com/result"),
        ]));
        assert!(matches!(bad_flag, Err(ConfigError::InvalidValue { .. })));

        let bad_page =
            LoginConfig::from_lookup(lookup(&[("KEYTURN_LOGIN_RESULT_PAGE_URL", "/result")]));
        assert!(matches!(bad_page, Err(ConfigError::InvalidValue { .. })));
    }
}
