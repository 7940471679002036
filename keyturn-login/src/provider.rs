//! Identity providers
//!
//! The login flow needs two things from an identity provider: an
//! authorization URL to send the browser to, and a code exchange that
//! yields an identity assertion naming a stable subject.
//!
//! [`OAuth2Provider`] implements this for any OpenID Connect provider on
//! top of the `oauth2` crate (feature `oauth`).

use crate::pkce::PkceVerifier;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use keyturn_auth::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Scope every provider must grant for an `id_token` to be returned.
pub const OPENID_SCOPE: &str = "openid";

/// Supported OpenID Connect providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OAuthProvider {
    /// Google
    Google,
    /// Microsoft (Azure AD)
    Microsoft,
    /// Apple Sign In
    Apple,
    /// Any other OpenID Connect provider
    Custom,
}

impl OAuthProvider {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Microsoft => "microsoft",
            OAuthProvider::Apple => "apple",
            OAuthProvider::Custom => "custom",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "google" => Some(OAuthProvider::Google),
            "microsoft" | "azure" | "azuread" => Some(OAuthProvider::Microsoft),
            "apple" => Some(OAuthProvider::Apple),
            "custom" => Some(OAuthProvider::Custom),
            _ => None,
        }
    }

    /// Default authorization endpoint.
    pub fn auth_url(&self) -> Option<&'static str> {
        match self {
            OAuthProvider::Google => Some("https://accounts.google.com/o/oauth2/v2/auth"),
            OAuthProvider::Microsoft => {
                Some("https://login.microsoftonline.com/common/oauth2/v2.0/authorize")
            }
            OAuthProvider::Apple => Some("https://appleid.apple.com/auth/authorize"),
            OAuthProvider::Custom => None,
        }
    }

    /// Default token endpoint.
    pub fn token_url(&self) -> Option<&'static str> {
        match self {
            OAuthProvider::Google => Some("https://oauth2.googleapis.com/token"),
            OAuthProvider::Microsoft => {
                Some("https://login.microsoftonline.com/common/oauth2/v2.0/token")
            }
            OAuthProvider::Apple => Some("https://appleid.apple.com/auth/token"),
            OAuthProvider::Custom => None,
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth client registration.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Provider type
    pub provider: OAuthProvider,

    /// Client ID
    pub client_id: String,

    /// Client secret
    pub client_secret: String,

    /// Authorization URL (optional, uses default for known providers)
    pub auth_url: Option<String>,

    /// Token URL (optional, uses default for known providers)
    pub token_url: Option<String>,

    /// Callback URL registered with the provider
    pub redirect_url: String,

    /// Scopes to request; `openid` is always added
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Create a configuration requesting only the `openid` scope.
    pub fn new(
        provider: OAuthProvider,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: None,
            token_url: None,
            redirect_url: redirect_url.into(),
            scopes: vec![OPENID_SCOPE.to_string()],
        }
    }

    /// Get the authorization URL.
    pub fn get_auth_url(&self) -> AuthResult<String> {
        self.auth_url
            .clone()
            .or_else(|| self.provider.auth_url().map(String::from))
            .ok_or_else(|| AuthError::ConfigError("Authorization URL not configured".to_string()))
    }

    /// Get the token URL.
    pub fn get_token_url(&self) -> AuthResult<String> {
        self.token_url
            .clone()
            .or_else(|| self.provider.token_url().map(String::from))
            .ok_or_else(|| AuthError::ConfigError("Token URL not configured".to_string()))
    }

    /// Configured scopes with `openid` guaranteed present.
    pub fn effective_scopes(&self) -> Vec<String> {
        let mut scopes = self.scopes.clone();
        if !scopes.iter().any(|s| s == OPENID_SCOPE) {
            scopes.insert(0, OPENID_SCOPE.to_string());
        }
        scopes
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Identity assertion returned by a code exchange.
#[derive(Clone)]
pub struct IdentityAssertion {
    id_token: String,
}

impl IdentityAssertion {
    /// Wrap an `id_token`.
    pub fn new(id_token: impl Into<String>) -> Self {
        Self {
            id_token: id_token.into(),
        }
    }

    /// The raw `id_token`.
    pub fn id_token(&self) -> &str {
        &self.id_token
    }

    /// Stable subject identifier (`sub`) named by the assertion.
    ///
    /// The token was received directly from the provider's token endpoint,
    /// so only its payload segment is decoded here.
    pub fn subject(&self) -> AuthResult<String> {
        let payload = self
            .id_token
            .split('.')
            .nth(1)
            .ok_or_else(|| invalid_assertion("id_token has no payload segment"))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|_| invalid_assertion("id_token payload is not base64url"))?;

        let claims: serde_json::Map<String, Value> = serde_json::from_slice(&bytes)
            .map_err(|_| invalid_assertion("id_token payload is not a JSON object"))?;

        claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|sub| !sub.is_empty())
            .map(String::from)
            .ok_or_else(|| invalid_assertion("id_token has no subject"))
    }
}

impl fmt::Debug for IdentityAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityAssertion([REDACTED])")
    }
}

fn invalid_assertion(reason: &str) -> AuthError {
    AuthError::InvalidToken(reason.to_string())
}

/// Identity-provider exchange capability.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL the browser is sent to, carrying `state` and the S256 challenge
    /// of `verifier`.
    fn authorization_url(&self, state: &str, verifier: &PkceVerifier) -> AuthResult<String>;

    /// Exchange an authorization code and its verifier for an identity
    /// assertion.
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &PkceVerifier,
    ) -> AuthResult<IdentityAssertion>;
}

#[cfg(feature = "oauth")]
pub use oauth::OAuth2Provider;

#[cfg(feature = "oauth")]
mod oauth {
    use super::*;
    use oauth2::basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenType,
    };
    use oauth2::reqwest::async_http_client;
    use oauth2::{
        AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, CsrfToken, ExtraTokenFields,
        PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, StandardRevocableToken,
        StandardTokenResponse, TokenUrl,
    };
    use tracing::{debug, instrument, warn};

    /// `id_token` carried next to the standard token response fields.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct IdTokenFields {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id_token: Option<String>,
    }

    impl ExtraTokenFields for IdTokenFields {}

    type IdTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

    type IdTokenClient = Client<
        BasicErrorResponse,
        IdTokenResponse,
        BasicTokenType,
        BasicTokenIntrospectionResponse,
        StandardRevocableToken,
        BasicRevocationErrorResponse,
    >;

    /// OpenID Connect provider driven by the `oauth2` crate.
    ///
    /// Requests offline access so the provider issues its own refresh token
    /// on first consent.
    pub struct OAuth2Provider {
        provider: OAuthProvider,
        client: IdTokenClient,
        scopes: Vec<String>,
    }

    impl OAuth2Provider {
        /// Build a provider client from its registration.
        pub fn new(config: &OAuthConfig) -> AuthResult<Self> {
            let auth_url = AuthUrl::new(config.get_auth_url()?)
                .map_err(|e| AuthError::ConfigError(format!("authorization URL: {}", e)))?;
            let token_url = TokenUrl::new(config.get_token_url()?)
                .map_err(|e| AuthError::ConfigError(format!("token URL: {}", e)))?;
            let redirect_url = RedirectUrl::new(config.redirect_url.clone())
                .map_err(|e| AuthError::ConfigError(format!("redirect URL: {}", e)))?;

            let client = IdTokenClient::new(
                ClientId::new(config.client_id.clone()),
                Some(ClientSecret::new(config.client_secret.clone())),
                auth_url,
                Some(token_url),
            )
            .set_redirect_uri(redirect_url);

            Ok(Self {
                provider: config.provider,
                client,
                scopes: config.effective_scopes(),
            })
        }
    }

    impl fmt::Debug for OAuth2Provider {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("OAuth2Provider")
                .field("provider", &self.provider)
                .field("scopes", &self.scopes)
                .finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl IdentityProvider for OAuth2Provider {
        fn authorization_url(&self, state: &str, verifier: &PkceVerifier) -> AuthResult<String> {
            let challenge = PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(
                verifier.secret().to_string(),
            ));
            let state = state.to_string();

            let (url, _) = self
                .client
                .authorize_url(move || CsrfToken::new(state))
                .add_scopes(self.scopes.iter().cloned().map(Scope::new))
                .add_extra_param("access_type", "offline")
                .set_pkce_challenge(challenge)
                .url();

            Ok(url.to_string())
        }

        #[instrument(skip_all, fields(provider = %self.provider))]
        async fn exchange_code(
            &self,
            code: &str,
            verifier: &PkceVerifier,
        ) -> AuthResult<IdentityAssertion> {
            use oauth2::TokenResponse;

            let response = self
                .client
                .exchange_code(AuthorizationCode::new(code.to_string()))
                .set_pkce_verifier(PkceCodeVerifier::new(verifier.secret().to_string()))
                .request_async(async_http_client)
                .await
                .map_err(|e| {
                    warn!(error = %e, "Code exchange failed");
                    AuthError::OAuthError(e.to_string())
                })?;

            let id_token = response
                .extra_fields()
                .id_token
                .clone()
                .ok_or_else(|| invalid_assertion("token response has no id_token"))?;

            debug!(token_type = ?response.token_type(), "Exchanged authorization code");
            Ok(IdentityAssertion::new(id_token))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id_token_with(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.signature", header, body)
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(OAuthProvider::parse("Google"), Some(OAuthProvider::Google));
        assert_eq!(OAuthProvider::parse("azuread"), Some(OAuthProvider::Microsoft));
        assert_eq!(OAuthProvider::parse("github"), None);
        assert_eq!(OAuthProvider::Apple.to_string(), "apple");
    }

    #[test]
    fn test_custom_provider_needs_endpoints() {
        let config = OAuthConfig::new(OAuthProvider::Custom, "id", "secret", "https://a/cb");
        assert!(matches!(config.get_auth_url(), Err(AuthError::ConfigError(_))));

        let google = OAuthConfig::new(OAuthProvider::Google, "id", "secret", "https://a/cb");
        assert!(google.get_token_url().unwrap().starts_with("https://oauth2.googleapis.com"));
    }

    #[test]
    fn test_effective_scopes_always_include_openid() {
        let mut config = OAuthConfig::new(OAuthProvider::Google, "id", "secret", "https://a/cb");
        config.scopes = vec!["email".to_string()];
        assert_eq!(config.effective_scopes(), vec!["openid", "email"]);
    }

    #[test]
    fn test_config_debug_hides_secret() {
        let config = OAuthConfig::new(OAuthProvider::Google, "id", "hunter2", "https://a/cb");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_subject_from_id_token() {
        let assertion = IdentityAssertion::new(id_token_with(&json!({"sub": "1234567890"})));
        assert_eq!(assertion.subject().unwrap(), "1234567890");
    }

    #[test]
    fn test_subject_tolerates_padding() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"sub":"abc"}"#);
        assert!(payload.ends_with('='));
        let assertion = IdentityAssertion::new(format!("h.{}.s", payload));
        assert_eq!(assertion.subject().unwrap(), "abc");
    }

    #[test]
    fn test_subject_rejects_bad_assertions() {
        let cases = [
            "no-dots".to_string(),
            "h.%%%.s".to_string(),
            format!("h.{}.s", URL_SAFE_NO_PAD.encode("not json")),
            id_token_with(&json!({"email": "a@example.com"})),
            id_token_with(&json!({"sub": ""})),
            id_token_with(&json!({"sub": 42})),
        ];

        for token in cases {
            let result = IdentityAssertion::new(token).subject();
            assert!(matches!(result, Err(AuthError::InvalidToken(_))));
        }
    }

    #[cfg(feature = "oauth")]
    #[test]
    fn test_authorization_url_carries_state_and_challenge() {
        let config = OAuthConfig::new(
            OAuthProvider::Google,
            "client-1",
            "secret",
            "https://auth.example.com/callback",
        );
        let provider = OAuth2Provider::new(&config).unwrap();
        let verifier = PkceVerifier::generate();

        let raw = provider.authorization_url("state-token", &verifier).unwrap();
        let url = url::Url::parse(&raw).unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(query["state"], "state-token");
        assert_eq!(query["code_challenge"], verifier.challenge());
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["scope"], "openid");
        assert_eq!(query["access_type"], "offline");
        assert_eq!(query["client_id"], "client-1");
    }
}
