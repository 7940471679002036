//! Login flow
//!
//! Drives the OAuth2 authorization-code handshake with PKCE:
//!
//! 1. `begin_login` / `begin_link` draw a verifier, seal it into a signed
//!    login-state token and return the provider's authorization URL.
//! 2. `handle_callback` verifies the state token, recovers the verifier,
//!    exchanges the code for an identity assertion and dispatches on the
//!    state's purpose: a returning user is resolved by subject, a first
//!    login consumes its login key to link the subject.
//! 3. Either branch ends by issuing a session. Every failure is reduced to
//!    a [`LoginOutcome`] on the result page.

use crate::config::LoginConfig;
use crate::directory::UserDirectory;
use crate::outcome::LoginOutcome;
use crate::pkce::PkceVerifier;
use crate::provider::IdentityProvider;
use crate::session::{issue_session, SessionCookies};
use chrono::{DateTime, Utc};
use keyturn_auth::{AuthError, AuthResult, LoginKey, LoginState, TokenService, UserId};
use keyturn_events::{AccessLogAction, AccessLogRecorder, ClientInfo};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Where a callback leaves the browser.
#[derive(Debug, Clone)]
pub struct CallbackResult {
    /// Outcome reported to the result page
    pub outcome: LoginOutcome,
    /// Result page URL to redirect to
    pub redirect_url: String,
    /// Cookies to set, on success only
    pub session: Option<SessionCookies>,
}

/// A session issued by a successful callback.
struct CompletedLogin {
    cookies: SessionCookies,
    redirect_to: Option<String>,
}

/// Login-flow handler.
pub struct LoginFlow {
    config: LoginConfig,
    tokens: Arc<TokenService>,
    provider: Option<Arc<dyn IdentityProvider>>,
    directory: Arc<dyn UserDirectory>,
    access_log: Arc<dyn AccessLogRecorder>,
}

impl LoginFlow {
    /// Create a login flow over an explicit identity provider.
    pub fn new(
        config: LoginConfig,
        tokens: Arc<TokenService>,
        provider: Arc<dyn IdentityProvider>,
        directory: Arc<dyn UserDirectory>,
        access_log: Arc<dyn AccessLogRecorder>,
    ) -> Self {
        Self {
            config,
            tokens,
            provider: Some(provider),
            directory,
            access_log,
        }
    }

    /// Create a login flow whose provider is built from `config.oauth`.
    ///
    /// A disabled configuration needs no client registration.
    #[cfg(feature = "oauth")]
    pub fn from_config(
        config: LoginConfig,
        tokens: Arc<TokenService>,
        directory: Arc<dyn UserDirectory>,
        access_log: Arc<dyn AccessLogRecorder>,
    ) -> AuthResult<Self> {
        let provider: Option<Arc<dyn IdentityProvider>> = match (&config.oauth, config.enabled) {
            (Some(oauth), _) => Some(Arc::new(crate::provider::OAuth2Provider::new(oauth)?)),
            (None, true) => {
                return Err(AuthError::ConfigError(
                    "login is enabled but no OAuth client is configured".to_string(),
                ))
            }
            (None, false) => None,
        };

        Ok(Self {
            config,
            tokens,
            provider,
            directory,
            access_log,
        })
    }

    /// Whether external login is switched on.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.provider.is_some()
    }

    fn provider(&self) -> AuthResult<&dyn IdentityProvider> {
        match &self.provider {
            Some(provider) if self.config.enabled => Ok(provider.as_ref()),
            _ => Err(AuthError::ProviderDisabled),
        }
    }

    /// Start a returning-user login from `current_page_url`.
    ///
    /// Returns the provider authorization URL.
    #[instrument(skip(self))]
    pub fn begin_login(&self, current_page_url: &str) -> AuthResult<String> {
        let provider = self.provider()?;
        let verifier = PkceVerifier::generate();
        let state = self
            .tokens
            .create_state_token(current_page_url, verifier.secret())?;
        provider.authorization_url(&state, &verifier)
    }

    /// Start a login that links the external identity to the user owning
    /// `login_key` (decimal form).
    #[instrument(skip_all)]
    pub fn begin_link(&self, login_key: &str) -> AuthResult<String> {
        let provider = self.provider()?;
        let login_key = LoginKey::parse(login_key)?;
        let verifier = PkceVerifier::generate();
        let state = self
            .tokens
            .create_state_token_with_login_key(login_key, verifier.secret())?;
        provider.authorization_url(&state, &verifier)
    }

    /// Issue a login key for a user, replacing any earlier key.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn issue_login_key(&self, user_id: UserId) -> AuthResult<LoginKey> {
        let login_key = LoginKey::generate()?;
        self.directory
            .save_login_key(user_id, login_key, Utc::now())
            .await?;
        debug!("Issued login key");
        Ok(login_key)
    }

    /// Remove login keys older than the configured login-key lifetime.
    #[instrument(skip(self))]
    pub async fn sweep_login_keys(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let cutoff = now - self.tokens.config().login_key_ttl;
        let removed = self.directory.delete_login_keys_created_before(cutoff).await?;
        if removed > 0 {
            info!(removed, "Swept expired login keys");
        }
        Ok(removed)
    }

    /// Complete a login from the provider callback's `state` and `code`.
    #[instrument(skip_all)]
    pub async fn handle_callback(
        &self,
        state: &str,
        code: &str,
        client: &ClientInfo,
    ) -> CallbackResult {
        match self.complete_login(state, code, client).await {
            Ok(login) => CallbackResult {
                outcome: LoginOutcome::Success,
                redirect_url: LoginOutcome::Success
                    .result_page_url(&self.config.result_page_url, login.redirect_to.as_deref()),
                session: Some(login.cookies),
            },
            Err(e) => {
                let outcome = LoginOutcome::from_error(&e);
                if outcome == LoginOutcome::InternalError {
                    error!(error = %e, "Login failed");
                } else {
                    warn!(error = %e, outcome = %outcome, "Login rejected");
                }
                self.result(outcome)
            }
        }
    }

    fn result(&self, outcome: LoginOutcome) -> CallbackResult {
        CallbackResult {
            outcome,
            redirect_url: outcome.result_page_url(&self.config.result_page_url, None),
            session: None,
        }
    }

    async fn complete_login(
        &self,
        state: &str,
        code: &str,
        client: &ClientInfo,
    ) -> AuthResult<CompletedLogin> {
        let provider = self.provider()?;

        let state = self.tokens.verify_state_token(state)?;
        let verifier = PkceVerifier::new(
            self.tokens
                .decrypt_code_verifier(state.encrypted_code_verifier())?,
        );

        let assertion = provider.exchange_code(code, &verifier).await?;
        let subject = assertion.subject()?;

        match state {
            LoginState::Login(claims) => {
                let user_id = self.directory.find_user_by_subject(&subject).await?;
                let cookies = issue_session(
                    &self.tokens,
                    self.access_log.as_ref(),
                    user_id,
                    AccessLogAction::Login,
                    client,
                )
                .await?;

                info!(user_id = %user_id, "User logged in");
                Ok(CompletedLogin {
                    cookies,
                    redirect_to: Some(claims.current_page_url),
                })
            }
            LoginState::FirstLogin(claims) => {
                let user_id = self
                    .directory
                    .link_subject_with_login_key(claims.login_key, &subject)
                    .await?;
                let cookies = issue_session(
                    &self.tokens,
                    self.access_log.as_ref(),
                    user_id,
                    AccessLogAction::FirstLogin,
                    client,
                )
                .await?;

                info!(user_id = %user_id, "Linked external identity");
                Ok(CompletedLogin {
                    cookies,
                    redirect_to: None,
                })
            }
        }
    }
}
