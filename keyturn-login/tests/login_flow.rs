//! End-to-end tests for the login and session flows.
//!
//! These tests drive `LoginFlow` and `SessionFlow` against the in-memory
//! token store, user directory and access log, with a scripted identity
//! provider standing in for the OAuth2 endpoints.
//!
//! Scenarios:
//! 1. Returning-user login
//! 2. First login with a login key
//! 3. Rejected callbacks
//! 4. Refresh and logout
//! 5. Login key expiry

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use keyturn_auth::{
    AuthConfig, AuthError, AuthResult, BaseClaims, Claims, JwtSigner, LoginState,
    LoginStateClaims, MemoryTokenStore, TokenService, TokenSigner, UserId,
};
use keyturn_events::{
    AccessLogAction, AccessLogEntry, AccessLogError, AccessLogRecorder, AccessLogResult,
    ClientInfo, MemoryAccessLog,
};
use keyturn_login::{
    IdentityAssertion, IdentityProvider, LoginConfig, LoginFlow, LoginOutcome, LogoutResult,
    MemoryUserDirectory, PkceVerifier, SessionFlow, SessionRequest,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

const RESULT_PAGE: &str = "https://app.example.com/login/result";

/// Identity provider that answers from a table of authorization codes.
///
/// Codes are single-use and only redeem with the verifier whose challenge
/// was sent in the most recent authorization URL.
#[derive(Default)]
struct ScriptedProvider {
    codes: Mutex<HashMap<String, String>>,
    challenge: Mutex<Option<String>>,
}

impl ScriptedProvider {
    fn grant(&self, code: &str, subject: &str) {
        self.codes
            .lock()
            .unwrap()
            .insert(code.to_string(), subject.to_string());
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    fn authorization_url(&self, state: &str, verifier: &PkceVerifier) -> AuthResult<String> {
        let challenge = verifier.challenge();
        *self.challenge.lock().unwrap() = Some(challenge.clone());

        let mut url = Url::parse("https://idp.example.com/authorize").unwrap();
        url.query_pairs_mut()
            .append_pair("state", state)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &PkceVerifier,
    ) -> AuthResult<IdentityAssertion> {
        if self.challenge.lock().unwrap().as_deref() != Some(verifier.challenge().as_str()) {
            return Err(AuthError::OAuthError("invalid_grant: verifier".to_string()));
        }
        let subject = self
            .codes
            .lock()
            .unwrap()
            .remove(code)
            .ok_or_else(|| AuthError::OAuthError("invalid_grant: code".to_string()))?;

        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{}"}}"#, subject));
        Ok(IdentityAssertion::new(format!("eyJhbGciOiJSUzI1NiJ9.{}.sig", payload)))
    }
}

/// Recorder that always fails.
struct BrokenAccessLog;

#[async_trait]
impl AccessLogRecorder for BrokenAccessLog {
    async fn record(&self, _entry: AccessLogEntry) -> AccessLogResult<()> {
        Err(AccessLogError::RecordError("log table unavailable".to_string()))
    }
}

struct TestFixture {
    tokens: Arc<TokenService>,
    store: MemoryTokenStore,
    directory: MemoryUserDirectory,
    access_log: MemoryAccessLog,
    provider: Arc<ScriptedProvider>,
    flow: LoginFlow,
    sessions: SessionFlow,
}

impl TestFixture {
    fn new() -> Self {
        Self::build(Self::enabled_config(), None)
    }

    /// Enabled config; the scripted provider stands in for the client
    /// registration.
    fn enabled_config() -> LoginConfig {
        LoginConfig {
            enabled: true,
            result_page_url: Url::parse(RESULT_PAGE).unwrap(),
            oauth: None,
        }
    }

    fn build(config: LoginConfig, recorder: Option<Arc<dyn AccessLogRecorder>>) -> Self {
        let store = MemoryTokenStore::new();
        let auth_config = AuthConfig::new(vec![7u8; 64], [9u8; 32]);
        let tokens =
            Arc::new(TokenService::from_config(auth_config, Arc::new(store.clone())).unwrap());

        let directory = MemoryUserDirectory::new();
        let access_log = MemoryAccessLog::new();
        let recorder = recorder
            .unwrap_or_else(|| Arc::new(access_log.clone()) as Arc<dyn AccessLogRecorder>);
        let provider = Arc::new(ScriptedProvider::default());

        let flow = LoginFlow::new(
            config,
            tokens.clone(),
            provider.clone(),
            Arc::new(directory.clone()),
            recorder.clone(),
        );
        let sessions = SessionFlow::new(tokens.clone(), recorder);

        Self {
            tokens,
            store,
            directory,
            access_log,
            provider,
            flow,
            sessions,
        }
    }

    fn client() -> ClientInfo {
        ClientInfo::new("203.0.113.9".parse().ok(), "Mozilla/5.0 (X11; Linux x86_64)")
    }

    /// Pull the state token back out of an authorization URL.
    fn state_of(authorization_url: &str) -> String {
        Url::parse(authorization_url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    fn session_request(refresh_token: &str, csrf: &str) -> SessionRequest {
        SessionRequest {
            refresh_token: Some(refresh_token.to_string()),
            csrf_cookie: Some(csrf.to_string()),
            csrf_header: Some(csrf.to_string()),
            client: Self::client(),
        }
    }
}

// =============================================================================
// Scenario 1: returning-user login
// =============================================================================

#[tokio::test]
async fn test_state_token_carries_page_and_verifier() {
    let fixture = TestFixture::new();

    let state = fixture.tokens.create_state_token("/dashboard", "abc").unwrap();
    let LoginState::Login(claims) = fixture.tokens.verify_state_token(&state).unwrap() else {
        panic!("expected a returning-user login state");
    };

    assert_eq!(claims.current_page_url, "/dashboard");
    let verifier = fixture
        .tokens
        .decrypt_code_verifier(&claims.encrypted_code_verifier)
        .unwrap();
    assert_eq!(verifier, "abc");
}

#[tokio::test]
async fn test_returning_user_login() {
    let fixture = TestFixture::new();
    fixture.directory.link(UserId(42), "sub-42").await;

    let authorization_url = fixture.flow.begin_login("/dashboard").unwrap();
    let state = TestFixture::state_of(&authorization_url);
    fixture.provider.grant("code-1", "sub-42");

    let result = fixture
        .flow
        .handle_callback(&state, "code-1", &TestFixture::client())
        .await;

    assert_eq!(result.outcome, LoginOutcome::Success);
    assert_eq!(
        result.redirect_url,
        format!("{}?type=success&redirectTo=%2Fdashboard", RESULT_PAGE)
    );

    let cookies = result.session.expect("session cookies");
    let session = fixture
        .tokens
        .verify_refresh_token(&cookies.refresh_token)
        .await
        .unwrap();
    assert_eq!(session.user_id, UserId(42));
    assert_eq!(cookies.expires_at, session.claims.base.expires_at);

    let entries = fixture.access_log.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AccessLogAction::Login);
    assert_eq!(entries[0].login_id, session.login_id());
    assert_eq!(entries[0].client_ip, TestFixture::client().ip);
}

#[tokio::test]
async fn test_unknown_subject_reports_user_not_found() {
    let fixture = TestFixture::new();

    let state = TestFixture::state_of(&fixture.flow.begin_login("/").unwrap());
    fixture.provider.grant("code-1", "stranger");

    let result = fixture
        .flow
        .handle_callback(&state, "code-1", &TestFixture::client())
        .await;

    assert_eq!(result.outcome, LoginOutcome::UserNotFound);
    assert_eq!(result.redirect_url, format!("{}?type=user_not_found", RESULT_PAGE));
    assert!(result.session.is_none());
    assert!(fixture.store.refresh_tokens().await.is_empty());
    assert!(fixture.access_log.is_empty().await);
}

// =============================================================================
// Scenario 2: first login with a login key
// =============================================================================

#[tokio::test]
async fn test_login_key_links_identity_once() {
    let fixture = TestFixture::new();
    let login_key = fixture.flow.issue_login_key(UserId(7)).await.unwrap();

    let state = TestFixture::state_of(&fixture.flow.begin_link(&login_key.to_string()).unwrap());
    fixture.provider.grant("code-1", "sub-7");
    let first = fixture
        .flow
        .handle_callback(&state, "code-1", &TestFixture::client())
        .await;

    assert_eq!(first.outcome, LoginOutcome::Success);
    assert_eq!(first.redirect_url, format!("{}?type=success", RESULT_PAGE));
    assert!(first.session.is_some());
    assert_eq!(fixture.directory.subject_of(UserId(7)).await.as_deref(), Some("sub-7"));

    let entries = fixture.access_log.entries_for_user(UserId(7)).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AccessLogAction::FirstLogin);

    // The key was consumed by the first link
    let state = TestFixture::state_of(&fixture.flow.begin_link(&login_key.to_string()).unwrap());
    fixture.provider.grant("code-2", "sub-7-other");
    let second = fixture
        .flow
        .handle_callback(&state, "code-2", &TestFixture::client())
        .await;

    assert_eq!(second.outcome, LoginOutcome::LoginKeyNotFound);
    assert!(second.session.is_none());

    // The linked identity now logs in as a returning user
    let state = TestFixture::state_of(&fixture.flow.begin_login("/home").unwrap());
    fixture.provider.grant("code-3", "sub-7");
    let login = fixture
        .flow
        .handle_callback(&state, "code-3", &TestFixture::client())
        .await;
    assert_eq!(login.outcome, LoginOutcome::Success);
}

#[tokio::test]
async fn test_linked_subject_reports_already_linked() {
    let fixture = TestFixture::new();
    fixture.directory.link(UserId(1), "taken").await;
    let login_key = fixture.flow.issue_login_key(UserId(2)).await.unwrap();

    let state = TestFixture::state_of(&fixture.flow.begin_link(&login_key.to_string()).unwrap());
    fixture.provider.grant("code-1", "taken");
    let result = fixture
        .flow
        .handle_callback(&state, "code-1", &TestFixture::client())
        .await;

    assert_eq!(result.outcome, LoginOutcome::AlreadyLinked);
    assert_eq!(fixture.directory.login_key_count().await, 1);
    assert!(fixture.directory.subject_of(UserId(2)).await.is_none());
}

#[tokio::test]
async fn test_begin_link_rejects_malformed_key() {
    let fixture = TestFixture::new();

    for raw in ["", "abc", "-5", "99999999999999999999"] {
        assert!(matches!(
            fixture.flow.begin_link(raw),
            Err(AuthError::InvalidLoginKey)
        ));
    }
}

// =============================================================================
// Scenario 3: rejected callbacks
// =============================================================================

#[tokio::test]
async fn test_tampered_state_reports_invalid_token() {
    let fixture = TestFixture::new();
    fixture.directory.link(UserId(42), "sub-42").await;

    let state = TestFixture::state_of(&fixture.flow.begin_login("/").unwrap());
    fixture.provider.grant("code-1", "sub-42");

    let mut parts: Vec<String> = state.split('.').map(String::from).collect();
    let payload = URL_SAFE_NO_PAD.decode(&parts[1]).unwrap();
    let forged = String::from_utf8(payload).unwrap().replace("\"/\"", "\"/admin\"");
    parts[1] = URL_SAFE_NO_PAD.encode(forged);

    let result = fixture
        .flow
        .handle_callback(&parts.join("."), "code-1", &TestFixture::client())
        .await;

    assert_eq!(result.outcome, LoginOutcome::InvalidToken);
    assert!(result.session.is_none());
}

#[tokio::test]
async fn test_session_token_is_not_a_login_state() {
    let fixture = TestFixture::new();
    fixture.directory.link(UserId(42), "sub-42").await;
    let session = fixture.tokens.create_refresh_token(UserId(42)).await.unwrap();

    fixture.provider.grant("code-1", "sub-42");
    let result = fixture
        .flow
        .handle_callback(&session.refresh_token, "code-1", &TestFixture::client())
        .await;

    assert_eq!(result.outcome, LoginOutcome::InvalidToken);
}

#[tokio::test]
async fn test_expired_state_reports_invalid_token() {
    let fixture = TestFixture::new();
    fixture.directory.link(UserId(42), "sub-42").await;

    let now = Utc::now();
    let claims = LoginStateClaims {
        base: BaseClaims::bounded(now - Duration::minutes(20), now - Duration::minutes(5)),
        current_page_url: "/".to_string(),
        encrypted_code_verifier: "00".to_string(),
    };
    let signer = JwtSigner::new(fixture.tokens.config().jwt_config()).unwrap();
    let state = signer.sign(&claims.encode()).unwrap();

    fixture.provider.grant("code-1", "sub-42");
    let result = fixture
        .flow
        .handle_callback(&state, "code-1", &TestFixture::client())
        .await;

    assert_eq!(result.outcome, LoginOutcome::InvalidToken);
}

#[tokio::test]
async fn test_failed_exchange_reports_invalid_token() {
    let fixture = TestFixture::new();
    fixture.directory.link(UserId(42), "sub-42").await;

    let state = TestFixture::state_of(&fixture.flow.begin_login("/").unwrap());
    let result = fixture
        .flow
        .handle_callback(&state, "never-granted", &TestFixture::client())
        .await;

    assert_eq!(result.outcome, LoginOutcome::InvalidToken);
}

#[tokio::test]
async fn test_stale_verifier_fails_exchange() {
    let fixture = TestFixture::new();
    fixture.directory.link(UserId(42), "sub-42").await;

    let first = TestFixture::state_of(&fixture.flow.begin_login("/").unwrap());
    // A second login replaces the challenge the provider expects
    let _second = fixture.flow.begin_login("/").unwrap();
    fixture.provider.grant("code-1", "sub-42");

    let result = fixture
        .flow
        .handle_callback(&first, "code-1", &TestFixture::client())
        .await;

    assert_eq!(result.outcome, LoginOutcome::InvalidToken);
}

#[tokio::test]
async fn test_disabled_flow() {
    let page = Url::parse(RESULT_PAGE).unwrap();
    let fixture = TestFixture::build(LoginConfig::disabled(page), None);

    assert!(!fixture.flow.is_enabled());
    assert!(matches!(
        fixture.flow.begin_login("/"),
        Err(AuthError::ProviderDisabled)
    ));

    let state = fixture.tokens.create_state_token("/", "abc").unwrap();
    let result = fixture
        .flow
        .handle_callback(&state, "code-1", &TestFixture::client())
        .await;

    assert_eq!(result.outcome, LoginOutcome::NotEnabled);
    assert_eq!(result.redirect_url, format!("{}?type=not_enabled", RESULT_PAGE));
}

#[tokio::test]
async fn test_access_log_failure_reports_internal_error() {
    let fixture = TestFixture::build(
        TestFixture::enabled_config(),
        Some(Arc::new(BrokenAccessLog)),
    );
    fixture.directory.link(UserId(42), "sub-42").await;

    let state = TestFixture::state_of(&fixture.flow.begin_login("/").unwrap());
    fixture.provider.grant("code-1", "sub-42");
    let result = fixture
        .flow
        .handle_callback(&state, "code-1", &TestFixture::client())
        .await;

    assert_eq!(result.outcome, LoginOutcome::InternalError);
    assert!(result.session.is_none());
}

// =============================================================================
// Scenario 4: refresh and logout
// =============================================================================

async fn logged_in(fixture: &TestFixture, user_id: UserId) -> keyturn_login::SessionCookies {
    let subject = format!("sub-{}", user_id);
    fixture.directory.link(user_id, subject.clone()).await;

    let state = TestFixture::state_of(&fixture.flow.begin_login("/").unwrap());
    fixture.provider.grant("login-code", &subject);
    fixture
        .flow
        .handle_callback(&state, "login-code", &TestFixture::client())
        .await
        .session
        .expect("logged in")
}

#[tokio::test]
async fn test_refresh_rotates_session() {
    let fixture = TestFixture::new();
    let cookies = logged_in(&fixture, UserId(42)).await;

    let refreshed = fixture
        .sessions
        .refresh(&TestFixture::session_request(&cookies.refresh_token, &cookies.csrf_token))
        .await
        .unwrap();

    assert_ne!(refreshed.cookies.refresh_token, cookies.refresh_token);
    assert_ne!(refreshed.cookies.csrf_token, cookies.csrf_token);
    assert_eq!(refreshed.cookies.expires_at, refreshed.access_expires_at);
    assert!(refreshed.cookies.expires_at <= cookies.expires_at);

    let claims = fixture.tokens.verify_access_token(&refreshed.access_token).unwrap();
    fixture.tokens.ensure_access_token_active(&claims).await.unwrap();

    let actions: Vec<_> = fixture
        .access_log
        .entries()
        .await
        .iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec![AccessLogAction::Login, AccessLogAction::RefreshToken]);
}

#[tokio::test]
async fn test_refresh_requires_matching_csrf_token() {
    let fixture = TestFixture::new();
    let cookies = logged_in(&fixture, UserId(42)).await;

    let mut request = TestFixture::session_request(&cookies.refresh_token, &cookies.csrf_token);
    request.csrf_header = Some("forged".to_string());
    let err = fixture.sessions.refresh(&request).await.unwrap_err();
    assert!(err.is_unauthorized());

    request.csrf_header = None;
    assert!(fixture.sessions.refresh(&request).await.unwrap_err().is_unauthorized());

    // Nothing was rotated
    assert_eq!(fixture.store.access_tokens().await.len(), 0);
}

#[tokio::test]
async fn test_logout_revokes_session_and_is_repeatable() {
    let fixture = TestFixture::new();
    let cookies = logged_in(&fixture, UserId(42)).await;
    let request = TestFixture::session_request(&cookies.refresh_token, &cookies.csrf_token);

    let refreshed = fixture.sessions.refresh(&request).await.unwrap();

    let logout = fixture.sessions.logout(&request).await.unwrap();
    let LogoutResult::LoggedOut { login_id, revoked } = logout else {
        panic!("expected a revoked session");
    };
    assert_eq!(login_id, refreshed.login_id);
    assert_eq!(revoked.refresh_tokens, 2);
    assert_eq!(revoked.access_tokens, 1);
    assert!(fixture.store.refresh_tokens().await.is_empty());

    let again = fixture.sessions.logout(&request).await.unwrap();
    assert_eq!(again, LogoutResult::AlreadyLoggedOut);

    let rotated = TestFixture::session_request(
        &refreshed.cookies.refresh_token,
        &refreshed.cookies.csrf_token,
    );
    assert!(fixture.sessions.refresh(&rotated).await.unwrap_err().is_unauthorized());

    let logouts = fixture
        .access_log
        .entries()
        .await
        .iter()
        .filter(|e| e.action == AccessLogAction::Logout)
        .count();
    assert_eq!(logouts, 1);
}

#[tokio::test]
async fn test_logout_without_refresh_cookie() {
    let fixture = TestFixture::new();
    let request = SessionRequest {
        refresh_token: None,
        csrf_cookie: Some("c".to_string()),
        csrf_header: Some("c".to_string()),
        client: ClientInfo::default(),
    };

    assert!(fixture.sessions.logout(&request).await.unwrap_err().is_unauthorized());
}

// =============================================================================
// Scenario 5: login key expiry
// =============================================================================

#[tokio::test]
async fn test_sweep_login_keys() {
    let fixture = TestFixture::new();
    fixture.flow.issue_login_key(UserId(1)).await.unwrap();
    fixture.flow.issue_login_key(UserId(2)).await.unwrap();

    assert_eq!(fixture.flow.sweep_login_keys(Utc::now()).await.unwrap(), 0);

    let later = Utc::now() + fixture.tokens.config().login_key_ttl + Duration::seconds(1);
    assert_eq!(fixture.flow.sweep_login_keys(later).await.unwrap(), 2);
    assert_eq!(fixture.directory.login_key_count().await, 0);
}
