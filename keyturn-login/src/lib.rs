//! # Keyturn Login
//!
//! OAuth2 login handshake and session flows for the keyturn authentication
//! service.
//!
//! ## Overview
//!
//! - **Login flow**: PKCE authorization-code login for returning users and
//!   identity linking with a single-use login key
//! - **Session flow**: CSRF-checked refresh and logout
//! - **Providers**: the `IdentityProvider` capability and an OpenID Connect
//!   implementation on the `oauth2` crate
//! - **Directory**: the `UserDirectory` capability with an in-memory
//!   implementation
//!
//! ## Features
//!
//! - `oauth` (default): `OAuth2Provider` and `LoginFlow::from_config`
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn run() -> keyturn_auth::AuthResult<()> {
//! use keyturn_auth::{AuthConfig, MemoryTokenStore, TokenService};
//! use keyturn_events::{ClientInfo, TracingAccessLog};
//! use keyturn_login::{LoginConfig, LoginFlow, MemoryUserDirectory};
//! use std::sync::Arc;
//!
//! let tokens = Arc::new(TokenService::from_config(
//!     AuthConfig::from_env()?,
//!     Arc::new(MemoryTokenStore::new()),
//! )?);
//! let flow = LoginFlow::from_config(
//!     LoginConfig::from_env()?,
//!     tokens,
//!     Arc::new(MemoryUserDirectory::new()),
//!     Arc::new(TracingAccessLog),
//! )?;
//!
//! // Send the browser here...
//! let authorization_url = flow.begin_login("/dashboard")?;
//!
//! // ...and finish on the provider's callback.
//! let result = flow.handle_callback("state", "code", &ClientInfo::default()).await;
//! println!("{} -> {}", result.outcome, result.redirect_url);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod csrf;
pub mod directory;
pub mod flow;
pub mod outcome;
pub mod pkce;
pub mod provider;
pub mod session;

// Re-export main types
pub use config::LoginConfig;
pub use csrf::{check_csrf_token, generate_csrf_token};
pub use directory::{MemoryUserDirectory, UserDirectory};
pub use flow::{CallbackResult, LoginFlow};
pub use outcome::LoginOutcome;
pub use pkce::PkceVerifier;
pub use provider::{IdentityAssertion, IdentityProvider, OAuthConfig, OAuthProvider};
pub use session::{
    LogoutResult, RefreshedSession, SessionCookies, SessionFlow, SessionRequest,
    CSRF_TOKEN_COOKIE, CSRF_TOKEN_HEADER, REFRESH_TOKEN_COOKIE,
};

#[cfg(feature = "oauth")]
pub use provider::OAuth2Provider;
