//! Token lifecycle service
//!
//! Mints and verifies login-state tokens, issues refresh tokens, rotates
//! them into refresh/access pairs and revokes whole login sessions.
//!
//! Lifecycle of one login session:
//!
//! ```text
//! NoSession -> LoginPending -> Authenticated -> [Rotating <-> Authenticated] -> Revoked
//! ```
//!
//! Login-state tokens are never persisted. Refresh and access tokens are
//! persisted so they can be revoked by LoginID.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::claims::{
    AccessTokenClaims, BaseClaims, Claims, FirstLoginStateClaims, LoginState, LoginStateClaims,
    RefreshTokenClaims,
};
use crate::config::AuthConfig;
use crate::crypto::{AesGcmEncrypter, Encrypter};
use crate::error::{AuthError, AuthResult};
use crate::jwt::{JwtSigner, TokenSigner};
use crate::repository::{RevokedTokens, Rotation, SweepReport, TokenRepository};
use crate::store::{AccessTokenRecord, NewRefreshToken, TokenStore};
use crate::types::{LoginKey, UserId};

/// A freshly issued login session.
#[derive(Clone)]
pub struct IssuedSession {
    /// Owning user
    pub user_id: UserId,
    /// New login session identifier
    pub login_id: Uuid,
    /// Signed refresh token
    pub refresh_token: String,
    /// Persisted refresh row
    pub refresh_token_id: i64,
    /// Refresh token expiry
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedSession")
            .field("user_id", &self.user_id)
            .field("login_id", &self.login_id)
            .field("refresh_token", &"[REDACTED]")
            .field("refresh_token_id", &self.refresh_token_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A refresh token that verified and resolved to a persisted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedSession {
    /// Decoded claims
    pub claims: RefreshTokenClaims,
    /// Owning user, from the store
    pub user_id: UserId,
    /// Refresh row the token resolved to
    pub refresh_token_id: i64,
}

impl VerifiedSession {
    /// Login session identifier.
    pub fn login_id(&self) -> Uuid {
        self.claims.login_id
    }
}

/// Result of a rotation.
#[derive(Clone)]
pub struct RefreshedTokens {
    /// Login session identifier, unchanged by rotation
    pub login_id: Uuid,
    /// Signed access token
    pub access_token: String,
    /// Signed successor refresh token
    pub refresh_token: String,
    /// Access token expiry
    pub access_expires_at: DateTime<Utc>,
    /// Successor refresh token expiry
    pub refresh_expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("login_id", &self.login_id)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// Token lifecycle service.
pub struct TokenService {
    config: AuthConfig,
    signer: Arc<dyn TokenSigner>,
    encrypter: Arc<dyn Encrypter>,
    repository: TokenRepository,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("config", &self.config)
            .field("repository", &self.repository)
            .finish()
    }
}

impl TokenService {
    /// Create a service from explicit collaborators.
    pub fn new(
        config: AuthConfig,
        signer: Arc<dyn TokenSigner>,
        encrypter: Arc<dyn Encrypter>,
        repository: TokenRepository,
    ) -> Self {
        Self {
            config,
            signer,
            encrypter,
            repository,
        }
    }

    /// Create a service with the JWT signer and AES-GCM encrypter the
    /// configuration describes.
    pub fn from_config(config: AuthConfig, store: Arc<dyn TokenStore>) -> AuthResult<Self> {
        let signer = JwtSigner::new(config.jwt_config())?;
        let encrypter = AesGcmEncrypter::new(config.encryption_key);

        Ok(Self::new(
            config,
            Arc::new(signer),
            Arc::new(encrypter),
            TokenRepository::new(store),
        ))
    }

    /// Get the configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Get the repository.
    pub fn repository(&self) -> &TokenRepository {
        &self.repository
    }

    fn mint<C: Claims>(&self, claims: &C) -> AuthResult<String> {
        self.signer.sign(&claims.encode())
    }

    fn verify<C: Claims>(&self, token: &str, now: DateTime<Utc>) -> AuthResult<C> {
        let map = self.signer.verify_and_parse(token)?;
        let claims = C::decode(&map)?;
        claims.validate(now)?;
        Ok(claims)
    }

    fn encrypt_code_verifier(&self, code_verifier: &str) -> AuthResult<String> {
        let sealed = self.encrypter.encrypt(code_verifier.as_bytes())?;
        Ok(hex::encode(sealed))
    }

    /// Mint a login-state token for a returning user.
    #[instrument(skip(self, code_verifier))]
    pub fn create_state_token(
        &self,
        current_page_url: &str,
        code_verifier: &str,
    ) -> AuthResult<String> {
        let claims = LoginStateClaims {
            base: BaseClaims::new(Utc::now(), self.config.login_ttl),
            current_page_url: current_page_url.to_string(),
            encrypted_code_verifier: self.encrypt_code_verifier(code_verifier)?,
        };

        debug!(jti = %claims.base.jti, "Created login state");
        self.mint(&claims)
    }

    /// Mint a login-state token that links an identity using a login key.
    #[instrument(skip(self, login_key, code_verifier))]
    pub fn create_state_token_with_login_key(
        &self,
        login_key: LoginKey,
        code_verifier: &str,
    ) -> AuthResult<String> {
        let claims = FirstLoginStateClaims {
            base: BaseClaims::new(Utc::now(), self.config.login_ttl),
            login_key,
            encrypted_code_verifier: self.encrypt_code_verifier(code_verifier)?,
        };

        debug!(jti = %claims.base.jti, "Created first-login state");
        self.mint(&claims)
    }

    /// Verify a login-state token and dispatch it by purpose.
    ///
    /// Any other purpose, or a structurally invalid state, is rejected.
    #[instrument(skip(self, token))]
    pub fn verify_state_token(&self, token: &str) -> AuthResult<LoginState> {
        let result = self
            .signer
            .verify_and_parse(token)
            .and_then(|map| LoginState::decode(&map))
            .and_then(|state| state.validate(Utc::now()).map(|_| state));

        if let Err(ref e) = result {
            warn!(error = %e, "Rejected login state");
        }
        result
    }

    /// Decrypt the hex-encoded PKCE verifier carried by a login state.
    pub fn decrypt_code_verifier(&self, encrypted_code_verifier: &str) -> AuthResult<String> {
        let sealed = hex::decode(encrypted_code_verifier).map_err(|_| AuthError::DecryptFailed)?;
        let plain = self.encrypter.decrypt(&sealed)?;
        String::from_utf8(plain).map_err(|_| AuthError::DecryptFailed)
    }

    /// Issue a brand-new login session for a user.
    ///
    /// This is the only place a LoginID is created.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn create_refresh_token(&self, user_id: UserId) -> AuthResult<IssuedSession> {
        let now = Utc::now();
        let claims = RefreshTokenClaims {
            base: BaseClaims::new(now, self.config.refresh_ttl),
            login_id: Uuid::new_v4(),
        };
        let refresh_token = self.mint(&claims)?;

        let refresh_token_id = self
            .repository
            .save_refresh_token(NewRefreshToken {
                user_id,
                jti: claims.base.jti,
                login_id: claims.login_id,
                created_at: now,
                expires_at: claims.base.expires_at,
            })
            .await?;

        debug!(login_id = %claims.login_id, refresh_token_id, "Issued login session");
        Ok(IssuedSession {
            user_id,
            login_id: claims.login_id,
            refresh_token,
            refresh_token_id,
            expires_at: claims.base.expires_at,
        })
    }

    /// Verify a refresh token and resolve its persisted row.
    ///
    /// A token with no row (revoked, swept or never issued) is
    /// [`AuthError::SessionUnknown`].
    #[instrument(skip(self, token))]
    pub async fn verify_refresh_token(&self, token: &str) -> AuthResult<VerifiedSession> {
        let claims = match self.verify::<RefreshTokenClaims>(token, Utc::now()) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Rejected refresh token");
                return Err(e);
            }
        };

        let record = match self.repository.find_refresh_token(claims.base.jti).await {
            Ok(record) => record,
            Err(e) => {
                if e.is_server_error() {
                    error!(error = %e, "Refresh token lookup failed");
                } else {
                    warn!(jti = %claims.base.jti, "Unknown session");
                }
                return Err(e);
            }
        };

        Ok(VerifiedSession {
            claims,
            user_id: record.user_id,
            refresh_token_id: record.id,
        })
    }

    /// Rotate a verified session into a new access token and a successor
    /// refresh token with the same LoginID.
    ///
    /// Both rows are written in one transaction. Both tokens expire at
    /// `min(now + access_ttl, presented expiry)`, so a session stays alive
    /// only while it keeps refreshing and never outlives its first login.
    #[instrument(skip(self, session), fields(login_id = %session.login_id(), user_id = %session.user_id))]
    pub async fn refresh_token(&self, session: &VerifiedSession) -> AuthResult<RefreshedTokens> {
        let now = Utc::now();
        let access_expires_at =
            std::cmp::min(now + self.config.access_ttl, session.claims.base.expires_at);
        let refresh_expires_at = access_expires_at;
        if access_expires_at <= now {
            return Err(AuthError::TokenExpired);
        }

        let access = AccessTokenClaims {
            base: BaseClaims::bounded(now, access_expires_at),
        };
        let refresh = RefreshTokenClaims {
            base: BaseClaims::bounded(now, refresh_expires_at),
            login_id: session.login_id(),
        };
        let access_token = self.mint(&access)?;
        let refresh_token = self.mint(&refresh)?;

        let rows = self
            .repository
            .rotate(Rotation {
                parent_refresh_token_id: session.refresh_token_id,
                access_jti: access.base.jti,
                access_expires_at: access.base.expires_at,
                refresh: NewRefreshToken {
                    user_id: session.user_id,
                    jti: refresh.base.jti,
                    login_id: refresh.login_id,
                    created_at: now,
                    expires_at: refresh.base.expires_at,
                },
            })
            .await?;

        debug!(
            access_token_id = rows.access_token_id,
            refresh_token_id = rows.refresh_token_id,
            "Rotated refresh token"
        );
        Ok(RefreshedTokens {
            login_id: refresh.login_id,
            access_token,
            refresh_token,
            access_expires_at: access.base.expires_at,
            refresh_expires_at: refresh.base.expires_at,
        })
    }

    /// Revoke every token of a login session.
    ///
    /// Revoking an already revoked session is a no-op.
    #[instrument(skip(self))]
    pub async fn invalidate_tokens(&self, login_id: Uuid) -> AuthResult<RevokedTokens> {
        self.repository.delete_by_login_id(login_id).await
    }

    /// Delete every token row that expired at or before `cutoff`.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> AuthResult<SweepReport> {
        let report = self.repository.delete_expired(cutoff).await?;
        debug!(
            access_tokens = report.access_tokens,
            refresh_tokens = report.refresh_tokens,
            "Swept expired tokens"
        );
        Ok(report)
    }

    /// Verify an access token's signature and expiry without touching the
    /// store.
    #[instrument(skip(self, token))]
    pub fn verify_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        self.verify::<AccessTokenClaims>(token, Utc::now())
            .inspect_err(|e| warn!(error = %e, "Rejected access token"))
    }

    /// Check that a verified access token still has a persisted row.
    ///
    /// Fails with [`AuthError::SessionUnknown`] after revocation or sweep.
    pub async fn ensure_access_token_active(
        &self,
        claims: &AccessTokenClaims,
    ) -> AuthResult<AccessTokenRecord> {
        self.repository.find_access_token(claims.base.jti).await
    }
}
