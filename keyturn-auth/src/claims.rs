//! Token claims and their claim-map codec
//!
//! Every token keyturn signs carries [`BaseClaims`] plus the fields of its
//! purpose. The purpose is written into the token as an explicit `pur`
//! claim and read before any purpose-specific field, so a token minted for
//! one purpose never decodes as another.
//!
//! Decoding fails closed: a missing or wrongly typed field is an error,
//! never a default value.

use crate::error::{AuthError, AuthResult};
use crate::types::LoginKey;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Generic claim mapping exchanged with the token signer.
pub type ClaimMap = serde_json::Map<String, Value>;

/// Claim names as they appear on the wire.
pub mod names {
    /// Token identifier
    pub const JTI: &str = "jti";
    /// Not-before (Unix seconds)
    pub const NBF: &str = "nbf";
    /// Expiry (Unix seconds)
    pub const EXP: &str = "exp";
    /// Purpose discriminant
    pub const PURPOSE: &str = "pur";
    /// Login session identifier
    pub const LOGIN_ID: &str = "login_id";
    /// Page the user started the login from
    pub const CURRENT_PAGE_URL: &str = "current_page_url";
    /// Hex-encoded encrypted PKCE verifier
    pub const ENCRYPTED_CODE_VERIFIER: &str = "encrypted_code_verifier";
    /// One-time login key
    pub const LOGIN_KEY: &str = "login_key";
}

/// Purpose a token was minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    /// Returning-user login state
    LoginState,
    /// Identity-linking login state
    FirstLoginState,
    /// Refresh token
    Refresh,
    /// Access token
    Access,
}

impl TokenPurpose {
    /// Get the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::LoginState => "login_state",
            TokenPurpose::FirstLoginState => "first_login_state",
            TokenPurpose::Refresh => "refresh",
            TokenPurpose::Access => "access",
        }
    }

    /// Parse from the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "login_state" => Some(TokenPurpose::LoginState),
            "first_login_state" => Some(TokenPurpose::FirstLoginState),
            "refresh" => Some(TokenPurpose::Refresh),
            "access" => Some(TokenPurpose::Access),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims shared by every token purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseClaims {
    /// Unique, time-sortable token identifier (UUIDv7)
    pub jti: Uuid,
    /// Token is not valid before this instant
    pub not_before: DateTime<Utc>,
    /// Token is not valid at or after this instant
    pub expires_at: DateTime<Utc>,
}

impl BaseClaims {
    /// Create base claims with a fresh identifier valid for `[now, now + ttl)`.
    ///
    /// Timestamps are truncated to whole seconds, the resolution the wire
    /// format carries.
    pub fn new(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self::bounded(now, now + ttl)
    }

    /// Create base claims with a fresh identifier and explicit bounds.
    pub fn bounded(not_before: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            jti: Uuid::now_v7(),
            not_before: not_before.trunc_subsecs(0),
            expires_at: expires_at.trunc_subsecs(0),
        }
    }

    /// Check the temporal bounds against `now`.
    ///
    /// Valid when `not_before <= now < expires_at`.
    pub fn validate(&self, now: DateTime<Utc>) -> AuthResult<()> {
        if self.jti.is_nil() {
            return Err(AuthError::MissingClaim(names::JTI.to_string()));
        }
        if now < self.not_before {
            return Err(AuthError::TokenNotYetValid);
        }
        if self.expires_at <= now {
            return Err(AuthError::TokenExpired);
        }
        Ok(())
    }

    fn write_to(&self, claims: &mut ClaimMap) {
        claims.insert(names::JTI.to_string(), Value::from(self.jti.to_string()));
        claims.insert(names::NBF.to_string(), Value::from(self.not_before.timestamp()));
        claims.insert(names::EXP.to_string(), Value::from(self.expires_at.timestamp()));
    }

    fn read_from(claims: &ClaimMap) -> AuthResult<Self> {
        Ok(Self {
            jti: read_uuid(claims, names::JTI)?,
            not_before: read_timestamp(claims, names::NBF)?,
            expires_at: read_timestamp(claims, names::EXP)?,
        })
    }
}

/// A claim set of one purpose.
pub trait Claims: Sized {
    /// Purpose tag written into and required from the claim map.
    const PURPOSE: TokenPurpose;

    /// Shared claims.
    fn base(&self) -> &BaseClaims;

    /// Write the purpose-specific fields.
    fn write_fields(&self, claims: &mut ClaimMap);

    /// Read the purpose-specific fields.
    fn read_fields(base: BaseClaims, claims: &ClaimMap) -> AuthResult<Self>;

    /// Encode into a claim map ready for signing.
    fn encode(&self) -> ClaimMap {
        let mut claims = ClaimMap::new();
        self.base().write_to(&mut claims);
        claims.insert(
            names::PURPOSE.to_string(),
            Value::from(Self::PURPOSE.as_str()),
        );
        self.write_fields(&mut claims);
        claims
    }

    /// Decode from a verified claim map.
    fn decode(claims: &ClaimMap) -> AuthResult<Self> {
        let found = read_string(claims, names::PURPOSE)?;
        if found != Self::PURPOSE.as_str() {
            return Err(AuthError::WrongPurpose {
                expected: Self::PURPOSE.as_str(),
                found: found.to_string(),
            });
        }
        let base = BaseClaims::read_from(claims)?;
        Self::read_fields(base, claims)
    }

    /// Check temporal bounds and purpose-specific invariants.
    fn validate(&self, now: DateTime<Utc>) -> AuthResult<()> {
        self.base().validate(now)
    }
}

/// State carried through the provider redirect for a returning user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStateClaims {
    /// Shared claims
    pub base: BaseClaims,
    /// Page to return to after login
    pub current_page_url: String,
    /// Hex-encoded encrypted PKCE verifier
    pub encrypted_code_verifier: String,
}

impl Claims for LoginStateClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::LoginState;

    fn base(&self) -> &BaseClaims {
        &self.base
    }

    fn write_fields(&self, claims: &mut ClaimMap) {
        claims.insert(
            names::CURRENT_PAGE_URL.to_string(),
            Value::from(self.current_page_url.clone()),
        );
        claims.insert(
            names::ENCRYPTED_CODE_VERIFIER.to_string(),
            Value::from(self.encrypted_code_verifier.clone()),
        );
    }

    fn read_fields(base: BaseClaims, claims: &ClaimMap) -> AuthResult<Self> {
        Ok(Self {
            base,
            current_page_url: read_string(claims, names::CURRENT_PAGE_URL)?.to_string(),
            encrypted_code_verifier: read_string(claims, names::ENCRYPTED_CODE_VERIFIER)?
                .to_string(),
        })
    }
}

/// State carried through the provider redirect while linking an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstLoginStateClaims {
    /// Shared claims
    pub base: BaseClaims,
    /// Login key authorizing the link
    pub login_key: LoginKey,
    /// Hex-encoded encrypted PKCE verifier
    pub encrypted_code_verifier: String,
}

impl Claims for FirstLoginStateClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::FirstLoginState;

    fn base(&self) -> &BaseClaims {
        &self.base
    }

    fn write_fields(&self, claims: &mut ClaimMap) {
        claims.insert(
            names::LOGIN_KEY.to_string(),
            Value::from(self.login_key.value()),
        );
        claims.insert(
            names::ENCRYPTED_CODE_VERIFIER.to_string(),
            Value::from(self.encrypted_code_verifier.clone()),
        );
    }

    fn read_fields(base: BaseClaims, claims: &ClaimMap) -> AuthResult<Self> {
        let raw = claims
            .get(names::LOGIN_KEY)
            .ok_or_else(|| AuthError::MissingClaim(names::LOGIN_KEY.to_string()))?
            .as_i64()
            .ok_or_else(|| malformed(names::LOGIN_KEY, "expected an integer"))?;
        let login_key =
            LoginKey::from_raw(raw).map_err(|_| malformed(names::LOGIN_KEY, "negative value"))?;

        Ok(Self {
            base,
            login_key,
            encrypted_code_verifier: read_string(claims, names::ENCRYPTED_CODE_VERIFIER)?
                .to_string(),
        })
    }
}

/// Refresh token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTokenClaims {
    /// Shared claims
    pub base: BaseClaims,
    /// Login session this token belongs to
    pub login_id: Uuid,
}

impl Claims for RefreshTokenClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::Refresh;

    fn base(&self) -> &BaseClaims {
        &self.base
    }

    fn write_fields(&self, claims: &mut ClaimMap) {
        claims.insert(
            names::LOGIN_ID.to_string(),
            Value::from(self.login_id.to_string()),
        );
    }

    fn read_fields(base: BaseClaims, claims: &ClaimMap) -> AuthResult<Self> {
        Ok(Self {
            base,
            login_id: read_uuid(claims, names::LOGIN_ID)?,
        })
    }

    fn validate(&self, now: DateTime<Utc>) -> AuthResult<()> {
        self.base.validate(now)?;
        if self.login_id.is_nil() {
            return Err(AuthError::MissingClaim(names::LOGIN_ID.to_string()));
        }
        Ok(())
    }
}

/// Access token claims. Authorization rests on signature and expiry alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessTokenClaims {
    /// Shared claims
    pub base: BaseClaims,
}

impl Claims for AccessTokenClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::Access;

    fn base(&self) -> &BaseClaims {
        &self.base
    }

    fn write_fields(&self, _claims: &mut ClaimMap) {}

    fn read_fields(base: BaseClaims, _claims: &ClaimMap) -> AuthResult<Self> {
        Ok(Self { base })
    }
}

/// Any claim set keyturn mints, tagged by purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenClaims {
    /// Returning-user login state
    LoginState(LoginStateClaims),
    /// Identity-linking login state
    FirstLoginState(FirstLoginStateClaims),
    /// Refresh token
    Refresh(RefreshTokenClaims),
    /// Access token
    Access(AccessTokenClaims),
}

impl TokenClaims {
    /// Purpose of the wrapped claim set.
    pub fn purpose(&self) -> TokenPurpose {
        match self {
            TokenClaims::LoginState(_) => TokenPurpose::LoginState,
            TokenClaims::FirstLoginState(_) => TokenPurpose::FirstLoginState,
            TokenClaims::Refresh(_) => TokenPurpose::Refresh,
            TokenClaims::Access(_) => TokenPurpose::Access,
        }
    }

    /// Shared claims of the wrapped claim set.
    pub fn base(&self) -> &BaseClaims {
        match self {
            TokenClaims::LoginState(c) => &c.base,
            TokenClaims::FirstLoginState(c) => &c.base,
            TokenClaims::Refresh(c) => &c.base,
            TokenClaims::Access(c) => &c.base,
        }
    }

    /// Encode into a claim map.
    pub fn encode(&self) -> ClaimMap {
        match self {
            TokenClaims::LoginState(c) => c.encode(),
            TokenClaims::FirstLoginState(c) => c.encode(),
            TokenClaims::Refresh(c) => c.encode(),
            TokenClaims::Access(c) => c.encode(),
        }
    }

    /// Decode by reading the purpose tag first and dispatching on it.
    pub fn decode(claims: &ClaimMap) -> AuthResult<Self> {
        let tag = read_string(claims, names::PURPOSE)?;
        match TokenPurpose::parse(tag) {
            Some(TokenPurpose::LoginState) => LoginStateClaims::decode(claims).map(Self::LoginState),
            Some(TokenPurpose::FirstLoginState) => {
                FirstLoginStateClaims::decode(claims).map(Self::FirstLoginState)
            }
            Some(TokenPurpose::Refresh) => RefreshTokenClaims::decode(claims).map(Self::Refresh),
            Some(TokenPurpose::Access) => AccessTokenClaims::decode(claims).map(Self::Access),
            None => Err(malformed(names::PURPOSE, "unknown purpose")),
        }
    }

    /// Check temporal bounds and purpose-specific invariants.
    pub fn validate(&self, now: DateTime<Utc>) -> AuthResult<()> {
        match self {
            TokenClaims::LoginState(c) => c.validate(now),
            TokenClaims::FirstLoginState(c) => c.validate(now),
            TokenClaims::Refresh(c) => c.validate(now),
            TokenClaims::Access(c) => c.validate(now),
        }
    }
}

/// Classification of a verified login-state claim map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStateKind {
    /// Returning-user login
    Login,
    /// Identity-linking login
    FirstLogin,
    /// Anything else, including other token purposes
    Unknown,
}

impl LoginStateKind {
    /// Classify a claim map by its purpose tag alone.
    pub fn classify(claims: &ClaimMap) -> Self {
        match claims
            .get(names::PURPOSE)
            .and_then(Value::as_str)
            .and_then(TokenPurpose::parse)
        {
            Some(TokenPurpose::LoginState) => LoginStateKind::Login,
            Some(TokenPurpose::FirstLoginState) => LoginStateKind::FirstLogin,
            _ => LoginStateKind::Unknown,
        }
    }
}

/// A decoded login-state token, dispatched by purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    /// Returning-user login
    Login(LoginStateClaims),
    /// Identity-linking login
    FirstLogin(FirstLoginStateClaims),
}

impl LoginState {
    /// Classify and decode a verified claim map.
    ///
    /// Unknown purposes are rejected as invalid tokens.
    pub fn decode(claims: &ClaimMap) -> AuthResult<Self> {
        match LoginStateKind::classify(claims) {
            LoginStateKind::Login => LoginStateClaims::decode(claims).map(LoginState::Login),
            LoginStateKind::FirstLogin => {
                FirstLoginStateClaims::decode(claims).map(LoginState::FirstLogin)
            }
            LoginStateKind::Unknown => Err(AuthError::InvalidToken(
                "not a login state token".to_string(),
            )),
        }
    }

    /// Classification of this state.
    pub fn kind(&self) -> LoginStateKind {
        match self {
            LoginState::Login(_) => LoginStateKind::Login,
            LoginState::FirstLogin(_) => LoginStateKind::FirstLogin,
        }
    }

    /// Shared claims.
    pub fn base(&self) -> &BaseClaims {
        match self {
            LoginState::Login(c) => &c.base,
            LoginState::FirstLogin(c) => &c.base,
        }
    }

    /// Encrypted PKCE verifier carried by either state.
    pub fn encrypted_code_verifier(&self) -> &str {
        match self {
            LoginState::Login(c) => &c.encrypted_code_verifier,
            LoginState::FirstLogin(c) => &c.encrypted_code_verifier,
        }
    }

    /// Check temporal bounds.
    pub fn validate(&self, now: DateTime<Utc>) -> AuthResult<()> {
        self.base().validate(now)
    }
}

fn malformed(claim: &str, reason: &str) -> AuthError {
    AuthError::InvalidToken(format!("claim `{}`: {}", claim, reason))
}

fn read_string<'a>(claims: &'a ClaimMap, name: &str) -> AuthResult<&'a str> {
    claims
        .get(name)
        .ok_or_else(|| AuthError::MissingClaim(name.to_string()))?
        .as_str()
        .ok_or_else(|| malformed(name, "expected a string"))
}

fn read_uuid(claims: &ClaimMap, name: &str) -> AuthResult<Uuid> {
    let raw = read_string(claims, name)?;
    let id = Uuid::parse_str(raw).map_err(|_| malformed(name, "expected a UUID"))?;
    if id.is_nil() {
        return Err(AuthError::MissingClaim(name.to_string()));
    }
    Ok(id)
}

fn read_timestamp(claims: &ClaimMap, name: &str) -> AuthResult<DateTime<Utc>> {
    let secs = claims
        .get(name)
        .ok_or_else(|| AuthError::MissingClaim(name.to_string()))?
        .as_i64()
        .ok_or_else(|| malformed(name, "expected integer seconds"))?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| malformed(name, "timestamp out of range"))
}
