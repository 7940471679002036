//! JWT signing and verification
//!
//! Tokens are compact JWS strings signed with an HMAC key. Verification
//! pins the configured algorithm, so a token whose header names any other
//! algorithm (including `none`) is rejected before its signature is looked
//! at.

use crate::claims::ClaimMap;
use crate::error::{AuthError, AuthResult};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Minimum accepted HMAC key length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Signs claim maps and verifies signed tokens.
pub trait TokenSigner: Send + Sync {
    /// Sign a claim map into a compact token.
    fn sign(&self, claims: &ClaimMap) -> AuthResult<String>;

    /// Verify a token's signature, algorithm and temporal claims and return
    /// its claim map.
    fn verify_and_parse(&self, token: &str) -> AuthResult<ClaimMap>;
}

/// Supported JWT algorithms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum JwtAlgorithm {
    /// HMAC using SHA-256
    HS256,
    /// HMAC using SHA-384
    HS384,
    /// HMAC using SHA-512
    #[default]
    HS512,
}

impl JwtAlgorithm {
    /// Parse from the header name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HS256" => Some(JwtAlgorithm::HS256),
            "HS384" => Some(JwtAlgorithm::HS384),
            "HS512" => Some(JwtAlgorithm::HS512),
            _ => None,
        }
    }
}

impl From<JwtAlgorithm> for Algorithm {
    fn from(alg: JwtAlgorithm) -> Self {
        match alg {
            JwtAlgorithm::HS256 => Algorithm::HS256,
            JwtAlgorithm::HS384 => Algorithm::HS384,
            JwtAlgorithm::HS512 => Algorithm::HS512,
        }
    }
}

/// JWT configuration.
#[derive(Clone)]
pub struct JwtConfig {
    /// HMAC key
    pub secret: Vec<u8>,
    /// Signing algorithm
    pub algorithm: JwtAlgorithm,
    /// Value written to and required from the `iss` claim
    pub issuer: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// HMAC [`TokenSigner`] backed by `jsonwebtoken`.
pub struct JwtSigner {
    algorithm: JwtAlgorithm,
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSigner")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("encoding_key", &"[REDACTED]")
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

impl JwtSigner {
    /// Create a signer from configuration.
    ///
    /// Fails if the key is shorter than [`MIN_SECRET_LEN`] bytes.
    pub fn new(config: JwtConfig) -> AuthResult<Self> {
        if config.secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::ConfigError(format!(
                "signing key must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }

        let mut validation = Validation::new(config.algorithm.into());
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "nbf", "iss"]);
        validation.set_issuer(&[&config.issuer]);

        Ok(Self {
            algorithm: config.algorithm,
            issuer: config.issuer,
            encoding_key: EncodingKey::from_secret(&config.secret),
            decoding_key: DecodingKey::from_secret(&config.secret),
            validation,
        })
    }

    /// Algorithm this signer uses.
    pub fn algorithm(&self) -> JwtAlgorithm {
        self.algorithm
    }
}

impl TokenSigner for JwtSigner {
    fn sign(&self, claims: &ClaimMap) -> AuthResult<String> {
        let mut claims = claims.clone();
        claims.insert("iss".to_string(), Value::from(self.issuer.clone()));

        let header = Header::new(self.algorithm.into());
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Token encoding failed: {}", e)))
    }

    fn verify_and_parse(&self, token: &str) -> AuthResult<ClaimMap> {
        decode::<ClaimMap>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::InvalidAlgorithm => {
                    AuthError::InvalidToken("Unexpected signing algorithm".to_string())
                }
                ErrorKind::InvalidIssuer => AuthError::InvalidToken("Invalid issuer".to_string()),
                ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
                ErrorKind::InvalidToken => AuthError::InvalidToken("Malformed token".to_string()),
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config(secret: &[u8]) -> JwtConfig {
        JwtConfig {
            secret: secret.to_vec(),
            algorithm: JwtAlgorithm::HS512,
            issuer: "keyturn-test".to_string(),
        }
    }

    fn signer() -> JwtSigner {
        JwtSigner::new(config(&[7u8; 32])).unwrap()
    }

    fn claims(nbf_offset: i64, exp_offset: i64) -> ClaimMap {
        let now = Utc::now().timestamp();
        let mut map = ClaimMap::new();
        map.insert("nbf".to_string(), Value::from(now + nbf_offset));
        map.insert("exp".to_string(), Value::from(now + exp_offset));
        map.insert("login_id".to_string(), Value::from("abc"));
        map
    }

    #[test]
    fn test_rejects_short_secret() {
        let result = JwtSigner::new(config(&[1u8; 16]));
        assert!(matches!(result, Err(AuthError::ConfigError(_))));
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = signer();
        let token = signer.sign(&claims(0, 60)).unwrap();
        let parsed = signer.verify_and_parse(&token).unwrap();

        assert_eq!(parsed.get("login_id").and_then(Value::as_str), Some("abc"));
        assert_eq!(parsed.get("iss").and_then(Value::as_str), Some("keyturn-test"));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let signer = signer();
        let token = signer.sign(&claims(0, 60)).unwrap();

        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let other = signer.sign(&claims(0, 3600)).unwrap();
        parts[1] = other.split('.').nth(1).unwrap().to_string();
        let forged = parts.join(".");

        assert!(matches!(
            signer.verify_and_parse(&forged),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_any_altered_payload_byte_is_rejected() {
        let signer = signer();
        let token = signer.sign(&claims(0, 60)).unwrap();
        let (header, rest) = token.split_once('.').unwrap();
        let (payload, signature) = rest.split_once('.').unwrap();

        for i in 0..payload.len() {
            let mut bytes = payload.as_bytes().to_vec();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let altered = String::from_utf8(bytes).unwrap();
            let forged = format!("{}.{}.{}", header, altered, signature);

            assert!(
                matches!(signer.verify_and_parse(&forged), Err(AuthError::InvalidSignature)),
                "byte {} of the payload was accepted",
                i
            );
        }
    }

    #[test]
    fn test_foreign_key_is_rejected() {
        let token = JwtSigner::new(config(&[9u8; 32]))
            .unwrap()
            .sign(&claims(0, 60))
            .unwrap();

        assert!(matches!(
            signer().verify_and_parse(&token),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_other_algorithm_is_rejected() {
        let other = JwtSigner::new(JwtConfig {
            algorithm: JwtAlgorithm::HS256,
            ..config(&[7u8; 32])
        })
        .unwrap();
        let token = other.sign(&claims(0, 60)).unwrap();

        assert!(matches!(
            signer().verify_and_parse(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_temporal_claims() {
        let signer = signer();

        let expired = signer.sign(&claims(-120, -60)).unwrap();
        assert!(matches!(
            signer.verify_and_parse(&expired),
            Err(AuthError::TokenExpired)
        ));

        let early = signer.sign(&claims(60, 120)).unwrap();
        assert!(matches!(
            signer.verify_and_parse(&early),
            Err(AuthError::TokenNotYetValid)
        ));
    }

    #[test]
    fn test_wrong_issuer_is_rejected() {
        let other = JwtSigner::new(JwtConfig {
            issuer: "someone-else".to_string(),
            ..config(&[7u8; 32])
        })
        .unwrap();
        let token = other.sign(&claims(0, 60)).unwrap();

        assert!(matches!(
            signer().verify_and_parse(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            signer().verify_and_parse("not-a-token"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let rendered = format!("{:?}", signer());
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("7, 7, 7"));
    }
}
