//! Double-submit CSRF tokens
//!
//! The CSRF token travels in a script-readable cookie next to the
//! refresh-token cookie. Refresh and logout requests must echo it in a
//! header.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use keyturn_auth::{AuthError, AuthResult};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Random bytes per token.
pub const CSRF_TOKEN_BYTES: usize = 32;

/// Draw a fresh CSRF token.
pub fn generate_csrf_token() -> AuthResult<String> {
    let mut bytes = [0u8; CSRF_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::Crypto(format!("CSRF token generation failed: {}", e)))?;
    Ok(URL_SAFE.encode(bytes))
}

/// Check the header value against the cookie value.
pub fn check_csrf_token(cookie: Option<&str>, header: Option<&str>) -> AuthResult<()> {
    let cookie = cookie.ok_or_else(|| AuthError::Unauthorized("csrf token not found".to_string()))?;
    match header {
        Some(header) if constant_time_eq(header.as_bytes(), cookie.as_bytes()) => Ok(()),
        _ => Err(AuthError::Unauthorized("csrf token mismatch".to_string())),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_distinct() {
        let a = generate_csrf_token().unwrap();
        let b = generate_csrf_token().unwrap();

        assert_ne!(a, b);
        assert_eq!(URL_SAFE.decode(&a).unwrap().len(), CSRF_TOKEN_BYTES);
    }

    #[test]
    fn test_check_csrf_token() {
        assert!(check_csrf_token(Some("abc"), Some("abc")).is_ok());

        let missing_cookie = check_csrf_token(None, Some("abc")).unwrap_err();
        assert!(missing_cookie.is_unauthorized());

        assert!(check_csrf_token(Some("abc"), None).unwrap_err().is_unauthorized());
        assert!(check_csrf_token(Some("abc"), Some("abd")).unwrap_err().is_unauthorized());
        assert!(check_csrf_token(Some("abc"), Some("abcd")).unwrap_err().is_unauthorized());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"tokem"));
        assert!(!constant_time_eq(b"token", b"token2"));
        assert!(!constant_time_eq(b"", b"t"));
        assert!(constant_time_eq(b"", b""));
    }
}
