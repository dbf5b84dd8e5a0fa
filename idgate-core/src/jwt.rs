//! Access token claim decoding.
//!
//! Tokens are decoded without verifying the signature; verification is the
//! backend's job. The client only needs the `exp` claim to decide whether a
//! token is worth sending.

use crate::errors::{ApiError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Claims carried in an access token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiry as Unix seconds.
    pub exp: i64,
    /// Subject, usually the user id or username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Issued-at as Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Remaining claims.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    /// Expiry as a UTC timestamp.
    pub fn expires_at(&self) -> Result<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .ok_or_else(|| ApiError::InvalidToken(format!("exp out of range: {}", self.exp)))
    }

    /// Read a string claim from the extra claims (e.g. `role`).
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// Decode the payload segment of a JWT.
///
/// Fails with [`ApiError::InvalidToken`] when the payload segment is missing,
/// is not valid base64url, is not valid JSON, or has no numeric `exp`.
pub fn decode_claims(token: &str) -> Result<Claims> {
    let payload = token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| ApiError::InvalidToken("missing payload segment".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ApiError::InvalidToken(format!("payload is not base64url: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::InvalidToken(format!("payload is not valid claims JSON: {}", e)))
}

/// Expiry of an access token.
pub fn expires_at(token: &str) -> Result<DateTime<Utc>> {
    decode_claims(token)?.expires_at()
}

/// Whether `token` expires strictly after `now`.
///
/// Malformed tokens are never valid.
pub fn is_valid_at(token: &str, now: DateTime<Utc>) -> bool {
    expires_at(token).map(|exp| exp > now).unwrap_or(false)
}

/// Whether `token` is missing, malformed, or expires within `window` of `now`.
pub fn expires_within(token: Option<&str>, window: Duration, now: DateTime<Utc>) -> bool {
    match token.map(expires_at) {
        Some(Ok(exp)) => exp <= now + window,
        _ => true,
    }
}

/// Build an unsigned token carrying `claims`.
///
/// Only useful for tests and local tooling; the signature segment is a fixed
/// placeholder.
pub fn encode_unsigned(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.unsigned", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token_expiring_in(seconds: i64) -> String {
        encode_unsigned(&json!({ "sub": "admin", "exp": Utc::now().timestamp() + seconds }))
    }

    #[test]
    fn test_decode_claims() {
        let token = encode_unsigned(&json!({ "sub": "u1", "exp": 1_900_000_000, "role": "admin" }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.exp, 1_900_000_000);
        assert_eq!(claims.sub.as_deref(), Some("u1"));
        assert_eq!(claims.get_str("role"), Some("admin"));
    }

    #[test]
    fn test_padded_payload_accepted() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":1}"#);
        let token = format!("h.{}.s", payload);
        assert_eq!(decode_claims(&token).unwrap().exp, 1);
    }

    #[test]
    fn test_missing_segment() {
        assert!(matches!(
            decode_claims("not-a-jwt"),
            Err(ApiError::InvalidToken(_))
        ));
        assert!(matches!(decode_claims("a..c"), Err(ApiError::InvalidToken(_))));
    }

    #[test]
    fn test_bad_json() {
        let token = format!("h.{}.s", URL_SAFE_NO_PAD.encode("not json"));
        assert!(matches!(decode_claims(&token), Err(ApiError::InvalidToken(_))));
    }

    #[test]
    fn test_missing_exp_is_invalid() {
        let token = encode_unsigned(&json!({ "sub": "u1" }));
        assert!(matches!(decode_claims(&token), Err(ApiError::InvalidToken(_))));
        assert!(!is_valid_at(&token, Utc::now()));
    }

    #[test]
    fn test_validity() {
        let now = Utc::now();
        assert!(!is_valid_at(&token_expiring_in(-1), now));
        assert!(is_valid_at(&token_expiring_in(3600), now));
        assert!(!is_valid_at("garbage", now));
    }

    #[test]
    fn test_expires_within() {
        let now = Utc::now();
        let window = Duration::minutes(5);
        assert!(expires_within(None, window, now));
        assert!(expires_within(Some("garbage"), window, now));
        assert!(expires_within(Some(&token_expiring_in(120)), window, now));
        assert!(!expires_within(Some(&token_expiring_in(3600)), window, now));
    }
}
