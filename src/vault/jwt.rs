//! Unverified JWT claim inspection
//!
//! Signatures are the backend's concern. Here we only read `exp` to decide
//! whether a credential is worth attaching, failing closed on anything odd.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<serde_json::Value>,
}

/// Outcome of reading a token's expiry claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    At(DateTime<Utc>),
    Never,
    Malformed,
}

/// Decode base64url, tolerating stray padding
fn base64_decode_url(input: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(input.trim_end_matches('=')).ok()
}

pub fn expiry(token: &str) -> Expiry {
    // JWT format: header.payload.signature
    let parts: Vec<&str> = token.trim().split('.').collect();
    if parts.len() != 3 || parts.iter().take(2).any(|p| p.is_empty()) {
        return Expiry::Malformed;
    }

    let Some(payload) = base64_decode_url(parts[1]) else {
        return Expiry::Malformed;
    };

    let Ok(claims) = serde_json::from_slice::<Claims>(&payload) else {
        return Expiry::Malformed;
    };

    match claims.exp {
        None | Some(serde_json::Value::Null) => Expiry::Never,
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(Expiry::At)
            .unwrap_or(Expiry::Malformed),
    }
}

/// True for past expiry and for malformed tokens; false for tokens
/// without an expiry claim
pub fn is_expired(token: &str, now: DateTime<Utc>) -> bool {
    match expiry(token) {
        Expiry::At(exp) => exp <= now,
        Expiry::Never => false,
        Expiry::Malformed => true,
    }
}

#[cfg(test)]
pub(crate) fn make_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}
