//! Bearer token decoding and validation
//!
//! Tokens are JWTs issued by the Riego API. Signatures are not checked
//! client-side; a token is usable when it is structurally sound, unexpired
//! (minus a grace window) and carries the expected issuer and audience.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consts::{EXPECTED_AUDIENCE, EXPECTED_ISSUER, EXPIRY_GRACE_MS};
use crate::error::TokenError;

/// base64url, padded or not
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decoded token payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Claims {
    /// Expiry, seconds since epoch
    #[serde(default)]
    pub(crate) exp: Option<f64>,
    #[serde(default)]
    pub(crate) iss: Option<String>,
    /// Kept raw: a JSON array audience never matches the expected string
    #[serde(default)]
    pub(crate) aud: Option<Value>,
    // Identity claims stay raw so an odd type never invalidates the token
    #[serde(default)]
    pub(crate) sub: Option<Value>,
    #[serde(default)]
    pub(crate) unique_name: Option<Value>,
    #[serde(default)]
    pub(crate) name: Option<Value>,
    #[serde(default, rename = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name")]
    pub(crate) name_uri: Option<Value>,
    #[serde(default)]
    pub(crate) role: Option<Value>,
    #[serde(default, rename = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role")]
    pub(crate) role_uri: Option<Value>,
    #[serde(flatten)]
    pub(crate) extra: serde_json::Map<String, Value>,
}

/// A string claim, or the first string of an array claim.
fn first_str(value: Option<&Value>) -> Option<&str> {
    match value? {
        Value::String(s) => Some(s),
        Value::Array(items) => items.iter().find_map(Value::as_str),
        _ => None,
    }
}

impl Claims {
    pub(crate) fn username(&self) -> Option<&str> {
        [&self.unique_name, &self.name, &self.name_uri, &self.sub]
            .into_iter()
            .find_map(|claim| first_str(claim.as_ref()))
    }

    /// First role; ASP.NET emits an array when a user holds several
    pub(crate) fn role(&self) -> Option<&str> {
        first_str(self.role.as_ref().or(self.role_uri.as_ref()))
    }

    pub(crate) fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = self.exp?;
        DateTime::<Utc>::from_timestamp_millis((exp * 1000.0) as i64)
    }
}

/// Split and decode a token's payload without judging its contents.
pub(crate) fn decode_claims(token: &str) -> Result<Claims, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Malformed {
            reason: "expected three dot-separated segments",
        });
    }
    if segments.iter().any(|s| s.is_empty()) {
        return Err(TokenError::Malformed {
            reason: "empty segment",
        });
    }

    let bytes = URL_SAFE_LENIENT
        .decode(segments[1])
        .map_err(|_| TokenError::Malformed {
            reason: "payload is not base64url",
        })?;
    let payload: Value = serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed {
        reason: "payload is not JSON",
    })?;
    if !payload.is_object() {
        return Err(TokenError::Malformed {
            reason: "payload is not a JSON object",
        });
    }
    serde_json::from_value(payload).map_err(|_| TokenError::Malformed {
        reason: "payload claims have unexpected types",
    })
}

/// The session validity predicate, parameterized by the expected claims.
#[derive(Debug, Clone)]
pub(crate) struct TokenValidator {
    issuer: String,
    audience: String,
    grace_ms: i64,
}

impl Default for TokenValidator {
    fn default() -> Self {
        Self::new(EXPECTED_ISSUER, EXPECTED_AUDIENCE)
    }
}

impl TokenValidator {
    pub(crate) fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            grace_ms: EXPIRY_GRACE_MS,
        }
    }

    pub(crate) fn validate(&self, token: &str, now_ms: i64) -> Result<Claims, TokenError> {
        let claims = decode_claims(token)?;

        let exp = claims.exp.ok_or(TokenError::MissingExpiry)?;
        let deadline_ms = exp * 1000.0 - self.grace_ms as f64;
        if now_ms as f64 >= deadline_ms {
            return Err(TokenError::Expired { exp: exp as i64 });
        }

        if claims.iss.as_deref() != Some(self.issuer.as_str()) {
            return Err(TokenError::IssuerMismatch {
                found: claims.iss.clone(),
            });
        }
        match &claims.aud {
            Some(Value::String(aud)) if *aud == self.audience => {}
            other => {
                return Err(TokenError::AudienceMismatch {
                    found: other
                        .as_ref()
                        .map(Value::to_string)
                        .unwrap_or_else(|| "none".to_string()),
                });
            }
        }

        Ok(claims)
    }

    #[cfg(test)]
    pub(crate) fn is_valid(&self, token: &str, now_ms: i64) -> bool {
        self.validate(token, now_ms).is_ok()
    }
}

/// The value to put after `Bearer `, if the stored token is fit for a header.
pub(crate) fn bearer_value(raw: &str) -> Option<&str> {
    let token = raw.trim();
    if token.is_empty() || token.contains(['\n', '\r']) {
        return None;
    }
    let quoted = |c: char| c == '"' || c == '\'';
    if token.starts_with(quoted) || token.ends_with(quoted) {
        return None;
    }
    Some(token)
}

/// Remove CR/LF the backend sometimes leaves inside the token string.
pub(crate) fn strip_line_breaks(raw: &str) -> String {
    raw.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

#[cfg(test)]
pub(crate) fn encode_token(claims: &Value) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// A token for user `agri1` that expires `exp_offset_secs` after `now_ms`.
#[cfg(test)]
pub(crate) fn token_expiring_in(now_ms: i64, exp_offset_secs: i64) -> String {
    encode_token(&serde_json::json!({
        "exp": now_ms / 1000 + exp_offset_secs,
        "iss": EXPECTED_ISSUER,
        "aud": EXPECTED_AUDIENCE,
        "unique_name": "agri1",
        "role": "Agricultor",
    }))
}
