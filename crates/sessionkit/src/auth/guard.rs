//! Bearer token claim decoding and expiry classification.
//!
//! Tokens are `header.payload.signature` with base64url segments. Only the
//! payload is read, and only to decide whether the token is worth sending:
//! the signature is never checked here, the server is authoritative.
//!
//! A token that cannot be decoded is classified as expired, so the layer
//! fails toward re-authentication rather than toward trusting it.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use sessionkit_core::config::DEFAULT_EXPIRY_BUFFER_SECS;
use sessionkit_core::error::AuthError;
use sessionkit_core::{AccessToken, Clock};

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims carried in a token payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Claims {
    /// Expiry instant, unix seconds.
    #[serde(default, deserialize_with = "unix_seconds")]
    pub exp: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Why a token could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed token: {reason}")]
pub struct MalformedToken {
    pub reason: String,
}

impl MalformedToken {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<MalformedToken> for AuthError {
    fn from(err: MalformedToken) -> Self {
        AuthError::MalformedToken { reason: err.reason }
    }
}

/// Decode the payload segment of `token`.
pub fn decode(token: &str) -> Result<Claims, MalformedToken> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(MalformedToken::new("expected three dot-separated segments"));
    };

    if payload.is_empty() {
        return Err(MalformedToken::new("empty payload segment"));
    }

    let bytes = URL_SAFE_LENIENT
        .decode(payload)
        .map_err(|e| MalformedToken::new(format!("payload is not base64url: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| MalformedToken::new(format!("payload is not a claims object: {}", e)))
}

/// `true` if `token` is unreadable, carries no `exp`, or expires within
/// `buffer_secs` of `now`.
///
/// The buffer covers the time between this check and the request reaching
/// the server.
pub fn is_expired(token: &str, buffer_secs: i64, now: i64) -> bool {
    match decode(token) {
        Ok(Claims { exp: Some(exp), .. }) => exp <= now.saturating_add(buffer_secs),
        Ok(_) | Err(_) => true,
    }
}

fn unix_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        _ => None,
    })
}

/// Expiry checks against an injected clock.
#[derive(Clone)]
pub struct TokenGuard {
    clock: Arc<dyn Clock>,
    buffer_secs: i64,
}

impl TokenGuard {
    pub fn new(clock: Arc<dyn Clock>, buffer_secs: i64) -> Self {
        Self { clock, buffer_secs }
    }

    /// A guard with the default 30 second buffer.
    pub fn with_default_buffer(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, DEFAULT_EXPIRY_BUFFER_SECS)
    }

    pub fn is_expired(&self, token: &AccessToken) -> bool {
        is_expired(token.as_str(), self.buffer_secs, self.clock.now())
    }

    /// Seconds until the token's `exp`, negative once past it.
    pub fn seconds_remaining(&self, token: &AccessToken) -> Result<i64, MalformedToken> {
        let claims = decode(token.as_str())?;
        let exp = claims
            .exp
            .ok_or_else(|| MalformedToken::new("no exp claim"))?;
        Ok(exp.saturating_sub(self.clock.now()))
    }

    pub fn buffer_secs(&self) -> i64 {
        self.buffer_secs
    }
}

impl fmt::Debug for TokenGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGuard")
            .field("buffer_secs", &self.buffer_secs)
            .finish()
    }
}
