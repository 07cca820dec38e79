//! Client-side reading of compact three-part access tokens.
//!
//! Only the middle (payload) segment is used. Nothing here verifies the
//! signature: the claims are trusted as issued, and are used solely to
//! decide when a token should be refreshed.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Seconds subtracted from the literal expiry so a token is refreshed
/// before it can expire while a request is in flight.
pub const DEFAULT_SKEW_SECS: i64 = 60;

/// URL-safe alphabet, padding optional (issuers differ on trailing `=`)
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid token format: expected 3 segments, found {0}")]
    SegmentCount(usize),

    #[error("Invalid token payload encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid token payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decoded token payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Expiry as epoch seconds
    pub fn exp(&self) -> Option<i64> {
        let exp = self.0.get("exp")?;
        exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))
    }

    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    pub fn email(&self) -> Option<&str> {
        self.get_str("email")
    }

    pub fn session_id(&self) -> Option<&str> {
        self.get_str("session_id")
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Decode the payload segment of `token` into its claims
pub fn decode(token: &str) -> Result<Claims, DecodeError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(DecodeError::SegmentCount(parts.len()));
    }

    // Accept standard-alphabet payloads too
    let payload = parts[1].replace('+', "-").replace('/', "_");
    let bytes = PAYLOAD_ENGINE.decode(payload.as_bytes())?;
    let claims: Map<String, Value> = serde_json::from_slice(&bytes)?;
    Ok(Claims(claims))
}

/// Whether `token` should be treated as expired, using the default skew
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, DEFAULT_SKEW_SECS, Utc::now())
}

pub fn is_expired_with_skew(token: &str, skew_secs: i64) -> bool {
    is_expired_at(token, skew_secs, Utc::now())
}

/// True if the token cannot be decoded, carries no `exp`, or
/// `now >= exp - skew` (millisecond resolution).
pub fn is_expired_at(token: &str, skew_secs: i64, now: DateTime<Utc>) -> bool {
    let exp = match decode(token).ok().and_then(|claims| claims.exp()) {
        Some(exp) => exp,
        None => return true,
    };

    let expiry_ms = exp.saturating_mul(1000);
    let skew_ms = skew_secs.saturating_mul(1000);
    now.timestamp_millis() >= expiry_ms.saturating_sub(skew_ms)
}

/// Whole seconds until literal expiry, 0 if already past or undecodable
pub fn time_remaining(token: &str) -> u64 {
    time_remaining_at(token, Utc::now())
}

pub fn time_remaining_at(token: &str, now: DateTime<Utc>) -> u64 {
    let exp = match decode(token).ok().and_then(|claims| claims.exp()) {
        Some(exp) => exp,
        None => return 0,
    };

    let remaining_ms = exp.saturating_mul(1000).saturating_sub(now.timestamp_millis());
    (remaining_ms.max(0) / 1000) as u64
}

// ============================================================================
// Tests
// ============================================================================
