//! HMAC-SHA256 request signatures for proxied calls.
//!
//! The client signs `timestamp || provider || body` with its proxy
//! credential as the key and sends the hex digest alongside the timestamp.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default accepted clock difference between client and server.
pub const DEFAULT_SIGNATURE_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("malformed signature")]
    Malformed,

    #[error("malformed timestamp")]
    BadTimestamp,

    #[error("request timestamp outside the allowed window")]
    Stale,

    #[error("signature mismatch")]
    Mismatch,

    #[error("invalid signing key")]
    InvalidKey,
}

fn mac_for(
    secret: &str,
    timestamp: &str,
    provider: &str,
    body: &[u8],
) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(timestamp.as_bytes());
    mac.update(provider.as_bytes());
    mac.update(body);
    Ok(mac)
}

/// Compute the hex signature a client sends for a proxied call.
pub fn sign_request(
    secret: &str,
    timestamp: &str,
    provider: &str,
    body: &[u8],
) -> Result<String, SignatureError> {
    let mac = mac_for(secret, timestamp, provider, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify freshness and signature of a proxied call.
///
/// Accepted iff `|now - timestamp| <= window_secs` and the signature matches
/// in constant time. The timestamp is MAC'd exactly as sent.
pub fn verify_request(
    secret: &str,
    timestamp: &str,
    provider: &str,
    body: &[u8],
    signature_hex: &str,
    now: i64,
    window_secs: i64,
) -> Result<(), SignatureError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::BadTimestamp)?;
    let provided = hex::decode(signature_hex.trim()).map_err(|_| SignatureError::Malformed)?;
    if provided.len() != 32 {
        return Err(SignatureError::Malformed);
    }

    if now.abs_diff(ts) > window_secs.unsigned_abs() {
        return Err(SignatureError::Stale);
    }

    let expected = mac_for(secret, timestamp, provider, body)?
        .finalize()
        .into_bytes();
    if bool::from(expected.as_slice().ct_eq(&provided)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
