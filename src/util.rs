//! Shared utility functions for the gateway.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use chrono::Utc;

/// Characters kept visible at each end of a redacted value.
const REDACT_KEEP: usize = 4;

/// Current Unix timestamp in seconds.
pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Mask a secret-bearing identifier for logging.
///
/// License keys, hardware ids, emails and proxy credentials all double as
/// authentication material, so only a short prefix and suffix are ever
/// written to logs. Values too short to keep both ends are fully masked.
pub fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= REDACT_KEEP * 2 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..REDACT_KEEP].iter().collect();
    let tail: String = chars[chars.len() - REDACT_KEEP..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Resolve the source address used for address-based throttling.
///
/// `x-forwarded-for` is only honored when the deployment sits behind a
/// trusted reverse proxy; otherwise the peer address of the connection wins.
pub fn client_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .or_else(|| headers.get("x-real-ip"))
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    peer.map(|addr| addr.ip())
}
