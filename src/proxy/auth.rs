//! Authorization of a proxied call, cheapest checks first.

use axum::http::HeaderMap;
use rusqlite::Connection;

use crate::activation::{effective_limits, require_activation, require_valid_license};
use crate::crypto::{SignatureError, is_proxy_key_format, verify_request};
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{License, ProxyCredential};
use crate::rate_limit::{QuotaStatus, UsagePeriod, quota};
use crate::tiers::TierTable;
use crate::util::{extract_bearer_token, now, redact};

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// A call that passed every check and may be forwarded.
#[derive(Debug, Clone)]
pub struct AuthorizedCall {
    pub credential: ProxyCredential,
    pub license: License,
    pub period: UsagePeriod,
    /// Quota before this call is charged.
    pub quota: QuotaStatus,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn unauthorized(reason: &str) -> AppError {
    AppError::Unauthorized(reason.to_string())
}

/// Run the six proxy checks in order:
/// credential format, signature and freshness, credential lookup, license
/// validity, hardware binding, quota.
pub fn authorize(
    conn: &Connection,
    tiers: &TierTable,
    headers: &HeaderMap,
    provider: &str,
    body: &[u8],
    window_secs: i64,
) -> Result<AuthorizedCall> {
    let token = extract_bearer_token(headers)
        .filter(|t| is_proxy_key_format(t))
        .ok_or_else(|| unauthorized("Missing or malformed proxy key"))?;

    let signature = header(headers, SIGNATURE_HEADER)
        .ok_or_else(|| unauthorized("Missing request signature"))?;
    let timestamp = header(headers, TIMESTAMP_HEADER)
        .ok_or_else(|| unauthorized("Missing request timestamp"))?;

    verify_request(token, timestamp, provider, body, signature, now(), window_secs).map_err(
        |e| {
            tracing::info!(proxy_key = %redact(token), reason = %e, "Proxy signature rejected");
            match e {
                SignatureError::Stale => unauthorized("Request timestamp expired"),
                _ => unauthorized("Invalid request signature"),
            }
        },
    )?;

    let credential = queries::get_proxy_credential(conn, token)?.ok_or_else(|| {
        tracing::info!(proxy_key = %redact(token), "Unknown proxy key");
        unauthorized("Invalid proxy key")
    })?;

    let license = require_valid_license(conn, &credential.license_key)?;
    require_activation(conn, &credential.license_key, &credential.hardware_id)?;

    let (_, limits) = effective_limits(&license, tiers);
    let period = UsagePeriod::today();
    let quota = quota::check(conn, &license.key, limits, &period, 1)?;

    Ok(AuthorizedCall {
        credential,
        license,
        period,
        quota,
    })
}
