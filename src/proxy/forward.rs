//! Outbound call to the provider and relay of its response.

use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderValue, Method},
    response::Response,
};
use reqwest::Client;

use super::providers::ProviderEndpoint;
use crate::error::{AppError, Result};
use crate::rate_limit::QuotaStatus;

/// Response headers that describe the upstream connection rather than the
/// payload, and must not be copied onto ours.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
}

impl Forwarder {
    /// Build a forwarder whose calls are cut off after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Send the request upstream. Dropping the returned future (for
    /// example when the client disconnects) aborts the outbound call.
    pub async fn forward(
        &self,
        endpoint: &ProviderEndpoint,
        method: Method,
        path: &str,
        query: Option<&str>,
        client_headers: &HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response> {
        let url = endpoint.url(path, query);
        let headers = endpoint.upstream_headers(client_headers)?;

        self.client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(classify)
    }
}

/// Timeouts become 504, anything else that prevented a response becomes 503.
fn classify(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::UpstreamTimeout(err.to_string())
    } else {
        AppError::UpstreamUnavailable(err.to_string())
    }
}

fn limit_value(value: Option<i64>) -> HeaderValue {
    match value {
        Some(n) => HeaderValue::from(n),
        None => HeaderValue::from_static("unlimited"),
    }
}

/// `X-RateLimit-*` headers for a quota status that already includes the
/// current call.
pub fn rate_limit_headers(status: &QuotaStatus) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let limit = (status.limits.daily >= 0).then_some(status.limits.daily);
    headers.insert("x-ratelimit-limit", limit_value(limit));
    headers.insert("x-ratelimit-remaining", limit_value(status.daily_remaining()));
    headers.insert("x-ratelimit-reset", HeaderValue::from(status.reset_at));
    headers
}

/// Stream the upstream response back with its status and headers, plus
/// `extra` headers set by the gateway.
pub fn relay(upstream: reqwest::Response, extra: HeaderMap) -> Response {
    let status = upstream.status();
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    for (name, value) in extra.iter() {
        headers.insert(name.clone(), value.clone());
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
