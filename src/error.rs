use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::rate_limit::QuotaExceeded;
use crate::tiers::TierError;
use crate::util;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("{0}")]
    QuotaExceeded(QuotaExceeded),

    #[error("Too many requests from this address")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<TierError> for AppError {
    fn from(err: TierError) -> Self {
        match err {
            TierError::Unknown(name) => AppError::NotFound(format!("Unknown tier '{}'", name)),
            TierError::NotDeprecated(name) => {
                AppError::Conflict(format!("Tier '{}' is not deprecated", name))
            }
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<QuotaExceeded> for AppError {
    fn from(err: QuotaExceeded) -> Self {
        AppError::QuotaExceeded(err)
    }
}

impl AppError {
    /// Machine-readable code carried in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::PayloadTooLarge => "payload_too_large",
            AppError::QuotaExceeded(q) => q.window.code(),
            AppError::TooManyRequests { .. } => "too_many_requests",
            AppError::UpstreamTimeout(_) => "upstream_timeout",
            AppError::UpstreamUnavailable(_) => "upstream_unavailable",
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Crypto(_)
            | AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::QuotaExceeded(_) | AppError::TooManyRequests { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Crypto(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Provider-style error envelope, the shape AI client SDKs already parse.
fn nested_error(message: &str, kind: &str, code: &str) -> serde_json::Value {
    json!({
        "error": {
            "message": message,
            "type": kind,
            "code": code,
        }
    })
}

fn header_value(value: impl ToString) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        match &self {
            AppError::QuotaExceeded(q) => {
                tracing::info!(
                    license = %util::redact(&q.license_key),
                    window = q.window.as_str(),
                    used = q.used,
                    limit = q.limit,
                    "Quota exceeded"
                );
                let mut headers = HeaderMap::new();
                headers.insert("x-ratelimit-limit", header_value(q.limit));
                headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
                headers.insert("x-ratelimit-reset", header_value(q.reset_at));
                headers.insert(
                    header::RETRY_AFTER,
                    header_value((q.reset_at - util::now()).max(1)),
                );
                let body = nested_error(&q.to_string(), "rate_limit_exceeded", code);
                (status, headers, Json(body)).into_response()
            }
            AppError::TooManyRequests { retry_after_secs } => {
                let mut headers = HeaderMap::new();
                headers.insert(header::RETRY_AFTER, header_value((*retry_after_secs).max(1)));
                let body = nested_error("Too many requests", "rate_limit_exceeded", code);
                (status, headers, Json(body)).into_response()
            }
            AppError::UpstreamTimeout(detail) => {
                tracing::warn!(detail = %detail, "Upstream request timed out");
                let body = nested_error("Upstream provider timed out", "gateway_timeout", code);
                (status, Json(body)).into_response()
            }
            AppError::UpstreamUnavailable(detail) => {
                tracing::warn!(detail = %detail, "Upstream provider unreachable");
                let body =
                    nested_error("Upstream provider unavailable", "upstream_unavailable", code);
                (status, Json(body)).into_response()
            }
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Crypto(_)
            | AppError::Internal(_) => {
                tracing::error!(error = %self, "Internal error");
                let body = json!({
                    "success": false,
                    "error": "Internal server error",
                    "code": code,
                });
                (status, Json(body)).into_response()
            }
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg) => {
                let body = json!({
                    "success": false,
                    "error": msg,
                    "code": code,
                });
                (status, Json(body)).into_response()
            }
            AppError::PayloadTooLarge => {
                let body = json!({
                    "success": false,
                    "error": "Request body too large",
                    "code": code,
                });
                (status, Json(body)).into_response()
            }
        }
    }
}
