use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State, rejection::BytesRejection},
    http::{HeaderMap, Method, Uri},
    response::Response,
    routing::any,
};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Path;
use crate::proxy::{self, rate_limit_headers, relay};
use crate::rate_limit::quota;
use crate::util::redact;

/// Forward one signed call to an upstream provider.
///
/// The call is charged once every check has passed, whatever the upstream
/// outcome. Retrying a failed call costs quota.
pub async fn forward(
    State(state): State<AppState>,
    Path((provider, path)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Response> {
    let body = body?;

    let call = {
        let conn = state.db.get()?;
        let tiers = state.tiers.current();
        proxy::authorize(
            &conn,
            &tiers,
            &headers,
            &provider,
            &body,
            state.config.signature_window_secs,
        )?
    };
    let endpoint = state.providers.lookup(&provider)?;

    let upstream = state
        .forwarder
        .forward(endpoint, method, &path, uri.query(), &headers, body)
        .await;

    let charged = state.db.get().map_err(AppError::from).and_then(|conn| {
        quota::record(
            &conn,
            &call.license.key,
            &call.credential.hardware_id,
            &call.period,
            1,
        )
    });
    if let Err(e) = charged {
        tracing::error!(
            license = %redact(&call.license.key),
            error = %e,
            "Failed to record proxied call"
        );
    }

    let upstream = upstream.inspect_err(|e| {
        tracing::warn!(
            license = %redact(&call.license.key),
            provider = %provider,
            error = %e,
            "Upstream call failed"
        );
    })?;

    tracing::debug!(
        license = %redact(&call.license.key),
        provider = %provider,
        status = %upstream.status(),
        "Proxied call"
    );

    Ok(relay(upstream, rate_limit_headers(&call.quota.after(1))))
}

pub fn router(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/proxy/{provider}/{*path}", any(forward))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}
