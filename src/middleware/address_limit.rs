use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};

use crate::db::AppState;
use crate::error::AppError;
use crate::util::{client_address, redact};

/// Throttle by source address. Requests whose address cannot be determined
/// are let through; the listener normally always provides one.
pub async fn address_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    if let Some(addr) = client_address(request.headers(), peer, state.config.trust_forwarded_for) {
        state.address_limiter.check(addr).inspect_err(|_| {
            tracing::debug!(address = %redact(&addr.to_string()), "Address throttled");
        })?;
    }

    Ok(next.run(request).await)
}
