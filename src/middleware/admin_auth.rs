use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::error::AppError;
use crate::util::extract_bearer_token;

/// Require the configured admin token as a bearer token.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state
        .config
        .admin_token
        .as_deref()
        .ok_or_else(|| AppError::NotFound("Not found".into()))?;

    let provided = extract_bearer_token(request.headers())
        .ok_or_else(|| AppError::Unauthorized("Missing admin token".into()))?;

    if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::warn!("Rejected admin request with invalid token");
        return Err(AppError::Unauthorized("Invalid admin token".into()));
    }

    Ok(next.run(request).await)
}
