pub mod admin;
pub mod proxy;
pub mod public;

use axum::{Router, middleware};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::GatewayMode;
use crate::db::AppState;
use crate::middleware::address_limit;

/// The complete HTTP surface for `state`. Mode and admin token decide
/// which routes exist.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new().merge(public::router(state.config.mode));

    if state.config.mode == GatewayMode::Proxy {
        app = app.merge(proxy::router(state.config.max_body_bytes));
    }
    if state.config.admin_token.is_some() {
        app = app.merge(admin::router(state.clone()));
    }

    app.layer(middleware::from_fn_with_state(state.clone(), address_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
